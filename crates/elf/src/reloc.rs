//! Relocation table views over `.rel.*` / `.rela.*` section data.

use elfpress_core::prelude::*;
use snafu::prelude::*;

use crate::error::{InvalidElfSnafu, Result};
use crate::image::Section;
use crate::{Arch, SHT_REL, SHT_RELA};

/// One decoded relocation entry. `addend` is zero for implicit-addend (`SHT_REL`) tables.
#[derive(Clone, Copy, Debug)]
pub struct Relocation {
    pub offset: u64,
    pub symbol: u32,
    pub kind: u32,
    pub addend: i64,
}

/// Borrowing view over one relocation section's entries.
pub struct RelocationTable<'a> {
    arch: Arch,
    explicit_addend: bool,
    data: &'a [u8],
}

impl<'a> RelocationTable<'a> {
    /// Wraps a `SHT_REL` or `SHT_RELA` section.
    ///
    /// # Errors
    /// Returns [`InvalidElf`](crate::Error::InvalidElf) if the section is not a relocation
    /// table.
    pub fn new(arch: Arch, section: &'a Section) -> Result<Self> {
        let explicit_addend = match section.header.kind {
            SHT_REL => false,
            SHT_RELA => true,
            _ => return InvalidElfSnafu { reason: "not a relocation section" }.fail(),
        };
        Ok(Self { arch, explicit_addend, data: &section.data })
    }

    #[inline]
    const fn entry_size(&self) -> usize {
        match (self.arch.is_64(), self.explicit_addend) {
            (false, false) => 8,
            (false, true) => 12,
            (true, false) => 16,
            (true, true) => 24,
        }
    }

    /// Number of entries in the table.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len() / self.entry_size()
    }

    /// Returns `true` if the table holds no relocations.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes entry `index`.
    ///
    /// # Errors
    /// Returns [`InvalidElf`](crate::Error::InvalidElf) if the index is out of range.
    pub fn get(&self, index: usize) -> Result<Relocation> {
        ensure!(index < self.len(), InvalidElfSnafu { reason: "relocation index out of range" });

        let mut cursor = DataCursor::new(self.data, Endian::Little);
        cursor.set_position(index * self.entry_size());

        if self.arch.is_64() {
            let offset = cursor.read_u64()?;
            let info = cursor.read_u64()?;
            let addend = if self.explicit_addend { cursor.read_i64()? } else { 0 };
            Ok(Relocation {
                offset,
                symbol: (info >> 32) as u32,
                kind: info as u32,
                addend,
            })
        } else {
            let offset = u64::from(cursor.read_u32()?);
            let info = cursor.read_u32()?;
            let addend = if self.explicit_addend { i64::from(cursor.read_u32()? as i32) } else { 0 };
            Ok(Relocation {
                offset,
                symbol: info >> 8,
                kind: info & 0xFF,
                addend,
            })
        }
    }

    /// Iterates every entry in table order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Relocation>> + '_ {
        (0..self.len()).map(move |index| self.get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::SectionHeader;

    fn rel_section(kind: u32, data: Vec<u8>) -> Section {
        Section {
            name: String::from(".rel.text"),
            header: SectionHeader { kind, ..SectionHeader::default() },
            data,
        }
    }

    #[test]
    fn decodes_rel32() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x12u32.to_le_bytes()); // r_offset
        data.extend_from_slice(&((5u32 << 8) | 2).to_le_bytes()); // sym 5, R_386_PC32
        let section = rel_section(SHT_REL, data);
        let table = RelocationTable::new(Arch::I386, &section).unwrap();
        assert_eq!(table.len(), 1);
        let reloc = table.get(0).unwrap();
        assert_eq!(reloc.offset, 0x12);
        assert_eq!(reloc.symbol, 5);
        assert_eq!(reloc.kind, crate::R_386_PC32);
        assert_eq!(reloc.addend, 0);
    }

    #[test]
    fn decodes_rela64() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x40u64.to_le_bytes());
        data.extend_from_slice(&(((7u64) << 32) | 1).to_le_bytes()); // sym 7, R_X86_64_64
        data.extend_from_slice(&(-4i64).to_le_bytes());
        let section = rel_section(SHT_RELA, data);
        let table = RelocationTable::new(Arch::X86_64, &section).unwrap();
        let reloc = table.get(0).unwrap();
        assert_eq!(reloc.offset, 0x40);
        assert_eq!(reloc.symbol, 7);
        assert_eq!(reloc.kind, crate::R_X86_64_64);
        assert_eq!(reloc.addend, -4);
    }

    #[test]
    fn rejects_non_relocation_sections() {
        let section = rel_section(crate::SHT_SYMTAB, Vec::new());
        assert!(RelocationTable::new(Arch::I386, &section).is_err());
    }
}
