//! A decoded-on-demand view over `.symtab` and its linked string table.

use elfpress_core::prelude::*;
use snafu::prelude::*;

use crate::error::{InvalidElfSnafu, Result};
use crate::image::str_at;
use crate::Arch;

/// Symbol binding, from the upper nibble of `st_info`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolBind {
    Local,
    Global,
    Weak,
    Other(u8),
}

impl From<u8> for SymbolBind {
    #[inline]
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Local,
            1 => Self::Global,
            2 => Self::Weak,
            other => Self::Other(other),
        }
    }
}

/// Symbol type, from the lower nibble of `st_info`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    NoType,
    Object,
    Func,
    Section,
    File,
    Other(u8),
}

impl From<u8> for SymbolKind {
    #[inline]
    fn from(value: u8) -> Self {
        match value {
            0 => Self::NoType,
            1 => Self::Object,
            2 => Self::Func,
            3 => Self::Section,
            4 => Self::File,
            other => Self::Other(other),
        }
    }
}

/// One decoded symbol table entry.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    /// Offset of the name in the string table; stable across the object, unlike the name itself,
    /// which may be empty. Used to key common-symbol allocation.
    pub name_offset: u32,
    pub bind: SymbolBind,
    pub kind: SymbolKind,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
}

/// Borrowing view over the symbol table bytes. Entries are decoded on access; nothing is owned
/// beyond the decoded names.
pub struct SymbolTable<'a> {
    arch: Arch,
    data: &'a [u8],
    strings: &'a [u8],
}

impl<'a> SymbolTable<'a> {
    const ENTRY32: usize = 16;
    const ENTRY64: usize = 24;

    /// Wraps the raw `.symtab` contents and its string table.
    #[inline]
    #[must_use]
    pub const fn new(arch: Arch, data: &'a [u8], strings: &'a [u8]) -> Self {
        Self { arch, data, strings }
    }

    #[inline]
    const fn entry_size(&self) -> usize {
        if self.arch.is_64() { Self::ENTRY64 } else { Self::ENTRY32 }
    }

    /// Number of entries in the table.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len() / self.entry_size()
    }

    /// Returns `true` if the table holds no symbols.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes entry `index`.
    ///
    /// # Errors
    /// Returns [`InvalidElf`](crate::Error::InvalidElf) if the index or the entry's name offset
    /// is out of range.
    pub fn get(&self, index: usize) -> Result<Symbol> {
        ensure!(index < self.len(), InvalidElfSnafu { reason: "symbol index out of range" });

        let mut cursor = DataCursor::new(self.data, Endian::Little);
        cursor.set_position(index * self.entry_size());

        let (name_offset, info, shndx, value, size) = if self.arch.is_64() {
            let name_offset = cursor.read_u32()?;
            let info = cursor.read_u8()?;
            let _other = cursor.read_u8()?;
            let shndx = cursor.read_u16()?;
            let value = cursor.read_u64()?;
            let size = cursor.read_u64()?;
            (name_offset, info, shndx, value, size)
        } else {
            let name_offset = cursor.read_u32()?;
            let value = u64::from(cursor.read_u32()?);
            let size = u64::from(cursor.read_u32()?);
            let info = cursor.read_u8()?;
            let _other = cursor.read_u8()?;
            let shndx = cursor.read_u16()?;
            (name_offset, info, shndx, value, size)
        };

        Ok(Symbol {
            name: str_at(self.strings, name_offset as usize)?,
            name_offset,
            bind: SymbolBind::from(info >> 4),
            kind: SymbolKind::from(info & 0x0F),
            shndx,
            value,
            size,
        })
    }

    /// Iterates every entry in table order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Symbol>> + '_ {
        (0..self.len()).map(move |index| self.get(index))
    }

    /// Finds the first symbol with the given name.
    ///
    /// # Errors
    /// Propagates decoding failures from [`get`](Self::get).
    pub fn find(&self, name: &str) -> Result<Option<Symbol>> {
        for symbol in self.iter() {
            let symbol = symbol?;
            if symbol.name == name {
                return Ok(Some(symbol));
            }
        }
        Ok(None)
    }
}
