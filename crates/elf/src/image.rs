//! The loaded view of a relocatable object: every section with its header and data, in on-disk
//! order, plus a name lookup table.

#[cfg(feature = "std")]
use std::path::Path;

use std::collections::HashMap;

use elfpress_core::prelude::*;
use snafu::prelude::*;

use crate::error::{EndOfFileSnafu, InvalidElfSnafu, InvalidMagicSnafu, Result, UnsupportedArchSnafu};
use crate::{Arch, SymbolTable, ELFCLASS32, ELFCLASS64, EM_386, EM_X86_64, ET_REL, MAGIC, SHT_NOBITS};

/// The most program headers an object is allowed to carry. Relocatable objects normally have
/// none at all.
pub const MAX_PROGRAM_HEADERS: usize = 64;

/// A section header with all fields widened to 64 bits so both classes share one record.
#[derive(Clone, Copy, Debug, Default)]
pub struct SectionHeader {
    pub name_offset: u32,
    pub kind: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

/// The fields of a program header the image retains.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgramHeader {
    pub kind: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

/// One section of the object: its name, header, and owned data.
///
/// `SHT_NOBITS` sections keep an empty buffer; their declared size stays in the header.
pub struct Section {
    pub name: String,
    pub header: SectionHeader,
    pub data: Vec<u8>,
}

impl Section {
    /// Returns `true` if this section occupies no file space (`.bss` and friends).
    #[inline]
    #[must_use]
    pub fn is_nobits(&self) -> bool {
        self.header.kind == SHT_NOBITS
    }
}

/// A parsed relocatable object.
pub struct Image {
    arch: Arch,
    program_headers: Vec<ProgramHeader>,
    sections: Vec<Section>,
    by_name: HashMap<String, usize>,
}

impl Image {
    /// Opens a file on disk, loads its contents, and parses it into a new image.
    ///
    /// # Errors
    /// Returns [`FileError`](crate::Error::FileError) if the file cannot be read, otherwise
    /// whatever [`load`](Self::load) reports.
    #[cfg(feature = "std")]
    #[inline]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::load(&data)
    }

    /// Parses a relocatable object from a byte buffer.
    ///
    /// # Errors
    /// Returns [`InvalidMagic`](crate::Error::InvalidMagic) for non-ELF input,
    /// [`UnsupportedArch`](crate::Error::UnsupportedArch) for anything but i386/x86_64 objects,
    /// and [`InvalidElf`](crate::Error::InvalidElf) on structural problems (truncation,
    /// unexpected header sizes, out-of-range string table).
    pub fn load(data: &[u8]) -> Result<Self> {
        ensure!(data.len() >= 16, EndOfFileSnafu);
        ensure!(data[0..4] == MAGIC, InvalidMagicSnafu);

        let class = data[4];
        let mut cursor = DataCursor::new(data, Endian::Little);
        cursor.set_position(16);
        let kind = cursor.read_u16()?;
        let machine = cursor.read_u16()?;

        let arch = match (class, machine) {
            (ELFCLASS32, EM_386) => Arch::I386,
            (ELFCLASS64, EM_X86_64) => Arch::X86_64,
            _ => return UnsupportedArchSnafu { class, machine }.fail(),
        };
        ensure!(kind == ET_REL, InvalidElfSnafu { reason: "not a relocatable object" });

        let _version = cursor.read_u32()?;
        let (phoff, shoff) = if arch.is_64() {
            let _entry = cursor.read_u64()?;
            (cursor.read_u64()?, cursor.read_u64()?)
        } else {
            let _entry = cursor.read_u32()?;
            (u64::from(cursor.read_u32()?), u64::from(cursor.read_u32()?))
        };
        let _flags = cursor.read_u32()?;
        let _ehsize = cursor.read_u16()?;
        let phentsize = cursor.read_u16()?;
        let phnum = cursor.read_u16()?;
        let shentsize = cursor.read_u16()?;
        let shnum = cursor.read_u16()?;
        let shstrndx = cursor.read_u16()?;

        let program_headers = Self::load_program_headers(data, arch, phoff, phentsize, phnum)?;
        let headers = Self::load_section_headers(data, arch, shoff, shentsize, shnum)?;

        let strings = headers
            .get(usize::from(shstrndx))
            .ok_or(crate::Error::InvalidElf { reason: "section name table out of range" })?;
        let strings = slice_checked(data, strings.offset, strings.size, "section name table")?;

        let mut sections = Vec::with_capacity(headers.len());
        let mut by_name = HashMap::with_capacity(headers.len());
        for (index, header) in headers.into_iter().enumerate() {
            let name = str_at(strings, header.name_offset as usize)?;
            let data = if header.kind == SHT_NOBITS {
                Vec::new()
            } else {
                slice_checked(data, header.offset, header.size, "section data")?.to_vec()
            };
            log::debug!(
                "Loading section '{}' at offset {:#x}, {} bytes",
                name,
                header.offset,
                header.size
            );
            by_name.insert(name.clone(), index);
            sections.push(Section { name, header, data });
        }

        Ok(Self { arch, program_headers, sections, by_name })
    }

    fn load_program_headers(
        data: &[u8], arch: Arch, phoff: u64, phentsize: u16, phnum: u16,
    ) -> Result<Vec<ProgramHeader>> {
        if phnum == 0 {
            return Ok(Vec::new());
        }
        let expected: u16 = if arch.is_64() { 56 } else { 32 };
        ensure!(phentsize == expected, InvalidElfSnafu { reason: "unexpected e_phentsize" });
        ensure!(
            usize::from(phnum) <= MAX_PROGRAM_HEADERS,
            InvalidElfSnafu { reason: "too many program headers" }
        );

        let mut cursor = DataCursor::new(data, Endian::Little);
        let mut headers = Vec::with_capacity(usize::from(phnum));
        for i in 0..u64::from(phnum) {
            cursor.set_position(usize::try_from(phoff + i * u64::from(phentsize)).unwrap_or(usize::MAX));
            let header = if arch.is_64() {
                let kind = cursor.read_u32()?;
                let flags = cursor.read_u32()?;
                let offset = cursor.read_u64()?;
                let vaddr = cursor.read_u64()?;
                let _paddr = cursor.read_u64()?;
                let filesz = cursor.read_u64()?;
                let memsz = cursor.read_u64()?;
                ProgramHeader { kind, flags, offset, vaddr, filesz, memsz }
            } else {
                let kind = cursor.read_u32()?;
                let offset = u64::from(cursor.read_u32()?);
                let vaddr = u64::from(cursor.read_u32()?);
                let _paddr = cursor.read_u32()?;
                let filesz = u64::from(cursor.read_u32()?);
                let memsz = u64::from(cursor.read_u32()?);
                let flags = cursor.read_u32()?;
                ProgramHeader { kind, flags, offset, vaddr, filesz, memsz }
            };
            headers.push(header);
        }
        Ok(headers)
    }

    fn load_section_headers(
        data: &[u8], arch: Arch, shoff: u64, shentsize: u16, shnum: u16,
    ) -> Result<Vec<SectionHeader>> {
        let expected: u16 = if arch.is_64() { 64 } else { 40 };
        ensure!(shentsize == expected, InvalidElfSnafu { reason: "unexpected e_shentsize" });

        let mut cursor = DataCursor::new(data, Endian::Little);
        let mut headers = Vec::with_capacity(usize::from(shnum));
        for i in 0..u64::from(shnum) {
            cursor.set_position(usize::try_from(shoff + i * u64::from(shentsize)).unwrap_or(usize::MAX));
            let header = if arch.is_64() {
                SectionHeader {
                    name_offset: cursor.read_u32()?,
                    kind: cursor.read_u32()?,
                    flags: cursor.read_u64()?,
                    addr: cursor.read_u64()?,
                    offset: cursor.read_u64()?,
                    size: cursor.read_u64()?,
                    link: cursor.read_u32()?,
                    info: cursor.read_u32()?,
                    addralign: cursor.read_u64()?,
                    entsize: cursor.read_u64()?,
                }
            } else {
                SectionHeader {
                    name_offset: cursor.read_u32()?,
                    kind: cursor.read_u32()?,
                    flags: u64::from(cursor.read_u32()?),
                    addr: u64::from(cursor.read_u32()?),
                    offset: u64::from(cursor.read_u32()?),
                    size: u64::from(cursor.read_u32()?),
                    link: cursor.read_u32()?,
                    info: cursor.read_u32()?,
                    addralign: u64::from(cursor.read_u32()?),
                    entsize: u64::from(cursor.read_u32()?),
                }
            };
            headers.push(header);
        }
        Ok(headers)
    }

    /// The architecture this object was compiled for.
    #[inline]
    #[must_use]
    pub const fn arch(&self) -> Arch {
        self.arch
    }

    /// The program headers the object carried, if any.
    #[inline]
    #[must_use]
    pub fn program_headers(&self) -> &[ProgramHeader] {
        &self.program_headers
    }

    /// All sections in on-disk order. The slice index matches the symbol table's `st_shndx`
    /// encoding for every value below [`SHN_LORESERVE`](crate::SHN_LORESERVE).
    #[inline]
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Looks a section up by table index.
    #[inline]
    #[must_use]
    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    /// Looks a section up by name.
    #[inline]
    #[must_use]
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.by_name.get(name).map(|&index| &self.sections[index])
    }

    /// Builds the symbol table view over `.symtab` and its linked string table.
    ///
    /// # Errors
    /// Returns [`InvalidElf`](crate::Error::InvalidElf) if the object has no symbol table or its
    /// string table link is out of range.
    pub fn symbol_table(&self) -> Result<SymbolTable<'_>> {
        let symtab = self
            .section_by_name(".symtab")
            .ok_or(crate::Error::InvalidElf { reason: "object has no .symtab" })?;
        self.symbol_table_for(symtab)
    }

    /// Builds the symbol table view for an explicit `SHT_SYMTAB` section, following its string
    /// table link.
    ///
    /// # Errors
    /// Returns [`InvalidElf`](crate::Error::InvalidElf) if the string table link is out of range.
    pub fn symbol_table_for<'a>(&'a self, symtab: &'a Section) -> Result<SymbolTable<'a>> {
        let strings = self
            .section(symtab.header.link as usize)
            .ok_or(crate::Error::InvalidElf { reason: "symbol string table out of range" })?;
        Ok(SymbolTable::new(self.arch, &symtab.data, &strings.data))
    }
}

/// Bounds-checked subslice of the file image, mapping failures to *invalid ELF*.
fn slice_checked<'a>(data: &'a [u8], offset: u64, size: u64, reason: &'static str) -> Result<&'a [u8]> {
    let start = usize::try_from(offset).map_err(|_| crate::Error::InvalidElf { reason })?;
    let len = usize::try_from(size).map_err(|_| crate::Error::InvalidElf { reason })?;
    let end = start.checked_add(len).ok_or(crate::Error::InvalidElf { reason })?;
    data.get(start..end).ok_or(crate::Error::InvalidElf { reason })
}

/// Reads a NUL-terminated name out of a string table.
pub(crate) fn str_at(table: &[u8], offset: usize) -> Result<String> {
    let tail = table
        .get(offset..)
        .ok_or(crate::Error::InvalidElf { reason: "string table offset out of range" })?;
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}
