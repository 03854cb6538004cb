//! Parsing of relocatable ELF objects (`ET_REL`) into an in-memory section image.
//!
//! This crate only understands the two architectures the rest of elfpress can link for, i386 and
//! x86_64, and it only keeps what the linker needs: the section table with its data, the symbol
//! table and the relocation tables. Anything else in the object is carried as opaque bytes or
//! dropped.

#![deny(unused_crate_dependencies)]

mod error;
mod image;
mod reloc;
mod symtab;

pub mod prelude;

pub use error::Error;
pub use image::{Image, ProgramHeader, Section, SectionHeader};
pub use reloc::{Relocation, RelocationTable};
pub use symtab::{Symbol, SymbolBind, SymbolKind, SymbolTable};

/// The two object architectures the linker can consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arch {
    I386,
    X86_64,
}

impl Arch {
    /// Returns `true` for the 64-bit variant.
    #[inline]
    #[must_use]
    pub const fn is_64(self) -> bool {
        matches!(self, Self::X86_64)
    }

    /// The `e_ident[EI_CLASS]` value matching this architecture.
    #[inline]
    #[must_use]
    pub const fn class(self) -> u8 {
        match self {
            Self::I386 => ELFCLASS32,
            Self::X86_64 => ELFCLASS64,
        }
    }

    /// The `e_machine` value matching this architecture.
    #[inline]
    #[must_use]
    pub const fn machine(self) -> u16 {
        match self {
            Self::I386 => EM_386,
            Self::X86_64 => EM_X86_64,
        }
    }
}

impl core::fmt::Display for Arch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::I386 => write!(f, "i386"),
            Self::X86_64 => write!(f, "x86_64"),
        }
    }
}

/// Unique identifier that tells us if we're reading an ELF file.
pub const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;

pub const ET_REL: u16 = 1;

pub const EM_386: u16 = 3;
pub const EM_X86_64: u16 = 62;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;

/// Section indices at or above this value are reserved encodings, not real sections.
pub const SHN_LORESERVE: u16 = 0xFF00;
/// Reserved index for tentative definitions that still need storage assigned.
pub const SHN_COMMON: u16 = 0xFFF2;

pub const R_386_32: u32 = 1;
pub const R_386_PC32: u32 = 2;

pub const R_X86_64_64: u32 = 1;
pub const R_X86_64_PC32: u32 = 2;
pub const R_X86_64_32: u32 = 10;
