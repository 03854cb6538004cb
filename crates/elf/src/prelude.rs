//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use elfpress_elf::prelude::*;
//! ```

pub use crate::{
    Arch, Error as ElfError, Image, Relocation, RelocationTable, Section, Symbol, SymbolBind,
    SymbolKind, SymbolTable,
};
