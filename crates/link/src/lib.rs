//! Turns one relocatable object into a self-extracting executable.
//!
//! The linker lays the object's reachable sections out at fixed virtual addresses behind a
//! precompiled decompression stub, replaces dynamic symbols with a hash-keyed jump table the stub
//! resolves at runtime, applies the relocations, and splices the arithmetic-coded payload plus
//! its parameters into the stub template. The output deliberately skips most of what a
//! well-formed ELF would carry; every byte in it is either executed or read by the stub.

#![deny(unused_crate_dependencies)]

mod error;
mod hash;
mod linker;
mod stub;

pub mod prelude;

pub use error::Error;
pub use hash::import_hash;
pub use linker::{link, LinkOptions, LinkOutput};
pub use stub::{builtin_template, ArchSpec, StubTemplate, SIGNATURE};

/// Virtual address the payload is linked against. Baked into the stub templates.
pub const BASE: u32 = 0x0800_0000;

/// Offset between the payload's link address and where the stub actually inflates it. Part of
/// the ABI with the stub templates; both sides must agree byte-for-byte.
pub const LOAD_BIAS: u32 = 0x0001_0000;

/// Upper bound for the raw payload and for the encoded stream, matching the runtime stub's
/// scratch space.
pub const MAX_IMAGE: usize = 65536;
