//! The precompiled decompression stubs and their per-architecture layout facts.
//!
//! The stubs are opaque blobs of hand-written assembly, rebuilt rarely and shipped as binary
//! assets. Everything the linker needs to know about them lives in [`ArchSpec`]: where the patch
//! words sit, how wide an import slot is, and which relocation flavor the matching objects use.
//! A rebuild of the stub assembly can move the patch offsets, so they are named here and nowhere
//! else.

use snafu::prelude::*;

use elfpress_elf::Arch;

use crate::error::{MissingSignatureSnafu, Result, StubTooSmallSnafu};

/// Marker splitting a stub template into the kept prefix and the suffix that is copied into the
/// payload.
pub const SIGNATURE: &[u8] = b"XXXX-Compressed code here-XXXX";

/// Number of metadata bytes immediately before the signature that get replayed into the output.
pub const META_BYTES: usize = 8;

/// Per-architecture linking facts.
pub struct ArchSpec {
    pub arch: Arch,
    /// Width of one import jump-table slot.
    pub slot_width: usize,
    /// Prefix of the relocation sections the matching objects carry.
    pub rel_prefix: &'static str,
    /// Offset of the stub's pointer to the last four bytes of compressed data.
    pub code_end_patch: usize,
    /// Offset of the file-size field in the stub's ELF header.
    pub file_size_patch: usize,
    /// The file-size field is eight bytes wide on x86_64, four on i386.
    pub file_size_is_64: bool,
}

static I386: ArchSpec = ArchSpec {
    arch: Arch::I386,
    slot_width: 5,
    rel_prefix: ".rel.",
    code_end_patch: 0xD8,
    file_size_patch: 0x7C,
    file_size_is_64: false,
};

static X86_64: ArchSpec = ArchSpec {
    arch: Arch::X86_64,
    slot_width: 14,
    rel_prefix: ".rela.",
    code_end_patch: 0x169,
    file_size_patch: 0xC8,
    file_size_is_64: true,
};

impl ArchSpec {
    /// The linking facts for one architecture.
    #[inline]
    #[must_use]
    pub fn for_arch(arch: Arch) -> &'static Self {
        match arch {
            Arch::I386 => &I386,
            Arch::X86_64 => &X86_64,
        }
    }
}

/// The precompiled stub template shipped with the crate for one architecture.
#[must_use]
pub fn builtin_template(arch: Arch) -> &'static [u8] {
    match arch {
        Arch::I386 => include_bytes!("../stubs/header32.bin"),
        Arch::X86_64 => include_bytes!("../stubs/header64.bin"),
    }
}

/// A stub template split at its signature.
pub struct StubTemplate<'a> {
    /// Everything before the signature; becomes the start of the output file.
    pub prefix: &'a [u8],
    /// Everything after the signature; becomes the start of the payload. Ends with the
    /// relative-jump word the linker patches to reach `_start`.
    pub suffix: &'a [u8],
}

impl<'a> StubTemplate<'a> {
    /// Splits a template at the first occurrence of [`SIGNATURE`].
    ///
    /// # Errors
    /// Returns [`MissingSignature`](crate::Error::MissingSignature) if the marker is absent and
    /// [`StubTooSmall`](crate::Error::StubTooSmall) if either half is too short to carry its
    /// patch words.
    pub fn split(template: &'a [u8]) -> Result<Self> {
        let at = template
            .windows(SIGNATURE.len())
            .position(|window| window == SIGNATURE)
            .context(MissingSignatureSnafu)?;
        let prefix = &template[..at];
        let suffix = &template[at + SIGNATURE.len()..];
        ensure!(prefix.len() >= META_BYTES && suffix.len() >= 4, StubTooSmallSnafu);
        Ok(Self { prefix, suffix })
    }

    /// The metadata bytes immediately preceding the signature, replayed verbatim between the
    /// prefix and the compressed stream in the output.
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &'a [u8] {
        &self.prefix[self.prefix.len() - META_BYTES..]
    }
}
