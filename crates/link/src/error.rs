use snafu::prelude::*;

/// Error conditions when linking an object into a compressed executable.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// Propagated from the object loader.
    #[snafu(display("{source}"))]
    Elf { source: elfpress_elf::Error },

    /// Propagated from the coder or the parameter search.
    #[snafu(display("{source}"))]
    Pack { source: elfpress_pack::Error },

    /// Thrown when the object defines no global `_start`.
    #[snafu(display("Object has no _start symbol!"))]
    NoEntrySymbol,

    /// Thrown when a stub template lacks the split marker.
    #[snafu(display("Stub template has no signature marker!"))]
    MissingSignature,

    /// Thrown when a stub template is too short for its metadata or patch words.
    #[snafu(display("Stub template too small for its fixed patch offsets!"))]
    StubTooSmall,

    /// Thrown when an object carries the wrong relocation flavor for its architecture.
    #[snafu(display("Unsupported relocation section {name} for this architecture"))]
    WrongRelocationFlavor { name: String },

    /// Thrown when a relocation would write outside the laid-out payload.
    #[snafu(display("Relocation in {name} at {offset:#x} falls outside the payload"))]
    RelocationOutOfRange { name: String, offset: u64 },

    /// Thrown when the raw payload exceeds the stub's scratch space.
    #[snafu(display("Payload of {size} bytes exceeds the runtime limit"))]
    PayloadTooLarge { size: usize },

    /// Thrown in strict mode when decompressing the fresh stream does not reproduce the payload.
    #[snafu(display("Round-trip verification failed at {mismatches} byte(s)!"))]
    RoundTripMismatch { mismatches: usize },
}
pub(crate) type Result<T> = core::result::Result<T, Error>;

impl From<elfpress_elf::Error> for Error {
    #[inline]
    fn from(source: elfpress_elf::Error) -> Self {
        Self::Elf { source }
    }
}

impl From<elfpress_pack::Error> for Error {
    #[inline]
    fn from(source: elfpress_pack::Error) -> Self {
        Self::Pack { source }
    }
}
