use elfpress_core::data::Error as DataError;
use snafu::prelude::*;

/// Error conditions when loading a relocatable object.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    #[cfg(feature = "std")]
    #[snafu(display("Filesystem Error {source}"))]
    FileError { source: std::io::Error },

    /// Thrown if trying to read the object out of its current bounds.
    #[snafu(display("Reached the end of the current stream!"))]
    EndOfFile,

    /// Thrown if the header contains a magic number other than `\x7fELF`.
    #[snafu(display("Invalid Magic! Expected {:?}.", crate::MAGIC))]
    InvalidMagic,

    /// Thrown when the object deviates from what a System V relocatable file should look like.
    #[snafu(display("Invalid ELF object! Reason: {reason}"))]
    InvalidElf { reason: &'static str },

    /// Thrown when the object is for an architecture the linker cannot handle.
    #[snafu(display("Cannot handle architecture (class = {class}, machine = {machine:#x})"))]
    UnsupportedArch { class: u8, machine: u16 },
}
pub(crate) type Result<T> = core::result::Result<T, Error>;

impl From<DataError> for Error {
    #[inline]
    fn from(_: DataError) -> Self {
        // Out-of-bounds reads are the only data error a cursor reports.
        Self::EndOfFile
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    #[inline]
    fn from(error: std::io::Error) -> Self {
        Error::FileError { source: error }
    }
}
