use snafu::prelude::*;

/// Error conditions for the coder and the parameter search.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// Thrown when the encoded stream would exceed the caller's size cap.
    #[snafu(display("Compressed data does not fit the output buffer!"))]
    BufferOverflow,

    /// Thrown when a parameter set is structurally unusable.
    #[snafu(display("Invalid compression parameters! Reason: {reason}"))]
    BadParameters { reason: &'static str },
}
pub(crate) type Result<T> = core::result::Result<T, Error>;
