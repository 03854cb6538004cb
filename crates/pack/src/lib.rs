//! An order-N context-mixing arithmetic coder, tuned for squeezing the last bytes out of small
//! executables.
//!
//! The coder predicts one bit at a time from up to [`MAX_CONTEXT_COUNT`] weighted contexts, each
//! selecting some of the previous eight whole bytes as its key. Compression quality therefore
//! depends entirely on which contexts are active and how they are weighted; [`search`] runs a
//! genetic algorithm over those parameters for a concrete payload.
//!
//! The encoded stream is written forward here but stored reversed on disk, because the matching
//! runtime decompressor reads its input backwards. [`Coder::decompress`] consumes the reversed
//! stream the same way, which keeps the pair honest.

#![deny(unused_crate_dependencies)]

mod coder;
mod error;
mod params;
pub mod search;

pub mod prelude;

pub use coder::Coder;
pub use error::Error;
pub use params::CompressionParameters;

/// Upper bound on the number of context planes a parameter set may select.
pub const MAX_CONTEXT_COUNT: usize = 16;

/// Size in bytes of one context plane in the counter table.
pub const MAX_CONTEXT_SIZE: usize = 4 << 20;
