//! The tunable knobs of the coder and their exact textual form.

use core::fmt;
use core::str::FromStr;

use snafu::prelude::*;

use crate::error::BadParametersSnafu;
use crate::{Error, MAX_CONTEXT_COUNT};

/// A full coder configuration: how many context planes are active, and per plane a mixing weight
/// and an 8-bit mask selecting which of the previous eight bytes form the context key.
///
/// The textual form is `CCWWXXWWXX…` in lowercase hex: the context count, then one
/// (weight, mask) pair per context. It round-trips exactly through [`FromStr`] and
/// [`Display`](fmt::Display), and the same string is what the command line accepts.
///
/// ```
/// use elfpress_pack::CompressionParameters;
///
/// let params: CompressionParameters = "0201080101".parse().unwrap();
/// assert_eq!(params.context_count, 2);
/// assert_eq!(params.weights[0], 0x01);
/// assert_eq!(params.contexts[0], 0x08);
/// assert_eq!(params.to_string(), "0201080101");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompressionParameters {
    pub context_count: usize,
    pub weights: [u8; MAX_CONTEXT_COUNT],
    pub contexts: [u8; MAX_CONTEXT_COUNT],
}

impl CompressionParameters {
    /// Returns `true` if no parameters have been set yet (the default state).
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.context_count == 0
    }
}

fn hex_pair(text: &str, at: usize) -> Result<u8, Error> {
    text.get(at..at + 2)
        .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        .ok_or(Error::BadParameters { reason: "expected two hex digits" })
}

impl FromStr for CompressionParameters {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Error> {
        // At least two contexts.
        ensure!(text.len() >= 10, BadParametersSnafu { reason: "parameter string too short" });

        let context_count = usize::from(hex_pair(text, 0)?);
        ensure!(
            (2..=MAX_CONTEXT_COUNT).contains(&context_count),
            BadParametersSnafu { reason: "context count out of range" }
        );
        ensure!(
            text.len() == 2 + 4 * context_count,
            BadParametersSnafu { reason: "parameter string length mismatch" }
        );

        let mut params = Self { context_count, ..Self::default() };
        for i in 0..context_count {
            params.weights[i] = hex_pair(text, 2 + 4 * i)?;
            params.contexts[i] = hex_pair(text, 4 + 4 * i)?;
        }
        Ok(params)
    }
}

impl fmt::Display for CompressionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.context_count)?;
        for i in 0..self.context_count {
            write!(f, "{:02x}{:02x}", self.weights[i], self.contexts[i])?;
        }
        Ok(())
    }
}
