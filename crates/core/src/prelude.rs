//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use elfpress_core::prelude::*;
//! ```

pub use crate::data::{DataCursor, Endian, Error as DataError};
pub use crate::util::format_size;
