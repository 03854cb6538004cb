//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use elfpress_pack::prelude::*;
//! ```

pub use crate::search::{self, SearchConfig};
pub use crate::{Coder, CompressionParameters, Error as PackError};
