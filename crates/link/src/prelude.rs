//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use elfpress_link::prelude::*;
//! ```

pub use crate::{
    builtin_template, import_hash, link, ArchSpec, Error as LinkError, LinkOptions, LinkOutput,
    StubTemplate,
};
