//! Utilities shared by the [elfpress](https://crates.io/crates/elfpress) crates.
//!
//! By default this crate only enables modules without extra dependencies (aside from snafu,
//! which is required for errors).

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
#[allow(unused_imports)]
mod no_std {
    extern crate alloc;
    pub use alloc::format;
    pub use alloc::string::String;
}

pub mod prelude;

pub mod data;
pub mod util;

#[cfg(feature = "time")]
pub mod time;
