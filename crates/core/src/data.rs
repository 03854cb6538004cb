//! Endian-aware reading of byte slices.
//!
//! [`DataCursor`] wraps a borrowed byte slice and a position, and reads Rust primitives with the
//! stored endianness. It works similarly to [`std::io::Cursor`] but is infallible to construct,
//! bounds-checked on every read, and usable without `std`.

use snafu::prelude::*;

/// Error conditions for when reading data.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown if reading tries to go out of bounds.
    #[snafu(display("Unexpected End-Of-File!"))]
    EndOfFile,
}
type Result<T> = core::result::Result<T, Error>;

/// Allows specifying which endianness the cursor is currently working with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// A bounds-checked reader over a borrowed byte slice.
#[derive(Clone, Debug)]
pub struct DataCursor<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

macro_rules! cursor_read {
    ($self:ident, $t:ty) => {{
        const LENGTH: usize = core::mem::size_of::<$t>();
        ensure!(
            $self.pos.checked_add(LENGTH).is_some_and(|end| end <= $self.data.len()),
            EndOfFileSnafu
        );

        let mut bytes = [0u8; LENGTH];
        bytes.copy_from_slice(&$self.data[$self.pos..$self.pos + LENGTH]);
        $self.pos += LENGTH;

        match $self.endian {
            Endian::Little => Ok(<$t>::from_le_bytes(bytes)),
            Endian::Big => Ok(<$t>::from_be_bytes(bytes)),
        }
    }};
}

impl<'a> DataCursor<'a> {
    /// Creates a new cursor over `data` using the provided endianness.
    #[inline]
    #[must_use]
    pub const fn new(data: &'a [u8], endian: Endian) -> Self {
        Self { data, pos: 0, endian }
    }

    /// Returns the current position of this cursor.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Sets the position of this cursor. Positions past the end fail on the next read.
    #[inline]
    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Returns the length of the underlying data.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the remaining data from the current position.
    #[inline]
    #[must_use]
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Returns a slice from the current position to some additional length and advances past it.
    ///
    /// # Errors
    /// Returns [`EndOfFile`](Error::EndOfFile) if trying to read out of bounds.
    #[inline]
    pub fn read_slice(&mut self, length: usize) -> Result<&'a [u8]> {
        ensure!(
            self.pos.checked_add(length).is_some_and(|end| end <= self.data.len()),
            EndOfFileSnafu
        );
        let slice = &self.data[self.pos..self.pos + length];
        self.pos += length;
        Ok(slice)
    }

    /// Reads one byte and returns it as a `u8`.
    ///
    /// # Errors
    /// Returns [`EndOfFile`](Error::EndOfFile) if trying to read out of bounds.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        cursor_read!(self, u8)
    }

    /// Reads two bytes and returns them as a `u16`.
    ///
    /// # Errors
    /// Returns [`EndOfFile`](Error::EndOfFile) if trying to read out of bounds.
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        cursor_read!(self, u16)
    }

    /// Reads four bytes and returns them as a `u32`.
    ///
    /// # Errors
    /// Returns [`EndOfFile`](Error::EndOfFile) if trying to read out of bounds.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        cursor_read!(self, u32)
    }

    /// Reads eight bytes and returns them as a `u64`.
    ///
    /// # Errors
    /// Returns [`EndOfFile`](Error::EndOfFile) if trying to read out of bounds.
    #[inline]
    pub fn read_u64(&mut self) -> Result<u64> {
        cursor_read!(self, u64)
    }

    /// Reads eight bytes and returns them as an `i64`.
    ///
    /// # Errors
    /// Returns [`EndOfFile`](Error::EndOfFile) if trying to read out of bounds.
    #[inline]
    pub fn read_i64(&mut self) -> Result<i64> {
        cursor_read!(self, i64)
    }
}
