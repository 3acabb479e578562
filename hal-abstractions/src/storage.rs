//! Durable flat-file storage capability
//!
//! Modelled on a FAT volume behind `embedded-sdmmc`: files live in a single
//! root directory, names are short, and every operation is blocking.

use core::fmt::Debug;

pub trait FileStore {
    type Error: Debug;

    fn exists(&self, name: &str) -> Result<bool, Self::Error>;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the number
    /// of bytes read, zero at end of file.
    fn read_at(&self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Append `data`, creating the file if it does not exist.
    fn append(&self, name: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Replace the whole file contents with `data`.
    fn write(&self, name: &str, data: &[u8]) -> Result<(), Self::Error>;

    fn remove(&self, name: &str) -> Result<(), Self::Error>;
}
