//! # Memory Access
//!
//! The read-only view of target memory that expression resolution needs.
//!
//! Every process-control backend implements [`MemoryReader`], and so do the
//! in-memory doubles used by tests. Resolution only ever reads: a caller can
//! abandon a multi-step evaluation between steps with nothing to undo.

use gimli::{Endianity, RunTimeEndian};

use crate::error::{FathomError, FathomResult};
use crate::types::Address;

/// Synchronous, non-mutating access to target memory
pub trait MemoryReader
{
    /// Read exactly `len` bytes starting at `addr`
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: the range is unmapped, the process exited, or access
    ///   was denied
    fn read_memory(&self, addr: Address, len: usize) -> FathomResult<Vec<u8>>;

    /// Size of a target pointer in bytes
    fn pointer_size(&self) -> u8;

    /// Byte order of the target
    fn endian(&self) -> RunTimeEndian;

    /// Read one pointer-sized value
    ///
    /// ## Errors
    ///
    /// Propagates `MemoryRead` from [`MemoryReader::read_memory`].
    fn read_pointer(&self, addr: Address) -> FathomResult<Address>
    {
        let size = usize::from(self.pointer_size());
        let bytes = self.read_memory(addr, size)?;
        decode_unsigned(&bytes, self.endian()).map(Address::new).ok_or_else(|| FathomError::MemoryRead {
            address: addr,
            length: size,
            details: format!("unsupported pointer size {size}"),
        })
    }
}

impl<M: MemoryReader + ?Sized> MemoryReader for &M
{
    fn read_memory(&self, addr: Address, len: usize) -> FathomResult<Vec<u8>>
    {
        (**self).read_memory(addr, len)
    }

    fn pointer_size(&self) -> u8
    {
        (**self).pointer_size()
    }

    fn endian(&self) -> RunTimeEndian
    {
        (**self).endian()
    }
}

/// Decode an unsigned integer of 1, 2, 4, or 8 bytes
pub(crate) fn decode_unsigned(bytes: &[u8], endian: RunTimeEndian) -> Option<u64>
{
    match bytes.len() {
        1 => Some(u64::from(bytes[0])),
        2 => Some(u64::from(endian.read_u16(bytes))),
        4 => Some(u64::from(endian.read_u32(bytes))),
        8 => Some(endian.read_u64(bytes)),
        _ => None,
    }
}

/// Decode a signed integer of 1, 2, 4, or 8 bytes
pub(crate) fn decode_signed(bytes: &[u8], endian: RunTimeEndian) -> Option<i64>
{
    match bytes.len() {
        1 => Some(i64::from(bytes[0] as i8)),
        2 => Some(i64::from(endian.read_i16(bytes))),
        4 => Some(i64::from(endian.read_i32(bytes))),
        8 => Some(endian.read_i64(bytes)),
        _ => None,
    }
}
