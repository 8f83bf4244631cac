//! Memory address type.

use std::fmt;
use std::ops::Add;

/// Strongly typed address in the target's address space
///
/// Wrapping `u64` keeps addresses apart from sizes and offsets, which matters
/// here because member resolution mixes all three constantly.
///
/// ## Example
///
/// ```rust
/// use fathom_core::types::Address;
///
/// let base = Address::from(0x1000);
/// assert_eq!((base + 8).value(), 0x1008);
/// assert!(Address::NULL.is_null());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null pointer representation
    pub const NULL: Self = Address(0);

    /// Create a new address from a `u64` value
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the null pointer
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add a byte offset, returning `None` on overflow
    ///
    /// ```rust
    /// use fathom_core::types::Address;
    ///
    /// assert_eq!(Address::new(0x10).checked_add(4), Some(Address::new(0x14)));
    /// assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Apply a signed displacement (frame offsets, load bias)
    pub fn offset(self, delta: i64) -> Self
    {
        Address(self.0.wrapping_add_signed(delta))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}
