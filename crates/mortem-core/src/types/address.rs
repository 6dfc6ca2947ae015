//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed memory address in the inferior's address space
///
/// Keeps addresses from being mixed up with sizes, register values used as
/// plain integers, or exit codes. Arithmetic through `+`/`-` wraps; use the
/// checked variants when walking untrusted memory (frame chains, pointer
/// arithmetic in expressions).
///
/// ## Example
///
/// ```rust
/// use mortem_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// assert!(Address::ZERO.is_null());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value (usable in const contexts).
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Raw `u64` value of this address.
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the null address.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset, returning `None` on overflow.
    ///
    /// ```rust
    /// use mortem_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset, returning `None` on underflow.
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Apply a signed displacement, returning `None` if the result leaves the
    /// 64-bit address space.
    ///
    /// ```rust
    /// use mortem_core::types::Address;
    ///
    /// let fp = Address::from(0x7ff0);
    /// assert_eq!(fp.checked_offset(-16), Some(Address::from(0x7fe0)));
    /// assert_eq!(Address::ZERO.checked_offset(-1), None);
    /// ```
    pub fn checked_offset(self, displacement: i64) -> Option<Self>
    {
        self.0.checked_add_signed(displacement).map(Address)
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

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
