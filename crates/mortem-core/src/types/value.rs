//! Static types and storage locations of program variables.
//!
//! A [`crate::target::Symbolizer`] describes variables with these; the
//! expression evaluator turns them into values by reading the frozen
//! registers and memory.

use std::fmt;

use super::{Address, RegisterName};

/// C-level type of a value
///
/// Only what crash inspection needs: integers, `char`, pointers and
/// fixed-size arrays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType
{
    /// Integer of `size` bytes.
    Int
    {
        /// Width in bytes (1, 2, 4 or 8).
        size: u8,
        /// Whether the value is sign-extended.
        signed: bool,
    },
    /// `char` (one byte).
    Char,
    /// Pointer to `pointee`.
    Pointer(Box<ValueType>),
    /// Fixed-size array.
    Array
    {
        /// Element type.
        element: Box<ValueType>,
        /// Number of elements.
        len: usize,
    },
    /// `void`, only meaningful behind a pointer.
    Void,
}

impl ValueType
{
    /// `int` (4 bytes, signed).
    pub const INT: ValueType = ValueType::Int { size: 4, signed: true };
    /// `long` (8 bytes, signed).
    pub const LONG: ValueType = ValueType::Int { size: 8, signed: true };

    /// Pointer to `self`.
    #[must_use]
    pub fn pointer_to(self) -> ValueType
    {
        ValueType::Pointer(Box::new(self))
    }

    /// `char *`
    pub fn c_string() -> ValueType
    {
        ValueType::Char.pointer_to()
    }

    /// Size in bytes, given the target's pointer width.
    pub fn size(&self, pointer_size: u8) -> usize
    {
        match self {
            ValueType::Int { size, .. } => usize::from(*size),
            ValueType::Char => 1,
            ValueType::Pointer(_) => usize::from(pointer_size),
            ValueType::Array { element, len } => element.size(pointer_size).saturating_mul(*len),
            ValueType::Void => 0,
        }
    }

    /// Whether this is `char *` (summarized as a C string).
    pub fn is_c_string(&self) -> bool
    {
        matches!(self, ValueType::Pointer(pointee) if **pointee == ValueType::Char)
    }
}

impl fmt::Display for ValueType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ValueType::Int { size, signed } => {
                let name = match (size, signed) {
                    (1, true) => "signed char",
                    (1, false) => "unsigned char",
                    (2, true) => "short",
                    (2, false) => "unsigned short",
                    (4, true) => "int",
                    (4, false) => "unsigned int",
                    (8, true) => "long",
                    (8, false) => "unsigned long",
                    _ => return write!(f, "int{}_t", u32::from(*size) * 8),
                };
                f.write_str(name)
            }
            ValueType::Char => f.write_str("char"),
            ValueType::Pointer(pointee) if matches!(**pointee, ValueType::Pointer(_)) => write!(f, "{pointee}*"),
            ValueType::Pointer(pointee) => write!(f, "{pointee} *"),
            ValueType::Array { element, len } => write!(f, "{element} [{len}]"),
            ValueType::Void => f.write_str("void"),
        }
    }
}

/// Where a variable's bytes live at a stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableLocation
{
    /// Absolute address in the inferior (globals, statics).
    Address(Address),
    /// Offset from the frame's frame pointer (locals, spilled arguments).
    FrameOffset(i64),
    /// Held in a register of the frame's thread.
    Register(RegisterName),
    /// Known constant value, no storage.
    Value(u64),
}

/// Symbol-table description of a variable visible in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo
{
    /// Storage location.
    pub location: VariableLocation,
    /// Declared type.
    pub ty: ValueType,
}

impl VariableInfo
{
    /// Variable at `location` with type `ty`.
    pub fn new(location: VariableLocation, ty: ValueType) -> Self
    {
        Self { location, ty }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_type_names()
    {
        assert_eq!(ValueType::INT.to_string(), "int");
        assert_eq!(ValueType::c_string().to_string(), "char *");
        assert_eq!(ValueType::c_string().pointer_to().to_string(), "char **");
        let array = ValueType::Array {
            element: Box::new(ValueType::Char),
            len: 6,
        };
        assert_eq!(array.to_string(), "char [6]");
    }

    #[test]
    fn test_sizes()
    {
        assert_eq!(ValueType::INT.size(8), 4);
        assert_eq!(ValueType::c_string().size(8), 8);
        let array = ValueType::Array {
            element: Box::new(ValueType::INT),
            len: 3,
        };
        assert_eq!(array.size(8), 12);
        assert!(ValueType::c_string().is_c_string());
        assert!(!ValueType::INT.pointer_to().is_c_string());
    }
}
