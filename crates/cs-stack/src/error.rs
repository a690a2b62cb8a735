//! Push failures.

use std::fmt;

use thiserror::Error;

/// Why [`try_push`](crate::SplitCountStack::try_push) did not insert.
///
/// Both variants hand the element back. Neither touches the head slot:
/// the node is allocated and checked before it is linked.
#[derive(Error, PartialEq, Eq)]
pub enum PushError<T> {
    /// The allocator returned null for the node layout.
    #[error("node allocation failed")]
    AllocationFailed(T),

    /// The node address does not fit the pointer field of the composite
    /// head word. The target violates the address-width precondition.
    #[error("node address {addr:#x} exceeds the composite pointer field")]
    AddressOutOfRange { value: T, addr: usize },
}

impl<T> PushError<T> {
    /// Recover the element that was not pushed.
    pub fn into_inner(self) -> T {
        match self {
            PushError::AllocationFailed(value) => value,
            PushError::AddressOutOfRange { value, .. } => value,
        }
    }
}

// Manual so that `T` need not be `Debug`.
impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::AllocationFailed(_) => f.write_str("AllocationFailed(..)"),
            PushError::AddressOutOfRange { addr, .. } => f
                .debug_struct("AddressOutOfRange")
                .field("addr", addr)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_inner_returns_value() {
        let err = PushError::AllocationFailed(String::from("kept"));
        assert_eq!(err.into_inner(), "kept");

        let err = PushError::AddressOutOfRange {
            value: 5_u32,
            addr: 0xdead_0000,
        };
        assert_eq!(err.to_string(), "node address 0xdead0000 exceeds the composite pointer field");
        assert_eq!(err.into_inner(), 5);
    }
}
