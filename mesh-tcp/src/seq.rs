//! Modular sequence-number arithmetic.
//!
//! Sequence numbers are `u32` and wrap. Two numbers compare correctly as long
//! as they are less than `u32::MAX / 2` apart, which always holds for windows
//! measured in hundreds of bytes.

/// Returns `true` when `a` is ≤ `b` in wrap-around space.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

/// Returns `true` when `a` is strictly before `b` in wrap-around space.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

/// Distance from `from` forward to `to`, in bytes.
#[inline]
pub fn seq_diff(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from)
}

/// The later of two sequence numbers.
#[inline]
pub fn seq_max(a: u32, b: u32) -> u32 {
    if seq_le(a, b) {
        b
    } else {
        a
    }
}
