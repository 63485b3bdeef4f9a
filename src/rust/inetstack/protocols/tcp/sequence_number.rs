// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// TCP sequence numbers (RFC 793, Section 3.3) live in a space of 2^32 values that wraps around. Arithmetic is modulo
// 2^32 and a number is "after" another when the signed 32-bit difference between them is positive. Comparisons are
// therefore only meaningful between numbers less than 2^31 apart, and they are not transitive across the whole space:
// a < b < c < a is possible. For this reason sequence numbers are their own type and never compared as plain u32s.

use ::std::{
    cmp::Ordering,
    fmt,
    ops::{
        Add,
        AddAssign,
        Sub,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct SeqNumber(u32);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl SeqNumber {
    /// Checks if the target number lies in the half-open range `[start, end)`.
    #[inline]
    pub fn is_within(self, start: SeqNumber, end: SeqNumber) -> bool {
        start <= self && self < end
    }

    /// Returns the later of two sequence numbers.
    #[inline]
    pub fn latest(self, other: SeqNumber) -> SeqNumber {
        if self >= other {
            self
        } else {
            other
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<SeqNumber> for u32 {
    #[inline]
    fn from(item: SeqNumber) -> u32 {
        item.0
    }
}

impl From<u32> for SeqNumber {
    #[inline]
    fn from(item: u32) -> Self {
        SeqNumber(item)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Advances a sequence number by a number of bytes.
impl Add<u32> for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, nbytes: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(nbytes))
    }
}

impl AddAssign<u32> for SeqNumber {
    #[inline]
    fn add_assign(&mut self, nbytes: u32) {
        self.0 = self.0.wrapping_add(nbytes);
    }
}

/// Number of bytes from `other` up to `self`, modulo 2^32.
impl Sub for SeqNumber {
    type Output = u32;

    #[inline]
    fn sub(self, other: SeqNumber) -> u32 {
        self.0.wrapping_sub(other.0)
    }
}

/// Moves a sequence number back by a number of bytes.
impl Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn sub(self, nbytes: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(nbytes))
    }
}

impl PartialOrd for SeqNumber {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some((self.0.wrapping_sub(other.0) as i32).cmp(&0))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
