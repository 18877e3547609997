use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Per-parameter bit set: bit `i` describes formal parameter `i`, where
/// parameter 0 is the receiver of instance methods.
///
/// Only the first [`ParameterMask::CAPACITY`] parameters are representable.
/// Higher indices are never stored; [`ParameterMask::contains`] answers them
/// conservatively from whether the mask is saturated.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ParameterMask(u64);

impl ParameterMask {
    pub const CAPACITY: usize = 64;
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(u64::MAX);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Signed view, `-1` when every bit is set.
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Single-bit mask for `index`, or `None` past the capacity.
    pub fn bit(index: usize) -> Option<Self> {
        (index < Self::CAPACITY).then(|| Self(1u64 << index))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_all(self) -> bool {
        self.0 == u64::MAX
    }

    pub fn contains(self, index: usize) -> bool {
        match Self::bit(index) {
            Some(bit) => self.0 & bit.0 != 0,
            None => self.is_all(),
        }
    }

    /// Adds `index`; indices past the capacity leave the mask unchanged.
    pub fn with(self, index: usize) -> Self {
        match Self::bit(index) {
            Some(bit) => self | bit,
            None => self,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Set parameter indices in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..Self::CAPACITY).filter(move |index| self.0 & (1u64 << index) != 0)
    }
}

impl BitOr for ParameterMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ParameterMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ParameterMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParameterMask({:#x})", self.0)
    }
}
