//! Typed flag sets
//!
//! A [`FlagSet`] is a small set of enumerated flags with set operations.
//! Membership is tracked per declared flag, so call sites only ever deal
//! with named variants.

use std::fmt;
use std::marker::PhantomData;

/// Maximum number of variants a [`Flag`] enum may declare
pub const MAX_FLAGS: usize = u64::BITS as usize;

/// An enumerated flag that can be stored in a [`FlagSet`]
pub trait Flag: Copy + Eq + fmt::Debug + 'static {
    /// Every variant, in declaration order (at most [`MAX_FLAGS`])
    const ALL: &'static [Self];

    /// Position of this flag in [`Flag::ALL`], `None` if it is not listed
    fn slot(self) -> Option<usize> {
        Self::ALL.iter().position(|f| *f == self)
    }
}

/// Compile-time check that `F::ALL` fits in a [`FlagSet`]
struct Capacity<F>(PhantomData<F>);

impl<F: Flag> Capacity<F> {
    const OK: () = assert!(F::ALL.len() <= MAX_FLAGS, "Flag::ALL declares too many variants");
}

/// A set of flags of one kind
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FlagSet<F: Flag> {
    bits: u64,
    _flag: PhantomData<F>,
}

impl<F: Flag> FlagSet<F> {
    /// The empty set
    pub const fn empty() -> Self {
        let () = Capacity::<F>::OK;
        Self {
            bits: 0,
            _flag: PhantomData,
        }
    }

    /// A set containing exactly the given flags
    pub fn of(flags: &[F]) -> Self {
        flags.iter().copied().collect()
    }

    fn mask(flag: F) -> u64 {
        flag.slot().map_or(0, |slot| 1u64 << slot)
    }

    /// Add a flag. Returns `true` if it was not already present.
    ///
    /// A flag missing from [`Flag::ALL`] is never stored.
    pub fn insert(&mut self, flag: F) -> bool {
        let mask = Self::mask(flag);
        let added = mask != 0 && self.bits & mask == 0;
        self.bits |= mask;
        added
    }

    /// Remove a flag. Returns `true` if it was present.
    pub fn remove(&mut self, flag: F) -> bool {
        let mask = Self::mask(flag);
        let removed = self.bits & mask != 0;
        self.bits &= !mask;
        removed
    }

    /// Check whether a flag is present
    pub fn contains(&self, flag: F) -> bool {
        self.bits & Self::mask(flag) != 0
    }

    /// Union of two sets
    pub fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
            _flag: PhantomData,
        }
    }

    /// Flags present in `self` but not in `other`
    pub fn difference(self, other: Self) -> Self {
        Self {
            bits: self.bits & !other.bits,
            _flag: PhantomData,
        }
    }

    /// Check whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Number of flags in the set
    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Remove every flag
    pub fn clear(&mut self) {
        self.bits = 0;
    }

    /// Iterate the flags in declaration order
    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        F::ALL
            .iter()
            .enumerate()
            .filter(move |(slot, _)| self.bits & (1u64 << *slot) != 0)
            .map(|(_, f)| *f)
    }
}

impl<F: Flag> Default for FlagSet<F> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<F: Flag> From<F> for FlagSet<F> {
    fn from(flag: F) -> Self {
        let mut set = Self::empty();
        set.insert(flag);
        set
    }
}

impl<F: Flag> FromIterator<F> for FlagSet<F> {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut set = Self::empty();
        for flag in iter {
            set.insert(flag);
        }
        set
    }
}

impl<F: Flag> fmt::Debug for FlagSet<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
