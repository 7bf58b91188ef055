//! Provider capability flags.
//!
//! Providers advertise which optional behaviors they support so callers and
//! the transaction coordinator can adapt rather than fail at first use. The
//! flag set mirrors the `Providers:<name>:Capabilities` config bitmask.

use std::ops::{BitOr, BitOrAssign};

/// A single advertisable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The provider can apply a batch of mutations atomically without a
    /// full two-phase transaction (single-resource fast path).
    BatchAtomic,
    /// The provider supports an efficient key-range scan rather than a
    /// full-collection iteration with client-side filtering.
    RangeScan,
}

/// A bitset of [`Capability`] flags a provider advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    const BATCH_ATOMIC: u8 = 1 << 0;
    const RANGE_SCAN: u8 = 1 << 1;

    /// The empty capability set.
    #[must_use]
    pub fn none() -> Self {
        Self(0)
    }

    /// Returns whether `capability` is present in this set.
    #[must_use]
    pub fn has(self, capability: Capability) -> bool {
        self.0 & Self::bit(capability) != 0
    }

    /// Returns a copy of this set with `capability` added.
    #[must_use]
    pub fn with(self, capability: Capability) -> Self {
        Self(self.0 | Self::bit(capability))
    }

    fn bit(capability: Capability) -> u8 {
        match capability {
            Capability::BatchAtomic => Self::BATCH_ATOMIC,
            Capability::RangeScan => Self::RANGE_SCAN,
        }
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), Capabilities::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_nothing() {
        assert!(!Capabilities::none().has(Capability::BatchAtomic));
    }

    #[test]
    fn with_sets_only_that_bit() {
        let caps = Capabilities::none().with(Capability::RangeScan);
        assert!(caps.has(Capability::RangeScan));
        assert!(!caps.has(Capability::BatchAtomic));
    }

    #[test]
    fn from_iter_combines() {
        let caps: Capabilities = [Capability::BatchAtomic, Capability::RangeScan]
            .into_iter()
            .collect();
        assert!(caps.has(Capability::BatchAtomic));
        assert!(caps.has(Capability::RangeScan));
    }
}
