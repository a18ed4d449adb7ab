//! Resource vectors and allocation-increment arithmetic.
//!
//! A [`Resources`] value describes an amount of cluster capacity along two
//! dimensions: memory (in megabytes) and virtual cores. Scheduling never
//! hands out sub-granular amounts: every ask is normalized up to a whole
//! multiple of the cluster's minimum allocation before it enters the
//! request ledger.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An amount of cluster capacity.
///
/// The derived ordering is lexicographic (memory, then vcores) and exists
/// only so request tables iterate deterministically; use [`Resources::fits_in`]
/// for dominance checks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Resources {
    pub memory_mb: u64,
    pub vcores: u32,
}

impl Resources {
    pub const fn new(memory_mb: u64, vcores: u32) -> Self {
        Self { memory_mb, vcores }
    }

    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    pub fn is_zero(&self) -> bool {
        self.memory_mb == 0 && self.vcores == 0
    }

    /// Add another amount in place.
    pub fn add(&mut self, other: Resources) {
        self.memory_mb += other.memory_mb;
        self.vcores += other.vcores;
    }

    /// Subtract another amount in place. Does not go below zero.
    pub fn subtract(&mut self, other: Resources) {
        self.memory_mb = self.memory_mb.saturating_sub(other.memory_mb);
        self.vcores = self.vcores.saturating_sub(other.vcores);
    }

    /// True if `available` covers this amount in every dimension.
    pub fn fits_in(&self, available: Resources) -> bool {
        self.memory_mb <= available.memory_mb && self.vcores <= available.vcores
    }

    /// Round each dimension up to the next whole multiple of `minimum`,
    /// then clamp to `maximum`.
    ///
    /// A zero ask still consumes one full increment: a container grant is
    /// never smaller than the minimum allocation. Normalizing an
    /// already-normalized amount is a no-op.
    pub fn normalized(&self, minimum: Resources, maximum: Resources) -> Resources {
        Resources {
            memory_mb: round_up(self.memory_mb, minimum.memory_mb).min(maximum.memory_mb),
            vcores: round_up(u64::from(self.vcores), u64::from(minimum.vcores))
                .min(u64::from(maximum.vcores)) as u32,
        }
    }
}

fn round_up(value: u64, increment: u64) -> u64 {
    if increment == 0 {
        return value;
    }
    if value == 0 {
        return increment;
    }
    value.div_ceil(increment) * increment
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} MB / {} vcores", self.memory_mb, self.vcores)
    }
}
