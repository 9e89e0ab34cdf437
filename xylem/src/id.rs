//! Signal identity and observation-mode bitflags.

use core::{
	num::NonZeroU64,
	sync::atomic::{AtomicU64, Ordering},
};

/// Stable unique identity assigned to a cell at construction.
///
/// Identities are monotonically increasing and never reused, which is what lets
/// [`ObservationMode`]-tagged edges and the circular-dependency DFS (see
/// [`runtime`](`crate::runtime`)) use plain integer comparisons instead of pointer chasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(NonZeroU64);

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

impl Id {
	/// Allocates a fresh, process-wide unique [`Id`].
	pub fn next() -> Self {
		Id(
			(NEXT_ID.fetch_add(1, Ordering::Relaxed) + 1)
				.try_into()
				.expect("infallible within reasonable time"),
		)
	}

	/// The raw numeric value, useful for logging and cache keys.
	pub fn as_u64(self) -> u64 {
		self.0.get()
	}
}

/// The subset of {Value, Pending, Error} that a dependent observed of a source.
///
/// Stored on every outgoing/incoming edge. A change is itself classified the same way; only
/// dependents whose stored mode intersects the change's mode are marked stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObservationMode(u8);

impl ObservationMode {
	pub const NONE: ObservationMode = ObservationMode(0);
	pub const VALUE: ObservationMode = ObservationMode(0b001);
	pub const PENDING: ObservationMode = ObservationMode(0b010);
	pub const ERROR: ObservationMode = ObservationMode(0b100);

	pub const fn union(self, other: ObservationMode) -> ObservationMode {
		ObservationMode(self.0 | other.0)
	}

	pub const fn intersects(self, other: ObservationMode) -> bool {
		self.0 & other.0 != 0
	}

	pub const fn is_none(self) -> bool {
		self.0 == 0
	}
}

impl core::ops::BitOr for ObservationMode {
	type Output = ObservationMode;

	fn bitor(self, rhs: ObservationMode) -> ObservationMode {
		self.union(rhs)
	}
}

impl core::ops::BitOrAssign for ObservationMode {
	fn bitor_assign(&mut self, rhs: ObservationMode) {
		*self = self.union(rhs);
	}
}
