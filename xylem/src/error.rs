//! Error kinds produced by the reactivity engine (§7 of the specification).
//!
//! `CellError<E>` is generic over the user-supplied error payload type `E` so that
//! application-level failures (a computation's `Err`, a setter's `Err`, a rejected promise) keep
//! their original type instead of being boxed into a trait object, while the engine's own
//! failure kinds (`CircularDependency`, `WriteRejected`) carry none.

use std::fmt::Debug;

use crate::deep_eq::DeepEqViaPartialEq;

/// An error that can be carried by an `Errored` cell, or returned from an operation that rejects
/// immediately (`WriteRejected`).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CellError<E> {
	/// A computation's closure panicked/raised; the cell transitions to `Errored` carrying this.
	#[error("computation threw: {0:?}")]
	ComputationThrew(E),

	/// A computation synchronously returned an error value instead of a value or pending token.
	#[error("computation returned an error: {0:?}")]
	ComputationReturnedError(E),

	/// The pending token this cell was waiting on resolved to an error.
	#[error("promise rejected: {0:?}")]
	PromiseRejected(E),

	/// A read during recomputation would have created a cycle in the source graph.
	#[error("circular dependency detected")]
	CircularDependency,

	/// A setter closure panicked/raised.
	#[error("setter threw: {0:?}")]
	SetterThrew(E),
}

impl<E> CellError<E> {
	/// Whether this and `other` should be considered the "same error" for the purposes of the
	/// write protocol's "same-type/same-message errors do not re-emit `Error`" rule.
	pub fn same_kind_as(&self, other: &Self) -> bool
	where
		E: PartialEq,
	{
		match (self, other) {
			(Self::ComputationThrew(a), Self::ComputationThrew(b)) => a == b,
			(Self::ComputationReturnedError(a), Self::ComputationReturnedError(b)) => a == b,
			(Self::PromiseRejected(a), Self::PromiseRejected(b)) => a == b,
			(Self::SetterThrew(a), Self::SetterThrew(b)) => a == b,
			(Self::CircularDependency, Self::CircularDependency) => true,
			_ => false,
		}
	}

	/// The user payload carried by this error, if any. `CircularDependency` carries none.
	pub fn into_payload(self) -> Option<E> {
		match self {
			Self::ComputationThrew(e)
			| Self::ComputationReturnedError(e)
			| Self::PromiseRejected(e)
			| Self::SetterThrew(e) => Some(e),
			Self::CircularDependency => None,
		}
	}
}

impl<E: PartialEq> DeepEqViaPartialEq for CellError<E> {}

/// Raised synchronously to the caller of `write` (never absorbed into a cell's `Errored` state).
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRejected {
	/// Attempted to assign a computation to a cell that has a setter installed.
	#[error("cannot overwrite the computation of a cell that has a setter installed")]
	ComputedCellHasSetter,
}
