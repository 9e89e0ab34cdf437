//! xylem is the low-level signals runtime framework backing corolla.
//!
//! It owns everything that doesn't need to know the concrete value type of a cell: identity
//! allocation, the dependency-tracking evaluator, the change-propagation scheduler, the
//! subscription-cache bookkeeping, the deep-equality change filter, and the promise-adoption
//! token used to resolve asynchronous computations.
//!
//! `corolla` builds the user-facing `Cell<T>` type on top of the [`runtime`] module's
//! [`ErasedCell`](`runtime::ErasedCell`) trait object graph.

pub mod deep_eq;
pub mod error;
pub mod id;
pub mod runtime;
pub mod token;
