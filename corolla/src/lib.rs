//! corolla is the typed signal-cell layer built on the [`xylem`] runtime: `Cell<T, E>`, the write
//! protocol (§4.2), the subscription registry wiring (§4.5), and the thin field/method/mutation
//! projection collaborators this crate exposes as convenience on top (§6) — the only parts of the
//! distilled specification that are "external collaborators" rather than engine core.
//!
//! The engine core itself (identity allocation, the dependency-tracking evaluator, the
//! change-propagation scheduler, the subscription-cache bookkeeping, the deep-equality change
//! filter, and the promise-adoption token) lives in `xylem` and is re-exported here for
//! convenience where callers need it (`batch`, `CellError`, `Token`).

pub mod cell;
pub mod projection;
pub mod subscription;

pub use cell::{Cell, Computed, Resume, ResumeGuard};
pub use subscription::{Listener, ListenerFn, Prev};
pub use xylem::{
	deep_eq::DeepEq,
	error::{CellError, WriteRejected},
	runtime::batch,
	token::{Resolver, Token, TokenId},
};
