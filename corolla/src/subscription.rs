//! Per-cell change-listener registry (§4.5).
//!
//! A listener is a `Rc<RefCell<dyn FnMut(&Cell<T, E>, &Prev<T, E>)>>` held either strongly or
//! weakly. Subscribe/unsubscribe compare listeners by the identity of that allocation (pointer
//! equality), matching "idempotent registration" (§4.1) rather than assigning listeners an
//! opaque id a caller would have to keep around.

use std::{cell::RefCell, fmt::Debug, rc::{Rc, Weak}};

use xylem::{error::CellError, runtime};

use crate::cell::Cell;

/// The previous observed value passed to a listener: the Ready value (or last-known value while
/// Pending) it transitioned away from, or the error object it transitioned away from.
#[derive(Debug, Clone)]
pub enum Prev<T, E> {
	Value(T),
	Error(CellError<E>),
}

/// A strongly- or weakly-held change listener, as accepted by [`Registry::subscribe`].
pub type ListenerFn<T, E> = dyn FnMut(&Cell<T, E>, &Prev<T, E>);

/// A registered listener, strong or weak, as installed on a cell.
#[derive(Clone)]
pub enum Listener<T, E> {
	Strong(Rc<RefCell<ListenerFn<T, E>>>),
	Weak(Weak<RefCell<ListenerFn<T, E>>>),
}

impl<T, E> Listener<T, E> {
	fn ptr(&self) -> *const RefCell<ListenerFn<T, E>> {
		match self {
			Listener::Strong(rc) => Rc::as_ptr(rc),
			Listener::Weak(weak) => weak.as_ptr(),
		}
	}

	/// Upgrades to a strong `Rc`, for actually invoking the listener. `None` if this is a dead
	/// weak holder.
	fn upgrade(&self) -> Option<Rc<RefCell<ListenerFn<T, E>>>> {
		match self {
			Listener::Strong(rc) => Some(Rc::clone(rc)),
			Listener::Weak(weak) => weak.upgrade(),
		}
	}
}

/// The per-cell listener list plus the cached "has listeners" bit's dependency: every mutation
/// here bumps the process-wide [`runtime::bump_listener_version`] counter (§4.5).
#[derive(Default)]
pub struct Registry<T, E> {
	entries: Vec<Listener<T, E>>,
}

impl<T, E> Registry<T, E> {
	pub fn new() -> Self {
		Self { entries: Vec::new() }
	}

	/// Drops entries whose weak holder no longer dereferences (§4.5, "weak listener cleanup").
	/// Returns whether anything was actually dropped.
	fn reap(&mut self) -> bool {
		let before = self.entries.len();
		self.entries.retain(|l| l.upgrade().is_some());
		self.entries.len() != before
	}

	/// Registers `listener` unless an equal one (by allocation identity) is already present.
	/// Returns whether a new registration actually happened.
	pub fn subscribe(&mut self, listener: Listener<T, E>) -> bool {
		let reaped = self.reap();
		let new_ptr = listener.ptr();
		let already_present = self.entries.iter().any(|l| l.ptr() == new_ptr);
		if !already_present {
			self.entries.push(listener);
		}
		if reaped || !already_present {
			runtime::bump_listener_version();
		}
		!already_present
	}

	/// Removes at most one registration matching `listener` by allocation identity. No-op if
	/// absent.
	pub fn unsubscribe(&mut self, listener: &Listener<T, E>) {
		let target = listener.ptr();
		let before = self.entries.len();
		if let Some(pos) = self.entries.iter().position(|l| l.ptr() == target) {
			self.entries.remove(pos);
		}
		if self.entries.len() != before || self.reap() {
			runtime::bump_listener_version();
		}
	}

	/// Whether this cell has at least one *live* listener, pruning dead weak holders as a side
	/// effect (§4.5).
	pub fn has_any(&mut self) -> bool {
		self.reap();
		!self.entries.is_empty()
	}

	/// A snapshot of the currently-live, upgraded listeners, in subscription order (§4.4,
	/// "Listener notifications for a given writer are delivered in subscription order").
	pub fn snapshot(&mut self) -> Vec<Rc<RefCell<ListenerFn<T, E>>>> {
		self.reap();
		self.entries.iter().filter_map(Listener::upgrade).collect()
	}
}

/// Invokes every listener in `listeners` with `cell` as the receiver and `prev` as the previous
/// observed value, in order. A listener that panics is caught and reported to the diagnostic sink
/// (§4.4, "A listener that throws is caught and reported... flush continues"); the remaining
/// listeners in this round still run.
pub fn notify_all<T, E>(
	cell: &Cell<T, E>,
	listeners: Vec<Rc<RefCell<ListenerFn<T, E>>>>,
	prev: &Prev<T, E>,
) where
	T: 'static,
	E: 'static,
{
	for listener in listeners {
		let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
			(listener.borrow_mut())(cell, prev);
		}));
		if let Err(payload) = outcome {
			let message = panic_message(&payload);
			runtime::report_diagnostic(&message);
		}
	}
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"listener panicked with a non-string payload".to_string()
	}
}
