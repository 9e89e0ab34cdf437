//! Promise adoption (§4.6): resolving a pending value while discarding late resolutions of
//! superseded tokens.
//!
//! A [`Token`]/[`Resolver`] pair stands in for "an in-flight asynchronous computation" from the
//! host runtime's point of view: the engine hands out a `Token` when a cell enters `Pending`, and
//! whoever is driving the actual asynchronous work (a future, a callback, anything) holds the
//! matching `Resolver` and calls [`Resolver::resolve`] exactly once, whenever it's ready.
//!
//! Resolution is push-based (a settle callback installed with [`Token::on_settle`]) rather than
//! poll-based, so that §4.2's "when p resolves to v, behave as a plain-value write" takes effect
//! immediately rather than only on the pending cell's next read.

use std::{cell::RefCell, rc::Rc};

use crate::error::CellError;

/// Identity of a [`Token`], used by the owning cell to discard resolutions of superseded tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenId(u64);

static NEXT_TOKEN_ID: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

type Settle<T, E> = Rc<RefCell<Option<Box<dyn FnOnce(Result<T, CellError<E>>)>>>>;

/// A handle to an in-flight asynchronous computation.
///
/// Cloning a [`Token`] shares identity: both clones report the same [`TokenId`], but only one
/// [`on_settle`](`Token::on_settle`) callback is ever installed (installing a second one replaces
/// the first, matching "only if still current").
pub struct Token<T, E> {
	id: TokenId,
	settle: Settle<T, E>,
}

impl<T, E> Clone for Token<T, E> {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			settle: Rc::clone(&self.settle),
		}
	}
}

/// The write-once counterpart to a [`Token`]; dropping it without calling
/// [`resolve`](`Resolver::resolve`) leaves the token pending forever (matching "no intrinsic
/// timeouts").
pub struct Resolver<T, E> {
	settle: Settle<T, E>,
}

impl<T, E> Token<T, E> {
	/// Creates a fresh token/resolver pair.
	pub fn new() -> (Self, Resolver<T, E>) {
		let settle = Rc::new(RefCell::new(None));
		(
			Token {
				id: TokenId(NEXT_TOKEN_ID.fetch_add(1, core::sync::atomic::Ordering::Relaxed)),
				settle: Rc::clone(&settle),
			},
			Resolver { settle },
		)
	}

	/// This token's identity.
	pub fn id(&self) -> TokenId {
		self.id
	}

	/// Installs the callback to run when this token settles. Only the most recently installed
	/// callback runs; installing a new one does not invoke a previously-installed one.
	pub fn on_settle(&self, f: impl FnOnce(Result<T, CellError<E>>) + 'static) {
		*self.settle.borrow_mut() = Some(Box::new(f));
	}
}

impl<T, E> Resolver<T, E> {
	/// Resolves the token, running whichever settle callback is currently installed, if any.
	///
	/// Calling this after the owning cell has moved on (superseded this token with another write,
	/// or been dropped) is a no-op: the settle callback will simply not be there to run.
	pub fn resolve(self, value: Result<T, CellError<E>>) {
		if let Some(f) = self.settle.borrow_mut().take() {
			f(value);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;

	#[test]
	fn resolve_runs_installed_callback() {
		let (token, resolver) = Token::<i32, String>::new();
		let seen = Rc::new(Cell::new(None));
		token.on_settle({
			let seen = Rc::clone(&seen);
			move |result| seen.set(result.ok())
		});
		resolver.resolve(Ok(42));
		assert_eq!(seen.get(), Some(42));
	}

	#[test]
	fn resolve_without_settle_callback_is_noop() {
		let (_token, resolver) = Token::<i32, String>::new();
		resolver.resolve(Ok(1)); // must not panic
	}

	#[test]
	fn discarding_a_superseded_token_is_the_settle_callbacks_job() {
		// `Token`/`Resolver` only provide the plumbing; discarding late resolutions of a
		// superseded token (§4.6) is done by the settle callback itself checking identity
		// against the cell's current token, which `corolla::cell` does. Here we just confirm
		// that the callback still observes the resolved value so that check is possible.
		let (token, resolver) = Token::<i32, String>::new();
		let current_token_id = Rc::new(Cell::new(Some(token.id())));
		let seen = Rc::new(Cell::new(false));
		{
			let current_token_id = Rc::clone(&current_token_id);
			let seen = Rc::clone(&seen);
			let this_token_id = token.id();
			token.on_settle(move |_| {
				if current_token_id.get() == Some(this_token_id) {
					seen.set(true);
				}
			});
		}
		current_token_id.set(None); // a newer write superseded this token
		resolver.resolve(Ok(1));
		assert!(!seen.get());
	}
}
