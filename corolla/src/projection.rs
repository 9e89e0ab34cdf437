//! The external collaborators §6 describes as thin sugar over [`Cell`]: lifting a record field,
//! a callable member, or an in-place container mutation into its own derived cell.
//!
//! §1 explicitly keeps these out of the reactivity engine's scope — "the type gymnastics used to
//! express the this-proxy in the source are not specified; an implementer may choose any
//! ergonomic binding" — so this module is plain functions and one small proxy type rather than a
//! generated-accessor macro. Their *semantics* (§6) are what's grounded: propagate Pending/Errored
//! from the parent on read, write back through a forced emission on the parent, and (for method
//! projection) re-evaluate whenever any cell argument changes because reading one inside the
//! derived cell's computation records a dependency edge the same way any other read does.

use std::{cell::RefCell, rc::Rc};

use tap::Tap;

use crate::cell::{Cell, Computed};
use crate::Token;
#[cfg(test)]
use crate::subscription::ListenerFn;
use xylem::deep_eq::DeepEq;

/// Lifts a field of a record cell into its own derived, writable cell (§6, "Field-projection
/// collaborator").
///
/// Reads propagate the parent's Pending/Errored state category; a plain-value write swaps the
/// field into a clone of the parent's record (iff the new field value differs by [`DeepEq`]) and
/// forces a `Value` emission on the parent, matching "swap-in-place... then emit a forced `Value`
/// change on the parent".
pub fn field<R, F, E>(
	parent: Cell<R, E>,
	get: impl Fn(&R) -> F + Clone + 'static,
	set: impl Fn(&mut R, F) + 'static,
) -> Cell<F, E>
where
	R: DeepEq + Clone + 'static,
	F: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	let default = get(&parent.read_default());
	let parent_for_compute = parent.clone();
	let get_for_compute = get.clone();
	let parent_for_setter = parent.clone();

	Cell::computed_with_setter(
		move |_resume, _cause| -> Result<Computed<F, E>, E> {
			if let Some(token) = parent_for_compute.read_pending() {
				let get_for_settle = get_for_compute.clone();
				let (our_token, our_resolver) = Token::<F, E>::new();
				let our_resolver = Rc::new(RefCell::new(Some(our_resolver)));
				token.on_settle(move |result| {
					let Some(resolver) = our_resolver.borrow_mut().take() else { return };
					resolver.resolve(result.map(|record| get_for_settle(&record)));
				});
				return Ok(Computed::Pending(our_token));
			}
			if let Some(error) = parent_for_compute.read_error() {
				return match error.into_payload() {
					Some(e) => Ok(Computed::Errored(e)),
					// `CircularDependency` has no payload of type `E`; fall back to the parent's
					// current (default-backed) observed value rather than fabricating one.
					None => Ok(Computed::Value(get_for_compute(&parent_for_compute.read_default()))),
				};
			}
			Ok(Computed::Value(get_for_compute(&parent_for_compute.read_value())))
		},
		default,
		move |new_field| {
			let record = parent_for_setter.read_value();
			if !get(&record).deep_eq(&new_field) {
				let record = record.tap_mut(|record| set(record, new_field));
				let _ = parent_for_setter.write_forced(record);
			}
			Ok(())
		},
	)
}

/// As [`field`], but for a parent whose record may itself be missing (`Cell<Option<R>, E>`): a
/// missing parent reads as `default` without error, and writes against a missing parent are
/// silently absorbed (§6, "Missing intermediate records yield 'missing' without error").
pub fn field_of_optional<R, F, E>(
	parent: Cell<Option<R>, E>,
	get: impl Fn(&R) -> F + Clone + 'static,
	set: impl Fn(&mut R, F) + 'static,
	default: F,
) -> Cell<F, E>
where
	R: DeepEq + Clone + 'static,
	F: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	let parent_for_compute = parent.clone();
	let get_for_compute = get.clone();
	let default_for_compute = default.clone();
	let parent_for_setter = parent.clone();

	Cell::computed_with_setter(
		move |_resume, _cause| -> Result<Computed<F, E>, E> {
			if let Some(token) = parent_for_compute.read_pending() {
				let get_for_settle = get_for_compute.clone();
				let default_for_settle = default_for_compute.clone();
				let (our_token, our_resolver) = Token::<F, E>::new();
				let our_resolver = Rc::new(RefCell::new(Some(our_resolver)));
				token.on_settle(move |result| {
					let Some(resolver) = our_resolver.borrow_mut().take() else { return };
					resolver.resolve(result.map(|record| {
						record
							.as_ref()
							.map(&get_for_settle)
							.unwrap_or_else(|| default_for_settle.clone())
					}));
				});
				return Ok(Computed::Pending(our_token));
			}
			if let Some(error) = parent_for_compute.read_error() {
				return match error.into_payload() {
					Some(e) => Ok(Computed::Errored(e)),
					None => Ok(Computed::Value(default_for_compute.clone())),
				};
			}
			let record = parent_for_compute.read_value();
			Ok(Computed::Value(match &record {
				Some(record) => get_for_compute(record),
				None => default_for_compute.clone(),
			}))
		},
		default,
		move |new_field| {
			let mut record = parent_for_setter.read_value();
			let changed = match record.as_mut() {
				Some(inner) if !get(inner).deep_eq(&new_field) => {
					set(inner, new_field);
					true
				}
				_ => false,
			};
			if changed {
				let _ = parent_for_setter.write_forced(record);
			}
			Ok(())
		},
	)
}

/// One argument to a [method-projected](method0) derived cell: either a plain value, captured at
/// projection time, or a cell, re-read (and therefore re-tracked as a dependency) on every
/// recomputation (§9 Open Question 3: unwrapping happens lazily, per invocation, precisely so the
/// read can register a dependency edge at all).
pub enum MethodArg<A, E> {
	Plain(A),
	Cell(Cell<A, E>),
}

impl<A, E> MethodArg<A, E>
where
	A: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	fn resolve(&self) -> A {
		match self {
			MethodArg::Plain(a) => a.clone(),
			MethodArg::Cell(c) => c.read_value(),
		}
	}
}

impl<A, E> From<A> for MethodArg<A, E> {
	fn from(value: A) -> Self {
		MethodArg::Plain(value)
	}
}

impl<A, E> From<Cell<A, E>> for MethodArg<A, E> {
	fn from(cell: Cell<A, E>) -> Self {
		MethodArg::Cell(cell)
	}
}

macro_rules! impl_method_projection {
	($name:ident $(, $arg:ident : $Arg:ident)*) => {
		/// Method-projection collaborator (§6): a derived cell whose computation reads the parent
		/// value plus each argument (recording a dependency on every [`MethodArg::Cell`] argument)
		/// and invokes `call`. Re-evaluates whenever the parent or any cell argument changes.
		pub fn $name<R, Out, E $(, $Arg)*>(
			parent: Cell<R, E>,
			$($arg: MethodArg<$Arg, E>,)*
			call: impl Fn(&R $(, $Arg)*) -> Out + 'static,
			default: Out,
		) -> Cell<Out, E>
		where
			R: DeepEq + Clone + 'static,
			Out: DeepEq + Clone + 'static,
			E: Clone + PartialEq + 'static,
			$($Arg: DeepEq + Clone + 'static,)*
		{
			Cell::computed(
				move |_resume, _cause| {
					let receiver = parent.read_value();
					$(let $arg = $arg.resolve();)*
					Ok(Computed::Value(call(&receiver $(, $arg)*)))
				},
				default,
			)
		}
	};
}

impl_method_projection!(method0);
impl_method_projection!(method1, a0: A0);
impl_method_projection!(method2, a0: A0, a1: A1);
impl_method_projection!(method3, a0: A0, a1: A1, a2: A2);

/// In-place-mutation collaborator (§6): a proxy over a cell whose value is a mutable container.
/// Method calls forward to a clone of the container; on return (or on resolution of a returned
/// `Pending`), the proxy forces a `Value` emission on the cell without `DeepEq` — a rejected
/// `Pending` emits no change.
pub struct MutProxy<T, E> {
	cell: Cell<T, E>,
}

impl<T, E> MutProxy<T, E>
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	pub fn new(cell: Cell<T, E>) -> Self {
		Self { cell }
	}

	/// Forwards a synchronous mutation to the container, then forces a `Value` change.
	pub fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
		let mut value = self.cell.read_value();
		let out = f(&mut value);
		let _ = self.cell.write_forced(value);
		out
	}

	/// As [`mutate`](Self::mutate), but for a mutation whose completion is asynchronous: `f`
	/// performs the in-place edit and returns the [`Token`] tracking the underlying operation. The
	/// forced `Value` emission happens only once that token resolves successfully; a rejection
	/// emits no change (§6).
	pub fn mutate_async(&self, f: impl FnOnce(&mut T) -> Token<(), E>) {
		let mut value = self.cell.read_value();
		let token = f(&mut value);
		let cell = self.cell.clone();
		token.on_settle(move |result| {
			if result.is_ok() {
				let _ = cell.write_forced(value);
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Clone, PartialEq, Debug)]
	struct Point {
		x: i32,
		y: i32,
	}
	impl xylem::deep_eq::DeepEqViaPartialEq for Point {}

	#[test]
	fn field_reads_and_writes_back() {
		let parent = Cell::<Point, String>::new(Point { x: 1, y: 2 }, Point { x: 0, y: 0 });
		let x = field(parent.clone(), |p| p.x, |p, v| p.x = v);
		assert_eq!(x.read_value(), 1);

		x.write(5).unwrap();
		assert_eq!(parent.read_value(), Point { x: 5, y: 2 });
	}

	#[test]
	fn field_write_same_value_is_noop() {
		let parent = Cell::<Point, String>::new(Point { x: 1, y: 2 }, Point { x: 0, y: 0 });
		let seen = Rc::new(RefCell::new(0));
		{
			let seen = Rc::clone(&seen);
			let listener: Rc<RefCell<ListenerFn<Point, String>>> = Rc::new(RefCell::new(move |_: &Cell<Point, String>, _| {
				*seen.borrow_mut() += 1;
			}));
			parent.subscribe(listener);
		}
		let x = field(parent, |p| p.x, |p, v| p.x = v);
		x.write(1).unwrap();
		assert_eq!(*seen.borrow(), 0);
	}

	#[test]
	fn field_of_optional_missing_yields_default_without_error() {
		let parent = Cell::<Option<Point>, String>::missing();
		let x = field_of_optional(parent.clone(), |p| p.x, |p, v| p.x = v, -1);
		assert_eq!(x.read_value(), -1);
		assert!(x.read_error().is_none());

		x.write(9).unwrap();
		assert!(parent.read_value().is_none(), "write against a missing record is absorbed");
	}

	#[test]
	fn method_projection_tracks_cell_arguments() {
		let parent = Cell::<Point, String>::new(Point { x: 3, y: 4 }, Point { x: 0, y: 0 });
		let scale = Cell::<i32, String>::new(2, 0);
		let scaled_x = method1(
			parent,
			MethodArg::Cell(scale.clone()),
			|p, factor| p.x * factor,
			0,
		);
		assert_eq!(scaled_x.read_value(), 6);
		scale.write(3).unwrap();
		assert_eq!(scaled_x.read_value(), 9);
	}

	#[test]
	fn mut_proxy_forces_change_without_deep_eq() {
		let cell = Cell::<Vec<i32>, String>::new(vec![1, 2], Vec::new());
		let seen = Rc::new(RefCell::new(0));
		{
			let seen = Rc::clone(&seen);
			let listener: Rc<RefCell<ListenerFn<Vec<i32>, String>>> = Rc::new(RefCell::new(move |_: &Cell<Vec<i32>, String>, _| {
				*seen.borrow_mut() += 1;
			}));
			cell.subscribe(listener);
		}
		let proxy = MutProxy::new(cell.clone());
		proxy.mutate(|v| v.push(3));
		assert_eq!(cell.read_value(), vec![1, 2, 3]);
		assert_eq!(*seen.borrow(), 1);
	}
}
