//! The signal cell (§3, §4.1, §4.2, §4.3): identity, value slot, edges, listeners, and the
//! optional computation/setter/canceller triple that makes a cell Static, Computed, or
//! "pull-computed, push-settable".

use std::{
	cell::RefCell,
	collections::HashMap,
	panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
	rc::{Rc, Weak},
};

use xylem::{
	deep_eq::DeepEq,
	error::{CellError, WriteRejected},
	id::{Id, ObservationMode},
	runtime::{self, ErasedCell, OutgoingEdge},
	token::{Token, TokenId},
};

use crate::subscription::{Listener, ListenerFn, Prev, Registry};

type ComputationFn<T, E> = dyn FnMut(Resume<T, E>, Option<Id>) -> Result<Computed<T, E>, E>;
type SetterFn<T, E> = dyn FnMut(T) -> Result<(), E>;
type CancellerFn<E> = dyn FnMut(TokenId);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Freshness {
	Fresh,
	Stale,
	Computing,
}

/// The mutually-exclusive value states of a cell (§3, "Value slot").
enum ValueSlot<T, E> {
	Ready(T),
	Pending { token: Token<T, E>, last: T },
	Errored { error: CellError<E>, last: T },
}

/// What a computation may produce (§9 Design Notes): a plain value, an in-flight asynchronous
/// result, an error object, or another cell whose state this one adopts.
pub enum Computed<T, E> {
	Value(T),
	Pending(Token<T, E>),
	Errored(E),
	Cell(Cell<T, E>),
}

struct CellInner<T, E> {
	id: Id,
	self_weak: Weak<RefCell<CellInner<T, E>>>,
	freshness: Freshness,
	slot: ValueSlot<T, E>,
	default: T,
	outgoing: Vec<OutgoingEdge>,
	cursor: usize,
	incoming: HashMap<Id, (Weak<dyn ErasedCell>, ObservationMode)>,
	listeners: Registry<T, E>,
	listener_cache: Option<(bool, u64)>,
	computation: Option<Box<ComputationFn<T, E>>>,
	setter: Option<Box<SetterFn<T, E>>>,
	canceller: Option<Box<CancellerFn<E>>>,
}

/// A reactive value holder (§3). Cloning shares the same underlying cell (reference-counted, not
/// a deep copy) — this is the handle type consumers pass around.
pub struct Cell<T: 'static, E: 'static = ()> {
	inner: Rc<RefCell<CellInner<T, E>>>,
}

impl<T, E> Clone for Cell<T, E> {
	fn clone(&self) -> Self {
		Self { inner: Rc::clone(&self.inner) }
	}
}

/// The capability handed to a computation for re-entering dependency tracking after it has
/// returned a `Pending` token (§4.3, "Async re-tracking"). Idempotent: calling `resume` again
/// while a previously returned guard is still alive is a no-op.
pub struct Resume<T, E> {
	cell: Weak<RefCell<CellInner<T, E>>>,
	active: Rc<std::cell::Cell<bool>>,
}

impl<T, E> Clone for Resume<T, E> {
	fn clone(&self) -> Self {
		Self { cell: self.cell.clone(), active: Rc::clone(&self.active) }
	}
}

impl<T, E> Resume<T, E>
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	/// Re-installs this cell as the current evaluation context for the duration of the returned
	/// guard. Reads performed while the guard is alive are recorded as fresh outgoing edges; the
	/// guard's `Drop` is the tick boundary that restores the prior context (§9 Design Notes).
	pub fn resume(&self) -> ResumeGuard {
		if self.active.get() {
			return ResumeGuard { active: None };
		}
		let Some(cell) = self.cell.upgrade() else {
			return ResumeGuard { active: None };
		};
		self.active.set(true);
		let erased: Rc<dyn ErasedCell> = cell as Rc<dyn ErasedCell>;
		runtime::push_context(erased);
		ResumeGuard { active: Some(Rc::clone(&self.active)) }
	}
}

/// The RAII tick boundary returned by [`Resume::resume`]. Dropping it restores the evaluation
/// context that was active before `resume` was called.
pub struct ResumeGuard {
	active: Option<Rc<std::cell::Cell<bool>>>,
}

impl Drop for ResumeGuard {
	fn drop(&mut self) {
		if let Some(active) = self.active.take() {
			runtime::pop_context();
			active.set(false);
		}
	}
}

fn snapshot_prev<T: Clone, E: Clone>(slot: &ValueSlot<T, E>) -> Prev<T, E> {
	match slot {
		ValueSlot::Ready(v) => Prev::Value(v.clone()),
		ValueSlot::Pending { last, .. } => Prev::Value(last.clone()),
		ValueSlot::Errored { error, .. } => Prev::Error(error.clone()),
	}
}

/// The most recent Ready value this cell has held, tracked internally across transitions
/// regardless of the current slot (so a future Pending/Errored can still carry it forward as
/// `last`). Not the same as the *observed* value (see [`observed_value`]): in Errored, the
/// observed value is always `default` (§3), not this.
fn current_last<T: Clone, E>(slot: &ValueSlot<T, E>) -> T {
	match slot {
		ValueSlot::Ready(v) => v.clone(),
		ValueSlot::Pending { last, .. } => last.clone(),
		ValueSlot::Errored { last, .. } => last.clone(),
	}
}

/// The value a read-value call observes right now (§3, "the observed value"): `v` in Ready,
/// `default` in Errored (regardless of any prior Ready value), and the last Ready value (or
/// `default` if there never was one) in Pending.
fn observed_value<T: Clone, E>(slot: &ValueSlot<T, E>, default: &T) -> T {
	match slot {
		ValueSlot::Errored { .. } => default.clone(),
		_ => current_last(slot),
	}
}

enum Transition<T, E> {
	Value(T),
	Errored(CellError<E>),
}

/// Applies a plain-value or error self-write to `cell`, classifying the change per §4.2 and
/// notifying dependents/listeners if anything actually changed. Shared by `write`, token
/// settlement, and `recompute`'s own self-write step.
fn apply_transition<T, E>(cell: &Rc<RefCell<CellInner<T, E>>>, new: Transition<T, E>, force: bool)
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	let (mode, prev) = {
		let mut inner = cell.borrow_mut();
		let prev = snapshot_prev(&inner.slot);
		let was_pending = matches!(inner.slot, ValueSlot::Pending { .. });
		let was_errored = matches!(inner.slot, ValueSlot::Errored { .. });
		let was_ready = matches!(inner.slot, ValueSlot::Ready(_));

		let mut mode = ObservationMode::NONE;
		match new {
			Transition::Value(v) => {
				let current_observed = observed_value(&inner.slot, &inner.default);
				if force || !v.deep_eq(&current_observed) {
					mode |= ObservationMode::VALUE;
				}
				if was_pending {
					mode |= ObservationMode::PENDING;
				}
				if was_errored {
					mode |= ObservationMode::ERROR;
				}
				inner.slot = ValueSlot::Ready(v);
			}
			Transition::Errored(err) => {
				let same_kind = match &inner.slot {
					ValueSlot::Errored { error, .. } => error.same_kind_as(&err),
					_ => false,
				};
				if !same_kind {
					mode |= ObservationMode::ERROR;
				}
				if was_ready {
					mode |= ObservationMode::VALUE;
				}
				if was_pending {
					mode |= ObservationMode::PENDING;
				}
				let last = current_last(&inner.slot);
				inner.slot = ValueSlot::Errored { error: err, last };
			}
		}
		(mode, prev)
	};

	if mode.is_none() {
		return;
	}
	emit_change(cell, mode, prev);
}

/// Propagates a change mode to dependents and queues listener notifications (§4.4 "On a write
/// that emits a change mode M").
///
/// Wrapped in an implicit batch: `propagate_change` marks and enqueues this write's dependents one
/// incoming edge at a time, and each enqueue would otherwise flush immediately (outside a batch),
/// recomputing a diamond-shared descendant before its *other* still-Fresh parent has even been
/// marked Stale. Holding the batch open until every dependent of this one change is enqueued keeps
/// "all downstream recomputations complete before any listener is invoked" (§4.4) true per write.
fn emit_change<T, E>(cell: &Rc<RefCell<CellInner<T, E>>>, mode: ObservationMode, prev: Prev<T, E>)
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	runtime::batch(move || {
		let erased: Rc<dyn ErasedCell> = Rc::clone(cell) as Rc<dyn ErasedCell>;
		runtime::propagate_change(&erased, mode);

		let (id, listeners) = {
			let mut inner = cell.borrow_mut();
			(inner.id, inner.listeners.snapshot())
		};
		if listeners.is_empty() {
			return;
		}
		let cell_for_notify = Cell { inner: Rc::clone(cell) };
		runtime::enqueue_notify(
			id,
			Box::new(move || {
				crate::subscription::notify_all(&cell_for_notify, listeners, &prev);
			}),
		);
	});
}

/// Transitions `cell` to Pending, installing a settle callback on `token` that discards the
/// resolution unless `token` is still the cell's current one (§4.6, §8 "Promise resolution
/// arriving after a superseding write does not alter state").
fn set_pending<T, E>(cell: &Rc<RefCell<CellInner<T, E>>>, token: Token<T, E>)
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	set_pending_impl(cell, token, false)
}

/// As [`set_pending`], but `already_cancelled` skips invoking the canceller for the Pending this
/// call supersedes. `recompute`'s own step 3 (§4.3) already invokes the canceller for whatever
/// token `cell` was Pending on *before* the computation ran, unconditional on what the computation
/// returns; when that computation's result is itself routed back through this function (directly,
/// or via [`adopt_cell`]), the old-token-cancel below must not fire a second time for the same
/// supersession (§4.6: the old canceller runs exactly once per superseded token).
fn set_pending_impl<T, E>(cell: &Rc<RefCell<CellInner<T, E>>>, token: Token<T, E>, already_cancelled: bool)
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	let (mode, prev, old_token) = {
		let mut inner = cell.borrow_mut();
		let prev = snapshot_prev(&inner.slot);
		let was_ready = matches!(inner.slot, ValueSlot::Ready(_));
		let was_errored = matches!(inner.slot, ValueSlot::Errored { .. });
		let last = current_last(&inner.slot);

		let mut mode = ObservationMode::PENDING;
		if was_ready {
			mode |= ObservationMode::VALUE;
		}
		if was_errored {
			mode |= ObservationMode::ERROR;
		}

		let old_token = match &inner.slot {
			ValueSlot::Pending { token, .. } => Some(token.clone()),
			_ => None,
		};
		inner.slot = ValueSlot::Pending { token: token.clone(), last };
		(mode, prev, old_token)
	};

	// §4.6: replacing a Pending with another Pending invokes the *old* canceller with the old
	// token before installing the new one.
	if !already_cancelled {
		if let Some(old) = old_token {
			let mut inner = cell.borrow_mut();
			if let Some(canceller) = inner.canceller.as_mut() {
				canceller(old.id());
			}
		}
	}

	let weak_cell = Rc::downgrade(cell);
	let expected = token.id();
	token.on_settle(move |result| {
		let Some(cell) = weak_cell.upgrade() else {
			return;
		};
		let still_current = matches!(
			&cell.borrow().slot,
			ValueSlot::Pending { token, .. } if token.id() == expected
		);
		if !still_current {
			return;
		}
		match result {
			Ok(v) => apply_transition(&cell, Transition::Value(v), false),
			Err(e) => apply_transition(&cell, Transition::Errored(e), false),
		}
	});

	emit_change(cell, mode, prev);
}

enum AdoptedSnapshot<T, E> {
	Ready(T),
	Errored(CellError<E>),
	Pending(T),
}

/// Adopts `other`'s state into `cell` (§4.3, "Returning another cell D"; §9 Open Question 1:
/// adopts a single snapshot of `other`, not its future states). `already_cancelled` is forwarded
/// to [`set_pending_impl`] for the same reason [`recompute`] threads it through the
/// `Computed::Pending` arm: this is always called from `recompute`'s own outcome handling, so its
/// step 3 has already cancelled whatever `cell` was Pending on before the computation ran.
fn adopt_cell<T, E>(cell: &Rc<RefCell<CellInner<T, E>>>, other: Cell<T, E>, already_cancelled: bool)
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	let snapshot = {
		let inner = other.inner.borrow();
		match &inner.slot {
			ValueSlot::Ready(v) => AdoptedSnapshot::Ready(v.clone()),
			ValueSlot::Errored { error, .. } => AdoptedSnapshot::Errored(error.clone()),
			ValueSlot::Pending { last, .. } => AdoptedSnapshot::Pending(last.clone()),
		}
	};
	match snapshot {
		AdoptedSnapshot::Ready(v) => apply_transition(cell, Transition::Value(v), false),
		AdoptedSnapshot::Errored(e) => apply_transition(cell, Transition::Errored(e), false),
		AdoptedSnapshot::Pending(_last) => {
			let (token, resolver) = Token::<T, E>::new();
			let resolver = Rc::new(RefCell::new(Some(resolver)));
			let listener: Rc<RefCell<ListenerFn<T, E>>> = Rc::new(RefCell::new({
				let resolver = Rc::clone(&resolver);
				move |_cell: &Cell<T, E>, observed: &Prev<T, E>| {
					if let Some(resolver) = resolver.borrow_mut().take() {
						match observed {
							Prev::Value(v) => resolver.resolve(Ok(v.clone())),
							Prev::Error(e) => resolver.resolve(Err(e.clone())),
						}
					}
				}
			}));
			other.inner.borrow_mut().listeners.subscribe(Listener::Strong(listener));
			set_pending_impl(cell, token, already_cancelled);
		}
	}
}

struct CircularDependencyAbort;

/// Records a tracked read of `cell` by whichever cell is the current evaluation context, aborting
/// the current computation via [`CircularDependencyAbort`] if it would close a cycle (§4.3, edge
/// reuse protocol).
fn track<T, E>(cell: &Rc<RefCell<CellInner<T, E>>>, mode: ObservationMode)
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	let erased: Rc<dyn ErasedCell> = Rc::clone(cell) as Rc<dyn ErasedCell>;
	if runtime::track_read(erased, mode).is_err() {
		if let Some(dependent) = runtime::current_dependent() {
			dependent.mark_circular_error();
		}
		std::panic::panic_any(CircularDependencyAbort);
	}
}

fn force_fresh<T, E>(cell: &Rc<RefCell<CellInner<T, E>>>)
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	let erased: Rc<dyn ErasedCell> = Rc::clone(cell) as Rc<dyn ErasedCell>;
	erased.recompute_if_stale();
}

/// Runs `cell`'s computation (§4.3 `Recompute(C)`). No-op if `cell` is not currently Stale.
fn recompute<T, E>(cell: &Rc<RefCell<CellInner<T, E>>>, cause: Option<Id>)
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	// Step 3 (§4.3): if `cell` was Pending, its canceller runs here, before the computation is
	// even invoked, unconditional on what that computation goes on to return. When the outcome
	// below is itself a new Pending (directly, or via `adopt_cell`), that must not cancel the same
	// old token a second time — `cancelled_prior_pending` carries this step's result forward so
	// `set_pending`'s own old-token-cancel can skip it.
	let cancelled_prior_pending;
	{
		let mut inner = cell.borrow_mut();
		if inner.freshness != Freshness::Stale {
			return;
		}
		cancelled_prior_pending = if let ValueSlot::Pending { token, .. } = &inner.slot {
			let id = token.id();
			if let Some(canceller) = inner.canceller.as_mut() {
				canceller(id);
			}
			true
		} else {
			false
		};
		inner.freshness = Freshness::Computing;
		inner.cursor = 0;
	}

	let active = Rc::new(std::cell::Cell::new(false));
	let resume = Resume { cell: Rc::downgrade(cell), active };

	let erased: Rc<dyn ErasedCell> = Rc::clone(cell) as Rc<dyn ErasedCell>;
	runtime::push_context(erased);
	let mut computation = cell.borrow_mut().computation.take();
	let outcome = catch_unwind(AssertUnwindSafe(|| {
		computation
			.as_mut()
			.expect("recompute is only called on cells with a computation")(resume, cause)
	}));
	cell.borrow_mut().computation = computation;
	runtime::pop_context();

	let keep_len = cell.borrow().cursor;
	{
		let id = cell.borrow().id;
		let mut inner = cell.borrow_mut();
		runtime::prune_edges_after(id, &mut inner.outgoing, keep_len);
	}

	match outcome {
		Ok(Ok(Computed::Value(v))) => apply_transition(cell, Transition::Value(v), false),
		Ok(Ok(Computed::Errored(e))) => {
			apply_transition(cell, Transition::Errored(CellError::ComputationReturnedError(e)), false)
		}
		Ok(Ok(Computed::Pending(token))) => set_pending_impl(cell, token, cancelled_prior_pending),
		Ok(Ok(Computed::Cell(other))) => adopt_cell(cell, other, cancelled_prior_pending),
		Ok(Err(e)) => apply_transition(cell, Transition::Errored(CellError::ComputationThrew(e)), false),
		Err(payload) => {
			if payload.downcast_ref::<CircularDependencyAbort>().is_none() {
				// A genuine programmer panic, not the engine's own circular-dependency abort:
				// restore the freshness invariant, then keep unwinding rather than absorb it
				// into cell state (matches the teacher's catch_unwind/resume_unwind convention).
				cell.borrow_mut().freshness = Freshness::Fresh;
				resume_unwind(payload);
			}
			// `mark_circular_error` already transitioned this cell to Errored from inside the
			// offending read; nothing left to do here but restore Fresh below.
		}
	}

	cell.borrow_mut().freshness = Freshness::Fresh;
}

fn install_computation_and_maybe_recompute<T, E>(cell: &Rc<RefCell<CellInner<T, E>>>)
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	cell.borrow_mut().freshness = Freshness::Stale;
	let has_listeners = {
		let erased: Rc<dyn ErasedCell> = Rc::clone(cell) as Rc<dyn ErasedCell>;
		runtime::has_listeners_positive(&erased)
	};
	if has_listeners {
		recompute(cell, None);
	}
}

impl<T, E> ErasedCell for RefCell<CellInner<T, E>>
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	fn id(&self) -> Id {
		self.borrow().id
	}

	fn is_computing(&self) -> bool {
		self.borrow().freshness == Freshness::Computing
	}

	fn mark_stale(&self) -> bool {
		let mut inner = self.borrow_mut();
		if inner.computation.is_none() {
			return false;
		}
		if inner.freshness == Freshness::Fresh {
			inner.freshness = Freshness::Stale;
			true
		} else {
			false
		}
	}

	fn recompute_if_stale(&self) {
		let is_stale = self.borrow().freshness == Freshness::Stale;
		if !is_stale {
			return;
		}
		let cell = self
			.borrow()
			.self_weak
			.upgrade()
			.expect("a cell recomputes only while it is itself still alive");
		recompute(&cell, None);
	}

	fn has_own_listeners(&self) -> bool {
		self.borrow_mut().listeners.has_any()
	}

	fn incoming_dependents(&self) -> Vec<(Weak<dyn ErasedCell>, ObservationMode)> {
		let mut inner = self.borrow_mut();
		inner.incoming.retain(|_, (weak, _)| weak.upgrade().is_some());
		inner.incoming.values().cloned().collect()
	}

	fn remove_incoming(&self, dependent: Id) {
		self.borrow_mut().incoming.remove(&dependent);
	}

	fn add_incoming(&self, dependent: Id, dependent_weak: Weak<dyn ErasedCell>, mode: ObservationMode) {
		let mut inner = self.borrow_mut();
		inner
			.incoming
			.entry(dependent)
			.and_modify(|existing| existing.1 |= mode)
			.or_insert((dependent_weak, mode));
	}

	fn listener_cache(&self) -> Option<(bool, u64)> {
		self.borrow().listener_cache
	}

	fn set_listener_cache(&self, value: (bool, u64)) {
		self.borrow_mut().listener_cache = Some(value);
	}

	fn outgoing_for_cycle_check(&self) -> Vec<Rc<dyn ErasedCell>> {
		self.borrow().outgoing.iter().map(|edge| Rc::clone(&edge.target)).collect()
	}

	fn with_outgoing_mut(&self, f: &mut dyn FnMut(&mut Vec<OutgoingEdge>, &mut usize)) {
		let mut inner = self.borrow_mut();
		f(&mut inner.outgoing, &mut inner.cursor);
	}

	fn mark_circular_error(&self) {
		let cell = self
			.borrow()
			.self_weak
			.upgrade()
			.expect("a cell can only be the current evaluation context while alive");
		apply_transition(&cell, Transition::Errored(CellError::CircularDependency), false);
	}
}

impl<T, E> Cell<T, E>
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	fn from_inner(inner: CellInner<T, E>) -> Self {
		let inner = Rc::new_cyclic(|weak| {
			let mut inner = inner;
			inner.self_weak = weak.clone();
			RefCell::new(inner)
		});
		Cell { inner }
	}

	fn blank(default: T, slot: ValueSlot<T, E>, freshness: Freshness) -> Self {
		Self::from_inner(CellInner {
			id: Id::next(),
			self_weak: Weak::new(),
			freshness,
			slot,
			default,
			outgoing: Vec::new(),
			cursor: 0,
			incoming: HashMap::new(),
			listeners: Registry::new(),
			listener_cache: None,
			computation: None,
			setter: None,
			canceller: None,
		})
	}

	/// `make(value, default)`: a Static cell.
	pub fn new(value: T, default: T) -> Self {
		Self::blank(default, ValueSlot::Ready(value), Freshness::Fresh)
	}

	/// `make(pending, default)`: a Static cell that starts Pending on `token`.
	pub fn pending(token: Token<T, E>, default: T) -> Self {
		let cell = Self::blank(default.clone(), ValueSlot::Pending { token: token.clone(), last: default }, Freshness::Fresh);
		let weak_cell = Rc::downgrade(&cell.inner);
		let expected = token.id();
		token.on_settle(move |result| {
			let Some(cell) = weak_cell.upgrade() else { return };
			let still_current = matches!(
				&cell.borrow().slot,
				ValueSlot::Pending { token, .. } if token.id() == expected
			);
			if !still_current {
				return;
			}
			match result {
				Ok(v) => apply_transition(&cell, Transition::Value(v), false),
				Err(e) => apply_transition(&cell, Transition::Errored(e), false),
			}
		});
		cell
	}

	/// `make(error, default)`: a Static cell that starts Errored.
	pub fn errored(error: CellError<E>, default: T) -> Self {
		Self::blank(default.clone(), ValueSlot::Errored { error, last: default }, Freshness::Fresh)
	}

	/// `make(computation, default)`: a Computed cell with no setter or canceller.
	pub fn computed(
		computation: impl FnMut(Resume<T, E>, Option<Id>) -> Result<Computed<T, E>, E> + 'static,
		default: T,
	) -> Self {
		// Computed cells start Stale and never observe this "Ready" slot until the first
		// recompute; seeding it with `default` (rather than requiring `T: Default`) is enough.
		let cell = Self::blank(default.clone(), ValueSlot::Ready(default), Freshness::Stale);
		cell.inner.borrow_mut().computation = Some(Box::new(computation));
		cell
	}

	/// `make(computation, default, setter)`.
	pub fn computed_with_setter(
		computation: impl FnMut(Resume<T, E>, Option<Id>) -> Result<Computed<T, E>, E> + 'static,
		default: T,
		setter: impl FnMut(T) -> Result<(), E> + 'static,
	) -> Self {
		let cell = Self::computed(computation, default);
		cell.inner.borrow_mut().setter = Some(Box::new(setter));
		cell
	}

	/// `make(computation, default, canceller)`.
	pub fn computed_with_canceller(
		computation: impl FnMut(Resume<T, E>, Option<Id>) -> Result<Computed<T, E>, E> + 'static,
		default: T,
		canceller: impl FnMut(TokenId) + 'static,
	) -> Self {
		let cell = Self::computed(computation, default);
		cell.inner.borrow_mut().canceller = Some(Box::new(canceller));
		cell
	}

	/// `make(computation, default, setter, canceller)`.
	pub fn computed_full(
		computation: impl FnMut(Resume<T, E>, Option<Id>) -> Result<Computed<T, E>, E> + 'static,
		default: T,
		setter: impl FnMut(T) -> Result<(), E> + 'static,
		canceller: impl FnMut(TokenId) + 'static,
	) -> Self {
		let cell = Self::computed(computation, default);
		{
			let mut inner = cell.inner.borrow_mut();
			inner.setter = Some(Box::new(setter));
			inner.canceller = Some(Box::new(canceller));
		}
		cell
	}

	/// `make(other_cell, default)`: equivalent to `make(() => other_cell)` (§6).
	pub fn from_cell(other: Cell<T, E>, default: T) -> Self {
		Cell::computed(move |_resume, _cause| Ok(Computed::Cell(other.clone())), default)
	}

	pub fn read_value(&self) -> T {
		force_fresh(&self.inner);
		track(&self.inner, ObservationMode::VALUE);
		let inner = self.inner.borrow();
		observed_value(&inner.slot, &inner.default)
	}

	pub fn read_pending(&self) -> Option<Token<T, E>> {
		force_fresh(&self.inner);
		track(&self.inner, ObservationMode::PENDING);
		match &self.inner.borrow().slot {
			ValueSlot::Pending { token, .. } => Some(token.clone()),
			_ => None,
		}
	}

	pub fn read_error(&self) -> Option<CellError<E>> {
		force_fresh(&self.inner);
		track(&self.inner, ObservationMode::ERROR);
		match &self.inner.borrow().slot {
			ValueSlot::Errored { error, .. } => Some(error.clone()),
			_ => None,
		}
	}

	pub fn read_default(&self) -> T {
		self.inner.borrow().default.clone()
	}

	/// Plain-value write (§4.2 case 1). Always succeeds; a setter's own failure is absorbed into
	/// this cell's Errored state rather than returned here.
	pub fn write(&self, value: T) -> Result<(), WriteRejected> {
		self.write_impl(value, false)
	}

	/// As [`write`](Self::write), but forces a `Value` emission even if `value` is `DeepEq` to the
	/// current observed value (used by the projection collaborators' `knownToBeChanged` writes).
	pub fn write_forced(&self, value: T) -> Result<(), WriteRejected> {
		self.write_impl(value, true)
	}

	fn write_impl(&self, value: T, force: bool) -> Result<(), WriteRejected> {
		let has_setter = self.inner.borrow().setter.is_some();
		if has_setter {
			let cell = Rc::clone(&self.inner);
			runtime::batch(move || {
				let outcome = {
					let mut inner = cell.borrow_mut();
					(inner.setter.as_mut().expect("checked has_setter above"))(value)
				};
				if let Err(e) = outcome {
					// §8 boundary behavior: a setter that throws invokes the canceller of any
					// prior Pending exactly once, same as a recompute superseding it would.
					let prior_pending = match &cell.borrow().slot {
						ValueSlot::Pending { token, .. } => Some(token.id()),
						_ => None,
					};
					if let Some(id) = prior_pending {
						if let Some(canceller) = cell.borrow_mut().canceller.as_mut() {
							canceller(id);
						}
					}
					apply_transition(&cell, Transition::Errored(CellError::SetterThrew(e)), false);
				}
			});
			return Ok(());
		}
		apply_transition(&self.inner, Transition::Value(value), force);
		Ok(())
	}

	pub fn write_error(&self, error: CellError<E>) {
		apply_transition(&self.inner, Transition::Errored(error), false);
	}

	pub fn write_pending(&self, token: Token<T, E>) {
		set_pending(&self.inner, token);
	}

	/// §4.2 case 2. Rejects if the cell has a setter installed (computed cells with setters
	/// cannot have their computation overwritten).
	pub fn write_computation(
		&self,
		computation: impl FnMut(Resume<T, E>, Option<Id>) -> Result<Computed<T, E>, E> + 'static,
	) -> Result<(), WriteRejected> {
		self.write_computation_with_canceller_opt(computation, None)
	}

	pub fn write_computation_with_canceller(
		&self,
		computation: impl FnMut(Resume<T, E>, Option<Id>) -> Result<Computed<T, E>, E> + 'static,
		canceller: impl FnMut(TokenId) + 'static,
	) -> Result<(), WriteRejected> {
		self.write_computation_with_canceller_opt(computation, Some(Box::new(canceller)))
	}

	fn write_computation_with_canceller_opt(
		&self,
		computation: impl FnMut(Resume<T, E>, Option<Id>) -> Result<Computed<T, E>, E> + 'static,
		canceller: Option<Box<CancellerFn<E>>>,
	) -> Result<(), WriteRejected> {
		if self.inner.borrow().setter.is_some() {
			return Err(WriteRejected::ComputedCellHasSetter);
		}
		{
			let mut inner = self.inner.borrow_mut();
			inner.computation = Some(Box::new(computation));
			inner.canceller = canceller;
		}
		install_computation_and_maybe_recompute(&self.inner);
		Ok(())
	}

	pub fn subscribe(&self, listener: Rc<RefCell<ListenerFn<T, E>>>) {
		self.subscribe_listener(Listener::Strong(listener));
	}

	pub fn subscribe_weak(&self, listener: Weak<RefCell<ListenerFn<T, E>>>) {
		self.subscribe_listener(Listener::Weak(listener));
	}

	fn subscribe_listener(&self, listener: Listener<T, E>) {
		let was_stale_computed = {
			let inner = self.inner.borrow();
			inner.computation.is_some() && inner.freshness == Freshness::Stale
		};
		self.inner.borrow_mut().listeners.subscribe(listener);
		if was_stale_computed {
			recompute(&self.inner, None);
		}
	}

	pub fn unsubscribe(&self, listener: &Rc<RefCell<ListenerFn<T, E>>>) {
		self.inner.borrow_mut().listeners.unsubscribe(&Listener::Strong(Rc::clone(listener)));
	}

	pub fn unsubscribe_weak(&self, listener: &Weak<RefCell<ListenerFn<T, E>>>) {
		self.inner.borrow_mut().listeners.unsubscribe(&Listener::Weak(listener.clone()));
	}

	/// §4.2 "Converter semantics". Decision for an Errored cell (DESIGN.md, Open Question 2):
	/// propagate the error rather than running `converter` against a value that was never live.
	pub fn install_converter(&self, converter: impl FnMut(T) -> Result<T, E> + 'static) {
		let already_errored = matches!(self.inner.borrow().slot, ValueSlot::Errored { .. });
		let (seed, default) = {
			let inner = self.inner.borrow();
			let seed = match &inner.slot {
				ValueSlot::Ready(v) => v.clone(),
				ValueSlot::Pending { last, .. } => last.clone(),
				ValueSlot::Errored { .. } => inner.default.clone(),
			};
			(seed, inner.default.clone())
		};
		let backing = Cell::<T, E>::new(seed, default);

		let converter = Rc::new(RefCell::new(converter));
		let backing_for_computation = backing.clone();
		let converter_for_computation = Rc::clone(&converter);
		{
			let mut inner = self.inner.borrow_mut();
			inner.computation = Some(Box::new(move |_resume, _cause| {
				let v = backing_for_computation.read_value();
				(converter_for_computation.borrow_mut())(v).map(Computed::Value)
			}));
			let backing_for_setter = backing.clone();
			inner.setter = Some(Box::new(move |v| {
				let _ = backing_for_setter.write(v);
				Ok(())
			}));
			inner.canceller = None;
		}

		if !already_errored {
			install_computation_and_maybe_recompute(&self.inner);
		}
	}

	/// `clear-converter`: leaves the last computed value in place as a Static cell.
	pub fn clear_converter(&self) {
		force_fresh(&self.inner);
		let mut inner = self.inner.borrow_mut();
		inner.computation = None;
		inner.setter = None;
		inner.canceller = None;
	}

	/// `convert(f, default)`: a new `Cell<R>` that mirrors this cell's Pending/Errored state
	/// category and maps its Ready value through `f` (§4.1).
	pub fn convert<R>(&self, f: impl FnMut(T) -> Result<R, E> + 'static, default: R) -> Cell<R, E>
	where
		R: DeepEq + Clone + 'static,
	{
		let source = self.clone();
		let f = Rc::new(RefCell::new(f));
		let last = Rc::new(RefCell::new(default.clone()));
		Cell::computed(
			move |_resume, _cause| -> Result<Computed<R, E>, E> {
				if let Some(token) = source.read_pending() {
					let f = Rc::clone(&f);
					let last_for_settle = Rc::clone(&last);
					let (our_token, our_resolver) = Token::<R, E>::new();
					let our_resolver = Rc::new(RefCell::new(Some(our_resolver)));
					token.on_settle(move |result| {
						let Some(resolver) = our_resolver.borrow_mut().take() else { return };
						let settled = match result {
							Ok(v) => match (f.borrow_mut())(v) {
								Ok(r) => {
									*last_for_settle.borrow_mut() = r.clone();
									Ok(r)
								}
								Err(e) => Err(CellError::ComputationThrew(e)),
							},
							Err(e) => Err(e),
						};
						resolver.resolve(settled);
					});
					return Ok(Computed::Pending(our_token));
				}
				if let Some(error) = source.read_error() {
					return match error.into_payload() {
						Some(e) => Ok(Computed::Errored(e)),
						// `CircularDependency` carries no payload we can forward through `R`'s
						// computation return type; hold the last mapped value instead.
						None => Ok(Computed::Value(last.borrow().clone())),
					};
				}
				match (f.borrow_mut())(source.read_value()) {
					Ok(r) => {
						*last.borrow_mut() = r.clone();
						Ok(Computed::Value(r))
					}
					Err(e) => Err(e),
				}
			},
			default,
		)
	}

	/// A derived boolean cell tracking whether this cell is Pending (§4.1). Reading it always
	/// forces this cell's own recomputation first, since `read_pending` does.
	pub fn pending_flag_cell(&self) -> Cell<bool, E> {
		let source = self.clone();
		Cell::computed(move |_resume, _cause| Ok(Computed::Value(source.read_pending().is_some())), false)
	}

	/// A derived error-or-absent cell that never itself enters Errored (§3, "error-view" cell).
	pub fn error_view_cell(&self) -> Cell<Option<CellError<E>>, E> {
		let source = self.clone();
		Cell::computed(move |_resume, _cause| Ok(Computed::Value(source.read_error())), None)
	}
}

impl<T, E> Cell<Option<T>, E>
where
	T: DeepEq + Clone + 'static,
	E: Clone + PartialEq + 'static,
{
	/// `make()`: a cell whose value type admits "missing", realized as `Option<T>` with `None`
	/// as both the initial value and the default.
	pub fn missing() -> Self {
		Cell::new(None, None)
	}
}
