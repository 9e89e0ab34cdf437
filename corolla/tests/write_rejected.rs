use corolla::{Cell, Computed, WriteRejected};

#[test]
fn overwriting_the_computation_of_a_setter_bearing_cell_is_rejected() {
	let cell = Cell::<i32, String>::computed_with_setter(
		move |_resume, _cause| Ok(Computed::Value(1)),
		0,
		|_v| Ok(()),
	);

	let result = cell.write_computation(move |_resume, _cause| Ok(Computed::Value(2)));
	assert_eq!(result, Err(WriteRejected::ComputedCellHasSetter));
}

#[test]
fn a_setter_that_throws_errors_the_cell_and_cancels_any_prior_pending_once() {
	use std::{cell::RefCell, rc::Rc};
	use corolla::Token;

	let (token, resolver) = Token::<i32, String>::new();
	let cancelled = Rc::new(RefCell::new(0));
	let cancelled_for_canceller = Rc::clone(&cancelled);
	let cell = Cell::<i32, String>::computed_full(
		move |_resume, _cause| Ok(Computed::Pending(token.clone())),
		0,
		|_v| Err("setter failed".to_string()),
		move |_id| *cancelled_for_canceller.borrow_mut() += 1,
	);

	assert!(cell.read_pending().is_some());

	cell.write(5).unwrap();
	assert!(cell.read_error().is_some());
	assert_eq!(*cancelled.borrow(), 1, "the prior pending's canceller must fire exactly once");

	// The now-superseded token resolving must not alter the errored state.
	resolver.resolve(Ok(999));
	assert!(cell.read_error().is_some());
}
