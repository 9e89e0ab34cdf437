use std::{cell::RefCell, rc::Rc};

use corolla::{Cell, Computed, Token, TokenId};

#[test]
fn pending_adoption_with_cancellation() {
	let (token1, resolver1) = Token::<i32, String>::new();
	let cancelled: Rc<RefCell<Vec<TokenId>>> = Rc::new(RefCell::new(Vec::new()));

	let token1_for_comp = token1.clone();
	let cancelled_for_canceller = Rc::clone(&cancelled);
	let c = Cell::<i32, String>::computed_with_canceller(
		move |_resume, _cause| Ok(Computed::Pending(token1_for_comp.clone())),
		0,
		move |id| cancelled_for_canceller.borrow_mut().push(id),
	);

	assert!(c.read_pending().is_some());
	assert_eq!(c.read_value(), 0);

	let (token2, resolver2) = Token::<i32, String>::new();
	let token2_for_comp = token2.clone();
	let cancelled_for_canceller2 = Rc::clone(&cancelled);
	c.write_computation_with_canceller(
		move |_resume, _cause| Ok(Computed::Pending(token2_for_comp.clone())),
		move |id| cancelled_for_canceller2.borrow_mut().push(id),
	)
	.unwrap();

	// Forces the recompute that installs token2 and, in the process, cancels token1.
	assert!(c.read_pending().is_some());
	assert_eq!(cancelled.borrow().as_slice(), &[token1.id()]);

	resolver1.resolve(Ok(999));
	assert_eq!(c.read_value(), 0, "resolution of a superseded token must not alter state");
	assert!(c.read_pending().is_some());

	resolver2.resolve(Ok(7));
	assert_eq!(c.read_value(), 7);
	assert!(c.read_pending().is_none());
}
