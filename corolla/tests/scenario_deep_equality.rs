use std::{cell::RefCell, rc::Rc};

use corolla::{Cell, ListenerFn};
use xylem::deep_eq::DeepEqViaPartialEq;

#[derive(Clone, PartialEq, Debug)]
struct Record {
	a: i32,
}
impl DeepEqViaPartialEq for Record {}

#[test]
fn unchanged_writes_do_not_invoke_the_listener() {
	let o = Cell::<Record, String>::new(Record { a: 0 }, Record { a: 0 });
	let invocations = Rc::new(RefCell::new(0));
	{
		let invocations = Rc::clone(&invocations);
		let listener: Rc<RefCell<ListenerFn<Record, String>>> =
			Rc::new(RefCell::new(move |_: &Cell<Record, String>, _: &_| {
				*invocations.borrow_mut() += 1;
			}));
		o.subscribe(listener);
	}

	for _ in 0..3 {
		o.write(Record { a: 0 }).unwrap();
	}
	assert_eq!(*invocations.borrow(), 0);

	o.write(Record { a: 1 }).unwrap();
	assert_eq!(*invocations.borrow(), 1);
}
