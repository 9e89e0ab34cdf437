use std::{cell::RefCell, rc::Rc};

use corolla::{batch, Cell, ListenerFn};

mod _validator;
use _validator::Validator;

#[test]
fn listeners_on_the_same_writer_fire_in_subscription_order() {
	static ORDER: Validator<u8> = Validator::new();

	let cell = Cell::<i32, String>::new(1, 0);
	for tag in [1u8, 2, 3] {
		let listener: Rc<RefCell<ListenerFn<i32, String>>> =
			Rc::new(RefCell::new(move |_: &Cell<i32, String>, _: &_| ORDER.push(tag)));
		cell.subscribe(listener);
	}

	cell.write(2).unwrap();
	ORDER.expect([1, 2, 3]);
}

#[test]
fn subscribing_the_same_listener_twice_is_idempotent() {
	let cell = Cell::<i32, String>::new(1, 0);
	let invocations = Rc::new(RefCell::new(0));
	let listener: Rc<RefCell<ListenerFn<i32, String>>> = {
		let invocations = Rc::clone(&invocations);
		Rc::new(RefCell::new(move |_: &Cell<i32, String>, _: &_| {
			*invocations.borrow_mut() += 1;
		}))
	};

	cell.subscribe(Rc::clone(&listener));
	cell.subscribe(Rc::clone(&listener));

	cell.write(2).unwrap();
	assert_eq!(*invocations.borrow(), 1, "a listener registered twice still fires only once");
}

#[test]
fn unsubscribe_stops_future_notifications() {
	let cell = Cell::<i32, String>::new(1, 0);
	let invocations = Rc::new(RefCell::new(0));
	let listener: Rc<RefCell<ListenerFn<i32, String>>> = {
		let invocations = Rc::clone(&invocations);
		Rc::new(RefCell::new(move |_: &Cell<i32, String>, _: &_| {
			*invocations.borrow_mut() += 1;
		}))
	};

	cell.subscribe(Rc::clone(&listener));
	cell.write(2).unwrap();
	assert_eq!(*invocations.borrow(), 1);

	cell.unsubscribe(&listener);
	cell.write(3).unwrap();
	assert_eq!(*invocations.borrow(), 1, "no further invocations after unsubscribe");
}

#[test]
fn a_collected_weak_listener_is_silently_dropped() {
	let cell = Cell::<i32, String>::new(1, 0);

	let strong: Rc<RefCell<ListenerFn<i32, String>>> = Rc::new(RefCell::new(|_: &Cell<i32, String>, _: &_| {}));
	cell.subscribe_weak(Rc::downgrade(&strong));
	drop(strong);

	// Must not panic, and must behave as if nothing were subscribed.
	cell.write(2).unwrap();
	assert_eq!(cell.read_value(), 2);
}

#[test]
fn a_listener_is_invoked_at_most_once_per_flush_round() {
	let cell = Cell::<i32, String>::new(1, 0);
	let invocations = Rc::new(RefCell::new(0));
	let listener: Rc<RefCell<ListenerFn<i32, String>>> = {
		let invocations = Rc::clone(&invocations);
		Rc::new(RefCell::new(move |_: &Cell<i32, String>, _: &_| {
			*invocations.borrow_mut() += 1;
		}))
	};
	cell.subscribe(listener);

	batch(|| {
		cell.write(2).unwrap();
		cell.write(3).unwrap();
		cell.write(4).unwrap();
	});

	assert_eq!(*invocations.borrow(), 1);
	assert_eq!(cell.read_value(), 4);
}
