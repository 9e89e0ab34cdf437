use corolla::Cell;

#[test]
fn basic_derivation() {
	let a = Cell::<i32, String>::new(10, 0);
	let b = Cell::<i32, String>::new(20, 0);
	let (a_for_c, b_for_c) = (a.clone(), b.clone());
	let c = Cell::<i32, String>::computed(
		move |_resume, _cause| Ok(corolla::Computed::Value(a_for_c.read_value() + b_for_c.read_value())),
		0,
	);

	assert_eq!(c.read_value(), 30);

	a.write(15).unwrap();
	assert_eq!(c.read_value(), 35);

	b.write(15).unwrap();
	assert_eq!(c.read_value(), 30);
}
