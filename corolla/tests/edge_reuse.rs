use corolla::{Cell, Computed};

#[test]
fn dependency_edges_are_stable_across_repeated_recomputations_with_unchanged_sources() {
	let a = Cell::<i32, String>::new(1, 0);
	let b = Cell::<i32, String>::new(2, 0);
	let unrelated = Cell::<i32, String>::new(100, 0);

	let (a_for_c, b_for_c) = (a.clone(), b.clone());
	let c = Cell::<i32, String>::computed(
		move |_resume, _cause| Ok(Computed::Value(a_for_c.read_value() + b_for_c.read_value())),
		0,
	);

	assert_eq!(c.read_value(), 3);
	a.write(10).unwrap();
	assert_eq!(c.read_value(), 12);
	b.write(20).unwrap();
	assert_eq!(c.read_value(), 30);

	// Re-running the same computation (identical sources, identical read order) a second and
	// third time must not pick up `unrelated`, nor drop the live edges to `a`/`b`.
	unrelated.write(999).unwrap();
	assert_eq!(c.read_value(), 30, "c never read `unrelated`, so it must not become a dependency");

	a.write(11).unwrap();
	assert_eq!(c.read_value(), 31, "the edge to a must still be live after the repeated recompute");
}
