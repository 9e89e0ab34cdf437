use corolla::{Cell, CellError};

#[test]
fn install_then_clear_converter_preserves_value_and_default() {
	let cell = Cell::<i32, String>::new(5, 0);
	cell.install_converter(|v: i32| Ok(v));
	assert_eq!(cell.read_value(), 5);

	cell.clear_converter();
	assert_eq!(cell.read_value(), 5);
	assert_eq!(cell.read_default(), 0);

	// Now a plain Static cell again: writes go straight through.
	cell.write(9).unwrap();
	assert_eq!(cell.read_value(), 9);
}

#[test]
fn installing_a_converter_on_an_errored_cell_propagates_the_error() {
	let cell = Cell::<i32, String>::errored(CellError::ComputationThrew("oops".to_string()), -1);
	assert!(cell.read_error().is_some());

	cell.install_converter(|v: i32| Ok(v * 2));
	assert!(cell.read_error().is_some(), "install-converter must not clear an existing error");
	assert_eq!(cell.read_value(), -1);
}
