//! The NaN-aware, cycle-safe structural-equality predicate used as the change filter.
//!
//! This is deliberately a separate trait from [`PartialEq`]: floating point values compare equal
//! to themselves here even when they're NaN (two "the same missing measurement" values are
//! considered unchanged), and container types that can form reference cycles (anything wrapping
//! `Rc<RefCell<_>>`) guard against infinite recursion instead of overflowing the stack.
//!
//! Most user types should simply derive [`PartialEq`] and rely on the blanket
//! [`DeepEq`]-via-`PartialEq` bridge below; implement [`DeepEq`] directly only for types that
//! need NaN-equality or cycle safety.

use std::{
	cell::RefCell,
	collections::HashSet,
	rc::Rc,
};

/// Structural equality used to decide whether a write actually changed a cell's observed value.
pub trait DeepEq {
	fn deep_eq(&self, other: &Self) -> bool;
}

/// Opt-in bridge for types that only have [`PartialEq`] and don't need NaN-equality or cycle
/// safety. Implement [`DeepEq`] directly instead of this marker when either applies.
pub trait DeepEqViaPartialEq: PartialEq {}

impl<T: DeepEqViaPartialEq> DeepEq for T {
	fn deep_eq(&self, other: &Self) -> bool {
		self == other
	}
}

impl DeepEqViaPartialEq for bool {}
impl DeepEqViaPartialEq for String {}
impl DeepEqViaPartialEq for &str {}
impl DeepEqViaPartialEq for () {}

macro_rules! impl_int_deep_eq_via_partial_eq {
	($($t:ty),* $(,)?) => {
		$(impl DeepEqViaPartialEq for $t {})*
	};
}
impl_int_deep_eq_via_partial_eq!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! impl_float_deep_eq {
	($($t:ty),* $(,)?) => {
		$(
			impl DeepEq for $t {
				fn deep_eq(&self, other: &Self) -> bool {
					self == other || (self.is_nan() && other.is_nan())
				}
			}
		)*
	};
}
impl_float_deep_eq!(f32, f64);

impl<T: DeepEq> DeepEq for Option<T> {
	fn deep_eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Some(a), Some(b)) => a.deep_eq(b),
			(None, None) => true,
			_ => false,
		}
	}
}

impl<T: DeepEq> DeepEq for Vec<T> {
	fn deep_eq(&self, other: &Self) -> bool {
		self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a.deep_eq(b))
	}
}

impl<T: DeepEq + ?Sized> DeepEq for Box<T> {
	fn deep_eq(&self, other: &Self) -> bool {
		(**self).deep_eq(&**other)
	}
}

thread_local! {
	/// Guards cyclic `Rc<RefCell<_>>` comparisons: a pair of pointers currently "in progress"
	/// compares equal without recursing further, matching "circular-safe traversal".
	static IN_PROGRESS: RefCell<HashSet<(usize, usize)>> = RefCell::new(HashSet::new());
}

impl<T: DeepEq> DeepEq for Rc<RefCell<T>> {
	fn deep_eq(&self, other: &Self) -> bool {
		if Rc::ptr_eq(self, other) {
			return true;
		}
		let key = (Rc::as_ptr(self) as usize, Rc::as_ptr(other) as usize);
		let already_comparing = IN_PROGRESS.with(|set| !set.borrow_mut().insert(key));
		if already_comparing {
			// A cycle reached this pair again; treat it as consistent rather than recursing forever.
			return true;
		}
		let result = self.borrow().deep_eq(&other.borrow());
		IN_PROGRESS.with(|set| {
			set.borrow_mut().remove(&key);
		});
		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn nan_equals_nan() {
		assert!(f64::NAN.deep_eq(&f64::NAN));
		assert!(1.0f64.deep_eq(&1.0));
		assert!(!1.0f64.deep_eq(&2.0));
	}

	#[test]
	fn reflexive_including_cycles() {
		#[derive(Debug)]
		struct Node {
			value: i32,
			next: Option<Rc<RefCell<Node>>>,
		}
		impl DeepEq for Node {
			fn deep_eq(&self, other: &Self) -> bool {
				self.value == other.value && self.next.deep_eq(&other.next)
			}
		}

		let a = Rc::new(RefCell::new(Node { value: 1, next: None }));
		a.borrow_mut().next = Some(Rc::clone(&a));
		assert!(a.deep_eq(&a));
	}

	#[test]
	fn vec_and_option() {
		assert!(vec![1, 2, 3].deep_eq(&vec![1, 2, 3]));
		assert!(!vec![1, 2, 3].deep_eq(&vec![1, 2]));
		assert!(None::<i32>.deep_eq(&None));
		assert!(Some(1).deep_eq(&Some(1)));
		assert!(!Some(1).deep_eq(&Some(2)));
	}
}
