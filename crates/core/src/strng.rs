/// `Strng` provides a string type with better properties for our hot paths:
/// cheap cloning (ref counting), compact storage (8 bytes vs 24), immutability.
/// This is a thin wrapper around `arcstr::ArcStr` so we can extend it later.
pub type Strng = arcstr::ArcStr;

pub const EMPTY: Strng = literal!("");

pub fn new<A: AsRef<str>>(s: A) -> Strng {
	Strng::from(s.as_ref())
}

pub use arcstr::{format, literal};

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn interning_is_cheap() {
		let a = new("claude");
		let b = a.clone();
		assert_eq!(std::mem::size_of::<Strng>(), 8);
		assert_eq!(a, b);
		assert_eq!(a.to_string(), "claude");
	}
}
