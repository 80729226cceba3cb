pub mod metrics;
pub mod strng;

pub mod prelude {
	pub use crate::strng::{self, Strng};
}
