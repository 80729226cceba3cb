use std::sync::Arc;

use parking_lot::Mutex;

/// A cell shared between the dispatcher and the in-flight response transformer
/// so that stream handlers can record usage/timing as events arrive, without
/// plumbing a mutable reference through every chunk callback.
///
/// Grounded in the teacher's `telemetry::log::AsyncLog`, used the same way in
/// `llm::anthropic::Provider::process_streaming` (`log.non_atomic_mutate(...)`).
#[derive(Clone)]
pub struct AsyncLog<T>(Arc<Mutex<Option<T>>>);

impl<T> Default for AsyncLog<T> {
	fn default() -> Self {
		Self(Arc::new(Mutex::new(None)))
	}
}

impl<T> AsyncLog<T> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn store(&self, value: Option<T>) {
		*self.0.lock() = value;
	}

	/// Mutate the stored value in place, initializing with `T::default()` if
	/// nothing has been stored yet. Named to mirror the teacher's call sites;
	/// "non_atomic" because the mutation is a plain critical section, not a
	/// lock-free atomic op, which is fine since only one attempt writes at a
	/// time (§5 ordering guarantees).
	pub fn non_atomic_mutate<F>(&self, f: F)
	where
		T: Default,
		F: FnOnce(&mut T),
	{
		let mut guard = self.0.lock();
		let entry = guard.get_or_insert_with(T::default);
		f(entry);
	}

	pub fn get_cloned(&self) -> Option<T>
	where
		T: Clone,
	{
		self.0.lock().clone()
	}

	pub fn take(&self) -> Option<T> {
		self.0.lock().take()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Default, Clone, Debug, PartialEq)]
	struct Counters {
		output_tokens: u64,
	}

	#[test]
	fn mutate_initializes_default() {
		let log: AsyncLog<Counters> = AsyncLog::new();
		log.non_atomic_mutate(|c| c.output_tokens += 5);
		log.non_atomic_mutate(|c| c.output_tokens += 2);
		assert_eq!(log.get_cloned().unwrap().output_tokens, 7);
	}
}
