use std::sync::{Mutex, PoisonError};

/// A concurrent pool of recycled values.
///
/// `get` and `add` are O(1) and safe to call from any thread. Values surface in no particular
/// order. The pool never allocates on `get`; `add` may grow the backing storage.
///
/// A linked CAS stack cannot reclaim its nodes soundly without an epoch or hazard-pointer
/// scheme, so the stack lives behind a mutex instead; the critical section is a single push or
/// pop.
#[derive(Debug, Default)]
pub struct Pool<T> {
	items: Mutex<Vec<T>>,
}

impl<T> Pool<T> {
	pub const fn new() -> Self {
		Self { items: Mutex::new(Vec::new()) }
	}

	/// Take any pooled value, or `None` when the pool is empty.
	pub fn get(&self) -> Option<T> {
		self.items.lock().unwrap_or_else(PoisonError::into_inner).pop()
	}

	/// Return a value to the pool.
	pub fn add(&self, value: T) {
		self.items.lock().unwrap_or_else(PoisonError::into_inner).push(value);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::{
		collections::HashMap,
		sync::{
			atomic::{AtomicBool, Ordering},
			Arc,
		},
		thread,
	};

	#[test]
	fn get_on_empty_pool() {
		let pool = Pool::<u32>::new();
		assert_eq!(pool.get(), None);
	}

	#[test]
	fn add_then_get() {
		let pool = Pool::new();
		pool.add(1);
		pool.add(2);
		assert!(pool.get().is_some());
		assert!(pool.get().is_some());
		assert_eq!(pool.get(), None);
	}

	/// Every value added by K producers surfaces exactly once across K consumers.
	#[test]
	fn concurrent_exactly_once() {
		const PRODUCERS: u64 = 4;
		const CONSUMERS: usize = 4;
		const PER_PRODUCER: u64 = 1000;

		let pool = Arc::new(Pool::new());
		let done = Arc::new(AtomicBool::new(false));

		let producers: Vec<_> = (0..PRODUCERS)
			.map(|p| {
				let pool = Arc::clone(&pool);
				thread::spawn(move || {
					for i in 0..PER_PRODUCER {
						pool.add(p * PER_PRODUCER + i);
					}
				})
			})
			.collect();
		let consumers: Vec<_> = (0..CONSUMERS)
			.map(|_| {
				let pool = Arc::clone(&pool);
				let done = Arc::clone(&done);
				thread::spawn(move || {
					let mut seen = Vec::new();
					loop {
						match pool.get() {
							Some(value) => seen.push(value),
							None if done.load(Ordering::Acquire) => break seen,
							None => thread::yield_now(),
						}
					}
				})
			})
			.collect();

		for producer in producers {
			producer.join().unwrap();
		}
		done.store(true, Ordering::Release);

		let mut counts = HashMap::new();
		for consumer in consumers {
			for value in consumer.join().unwrap() {
				*counts.entry(value).or_insert(0u32) += 1;
			}
		}
		assert_eq!(counts.len() as u64, PRODUCERS * PER_PRODUCER);
		assert!(counts.values().all(|&n| n == 1));
	}
}
