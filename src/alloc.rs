use crate::{
	error::{Error, Result},
	pool::Pool,
};
use log::trace;
use once_cell::sync::Lazy;
use std::{
	array, fmt, mem,
	ops::{Deref, DerefMut},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Weak,
	},
};

/// Buckets cover capacities `2^4 ..= 2^31`; smaller requests round up to 16 bytes.
const BUCKETS: usize = 32;
const MIN_BUCKET_INDEX: usize = 4;

/// Ceilings for a [`PooledAllocator`].
///
/// The `max_*_buffer_capacity` pair bounds a single request; exceeding it is an error. The
/// `max_*_buffer_pool_capacity` pair bounds the total bytes the pool may own; requests beyond the
/// budget are served unpooled. Buffers larger than `max_pooled_*_buffer_capacity` are served but
/// never recycled.
#[derive(Debug, Clone)]
pub struct AllocatorOptions {
	pub max_byte_buffer_capacity: usize,
	pub max_char_buffer_capacity: usize,
	pub max_byte_buffer_pool_capacity: usize,
	pub max_char_buffer_pool_capacity: usize,
	pub max_pooled_byte_buffer_capacity: usize,
	pub max_pooled_char_buffer_capacity: usize,
}

impl Default for AllocatorOptions {
	fn default() -> Self {
		Self {
			max_byte_buffer_capacity: i32::MAX as usize,
			max_char_buffer_capacity: i32::MAX as usize,
			max_byte_buffer_pool_capacity: 32 * 1024 * 1024,
			max_char_buffer_pool_capacity: 32 * 1024 * 1024,
			max_pooled_byte_buffer_capacity: 1024 * 1024,
			max_pooled_char_buffer_capacity: 1024 * 1024,
		}
	}
}

/// Source of working buffers for sources, sinks, and codecs.
///
/// Allocators are shared across readers and writers, so implementations must tolerate concurrent
/// `byte_buffer`/`char_buffer` calls. Leases release on drop.
pub trait BufferAllocator: Send + Sync {
	/// Lease a byte buffer of at least `capacity` bytes.
	fn byte_buffer(&self, capacity: usize) -> Result<LeasedBytes>;

	/// Lease an empty string with at least `capacity` bytes of spare room.
	fn char_buffer(&self, capacity: usize) -> Result<LeasedString>;

	/// Shut the allocator down. Later requests fail; later releases are silently dropped.
	fn close(&self);
}

/// A leased byte buffer. Dereferences to a zero-initialized slice of the leased capacity and
/// returns to its pool (if any) on drop.
pub struct LeasedBytes {
	buf: Vec<u8>,
	pool: Option<Weak<Shared>>,
}

impl LeasedBytes {
	fn unpooled(buf: Vec<u8>) -> Self {
		Self { buf, pool: None }
	}
}

impl Deref for LeasedBytes {
	type Target = [u8];

	fn deref(&self) -> &[u8] {
		&self.buf
	}
}

impl DerefMut for LeasedBytes {
	fn deref_mut(&mut self) -> &mut [u8] {
		&mut self.buf
	}
}

impl fmt::Debug for LeasedBytes {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LeasedBytes")
			.field("capacity", &self.buf.len())
			.field("pooled", &self.pool.is_some())
			.finish()
	}
}

impl Drop for LeasedBytes {
	fn drop(&mut self) {
		let buf = mem::take(&mut self.buf);
		if let Some(pool) = self.pool.take().and_then(|weak| weak.upgrade()) {
			pool.recycle_bytes(buf);
		}
	}
}

/// A leased string buffer, cleared before each lease. Returns to its pool (if any) on drop.
pub struct LeasedString {
	buf: String,
	pool: Option<Weak<Shared>>,
}

impl LeasedString {
	fn unpooled(buf: String) -> Self {
		Self { buf, pool: None }
	}

	/// Detach the accumulated string, leaving an empty one to go back to the pool.
	pub fn take(&mut self) -> String {
		mem::take(&mut self.buf)
	}
}

impl Deref for LeasedString {
	type Target = String;

	fn deref(&self) -> &String {
		&self.buf
	}
}

impl DerefMut for LeasedString {
	fn deref_mut(&mut self) -> &mut String {
		&mut self.buf
	}
}

impl fmt::Debug for LeasedString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LeasedString")
			.field("capacity", &self.buf.capacity())
			.field("pooled", &self.pool.is_some())
			.finish()
	}
}

impl Drop for LeasedString {
	fn drop(&mut self) {
		let buf = mem::take(&mut self.buf);
		if let Some(pool) = self.pool.take().and_then(|weak| weak.upgrade()) {
			pool.recycle_chars(buf);
		}
	}
}

/// Allocator that hands out fresh exact-size buffers and never recycles.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnpooledAllocator;

impl BufferAllocator for UnpooledAllocator {
	fn byte_buffer(&self, capacity: usize) -> Result<LeasedBytes> {
		Ok(LeasedBytes::unpooled(vec![0; capacity]))
	}

	fn char_buffer(&self, capacity: usize) -> Result<LeasedString> {
		Ok(LeasedString::unpooled(String::with_capacity(capacity)))
	}

	fn close(&self) {}
}

/// Allocator backed by 32 power-of-two buckets of recycled buffers.
pub struct PooledAllocator {
	shared: Arc<Shared>,
}

struct Shared {
	options: AllocatorOptions,
	byte_buckets: [Pool<Vec<u8>>; BUCKETS],
	char_buckets: [Pool<String>; BUCKETS],
	pooled_byte_capacity: AtomicUsize,
	pooled_char_capacity: AtomicUsize,
	closed: AtomicBool,
}

/// Smallest bucket whose buffers hold `capacity` bytes.
fn bucket_for(capacity: usize) -> usize {
	let index = capacity.next_power_of_two().trailing_zeros() as usize;
	index.clamp(MIN_BUCKET_INDEX, BUCKETS - 1)
}

/// Largest bucket whose buffers a recycled `capacity`-byte buffer can still serve.
fn recycle_bucket_for(capacity: usize) -> usize {
	let index = (usize::BITS - 1).saturating_sub(capacity.leading_zeros()) as usize;
	index.clamp(MIN_BUCKET_INDEX, BUCKETS - 1)
}

impl PooledAllocator {
	pub fn new(options: AllocatorOptions) -> Self {
		Self {
			shared: Arc::new(Shared {
				options,
				byte_buckets: array::from_fn(|_| Pool::new()),
				char_buckets: array::from_fn(|_| Pool::new()),
				pooled_byte_capacity: AtomicUsize::new(0),
				pooled_char_capacity: AtomicUsize::new(0),
				closed: AtomicBool::new(false),
			}),
		}
	}

	/// The process-wide allocator behind default reader and writer options.
	pub fn global() -> Arc<PooledAllocator> {
		static GLOBAL: Lazy<Arc<PooledAllocator>> =
			Lazy::new(|| Arc::new(PooledAllocator::new(AllocatorOptions::default())));
		Arc::clone(&GLOBAL)
	}
}

impl fmt::Debug for PooledAllocator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PooledAllocator")
			.field("pooled_byte_capacity", &self.shared.pooled_byte_capacity.load(Ordering::Relaxed))
			.field("pooled_char_capacity", &self.shared.pooled_char_capacity.load(Ordering::Relaxed))
			.field("closed", &self.shared.closed.load(Ordering::Relaxed))
			.finish()
	}
}

impl BufferAllocator for PooledAllocator {
	fn byte_buffer(&self, capacity: usize) -> Result<LeasedBytes> {
		let shared = &self.shared;
		if shared.closed.load(Ordering::Acquire) {
			return Err(Error::AlreadyClosed("allocator"));
		}
		let options = &shared.options;
		if capacity > options.max_byte_buffer_capacity {
			return Err(Error::SizeLimitExceeded { requested: capacity, max: options.max_byte_buffer_capacity });
		}
		if capacity > options.max_pooled_byte_buffer_capacity {
			return Ok(LeasedBytes::unpooled(vec![0; capacity]));
		}

		let index = bucket_for(capacity);
		let bucket_capacity = 1 << index;
		if let Some(buf) = shared.byte_buckets[index].get() {
			trace!("leased pooled byte buffer of {bucket_capacity} bytes");
			return Ok(LeasedBytes { buf, pool: Some(Arc::downgrade(shared)) });
		}
		let total = shared.pooled_byte_capacity.fetch_add(bucket_capacity, Ordering::AcqRel) + bucket_capacity;
		if total > options.max_byte_buffer_pool_capacity {
			shared.pooled_byte_capacity.fetch_sub(bucket_capacity, Ordering::AcqRel);
			return Ok(LeasedBytes::unpooled(vec![0; capacity]));
		}
		trace!("pool grew to {total} bytes for a {bucket_capacity}-byte buffer");
		Ok(LeasedBytes { buf: vec![0; bucket_capacity], pool: Some(Arc::downgrade(shared)) })
	}

	fn char_buffer(&self, capacity: usize) -> Result<LeasedString> {
		let shared = &self.shared;
		if shared.closed.load(Ordering::Acquire) {
			return Err(Error::AlreadyClosed("allocator"));
		}
		let options = &shared.options;
		if capacity > options.max_char_buffer_capacity {
			return Err(Error::SizeLimitExceeded { requested: capacity, max: options.max_char_buffer_capacity });
		}
		if capacity > options.max_pooled_char_buffer_capacity {
			return Ok(LeasedString::unpooled(String::with_capacity(capacity)));
		}

		let index = bucket_for(capacity);
		let bucket_capacity = 1 << index;
		if let Some(buf) = shared.char_buckets[index].get() {
			trace!("leased pooled char buffer of {} bytes", buf.capacity());
			return Ok(LeasedString { buf, pool: Some(Arc::downgrade(shared)) });
		}
		let total = shared.pooled_char_capacity.fetch_add(bucket_capacity, Ordering::AcqRel) + bucket_capacity;
		if total > options.max_char_buffer_pool_capacity {
			shared.pooled_char_capacity.fetch_sub(bucket_capacity, Ordering::AcqRel);
			return Ok(LeasedString::unpooled(String::with_capacity(capacity)));
		}
		Ok(LeasedString { buf: String::with_capacity(bucket_capacity), pool: Some(Arc::downgrade(shared)) })
	}

	fn close(&self) {
		self.shared.closed.store(true, Ordering::Release);
	}
}

impl Shared {
	fn recycle_bytes(&self, buf: Vec<u8>) {
		if self.closed.load(Ordering::Acquire) {
			return;
		}
		trace!("recycling byte buffer of {} bytes", buf.len());
		self.byte_buckets[recycle_bucket_for(buf.len())].add(buf);
	}

	fn recycle_chars(&self, mut buf: String) {
		if self.closed.load(Ordering::Acquire) || buf.capacity() > self.options.max_pooled_char_buffer_capacity {
			return;
		}
		buf.clear();
		self.char_buckets[recycle_bucket_for(buf.capacity())].add(buf);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn small_pool() -> PooledAllocator {
		PooledAllocator::new(AllocatorOptions {
			max_byte_buffer_capacity: 1 << 20,
			max_char_buffer_capacity: 1 << 20,
			max_byte_buffer_pool_capacity: 1 << 12,
			max_char_buffer_pool_capacity: 1 << 12,
			max_pooled_byte_buffer_capacity: 1 << 10,
			max_pooled_char_buffer_capacity: 1 << 10,
		})
	}

	#[test]
	fn buckets_round_up() {
		assert_eq!(bucket_for(1), 4);
		assert_eq!(bucket_for(16), 4);
		assert_eq!(bucket_for(17), 5);
		assert_eq!(bucket_for(1024), 10);
		assert_eq!(bucket_for(1025), 11);
	}

	#[test]
	fn released_buffer_is_reused() {
		let alloc = small_pool();
		let first = alloc.byte_buffer(100).unwrap();
		assert_eq!(first.len(), 128);
		let ptr = first.as_ptr();
		drop(first);
		let second = alloc.byte_buffer(100).unwrap();
		assert_eq!(second.as_ptr(), ptr);
	}

	#[test]
	fn oversized_buffers_are_never_pooled() {
		let alloc = small_pool();
		let big = alloc.byte_buffer(2048).unwrap();
		assert_eq!(big.len(), 2048); // exact size, not a power-of-two bucket
		let ptr = big.as_ptr();
		drop(big);
		let again = alloc.byte_buffer(2048).unwrap();
		assert_ne!(again.as_ptr(), ptr);
	}

	#[test]
	fn request_above_ceiling_fails() {
		let alloc = small_pool();
		match alloc.byte_buffer((1 << 20) + 1) {
			Err(Error::SizeLimitExceeded { requested, max }) => {
				assert_eq!(requested, (1 << 20) + 1);
				assert_eq!(max, 1 << 20);
			},
			other => panic!("expected SizeLimitExceeded, got {other:?}"),
		}
	}

	#[test]
	fn pool_budget_overflow_serves_unpooled() {
		let alloc = small_pool();
		// Four 1 KiB leases consume the whole 4 KiB budget; the fifth is served unpooled.
		let held: Vec<_> = (0..4).map(|_| alloc.byte_buffer(1024).unwrap()).collect();
		assert_eq!(alloc.shared.pooled_byte_capacity.load(Ordering::Relaxed), 4096);
		let over = alloc.byte_buffer(1024).unwrap();
		let over_ptr = over.as_ptr();
		drop(over);
		drop(held);
		// The over-budget buffer was not recycled; the budgeted ones were.
		let next = alloc.byte_buffer(1024).unwrap();
		assert_ne!(next.as_ptr(), over_ptr);
	}

	#[test]
	fn close_fails_requests_and_drops_releases() {
		let alloc = small_pool();
		let held = alloc.byte_buffer(64).unwrap();
		alloc.close();
		assert!(matches!(alloc.byte_buffer(64), Err(Error::AlreadyClosed("allocator"))));
		drop(held); // release after close is silently dropped
		assert_eq!(alloc.shared.byte_buckets[bucket_for(64)].get(), None);
	}

	#[test]
	fn char_buffers_are_cleared_on_reuse() {
		let alloc = small_pool();
		let mut lease = alloc.char_buffer(32).unwrap();
		lease.push_str("leftover");
		drop(lease);
		let lease = alloc.char_buffer(32).unwrap();
		assert!(lease.is_empty());
		assert!(lease.capacity() >= 32);
	}
}
