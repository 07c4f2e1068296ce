use crate::{
	alloc::{BufferAllocator, LeasedBytes},
	error::{Error, Result},
	source::MessageSource,
	MIN_BUFFER_CAPACITY,
};
use log::{debug, trace};
use std::{io::IoSlice, os::unix::io::RawFd};

pub use self::provider::{DiscardSink, FileSink, SinkProvider, StreamSink, VecSink};

mod provider;

/// Buffered writing half of a message stream.
///
/// Bytes in `[0, position)` are staged output; a flush drains them to the provider in order.
/// Reservations never split a fixed-width value across a flush, so headers and their values land
/// in the buffer contiguously.
///
/// Not safe for concurrent use.
pub struct MessageSink<'p> {
	provider: Box<dyn SinkProvider + 'p>,
	buf: LeasedBytes,
	pos: usize,
	closed: bool,
}

impl<'p> MessageSink<'p> {
	/// Wrap a provider, leasing a working buffer of `capacity` bytes from `allocator`.
	///
	/// Panics if `capacity` cannot hold the largest fixed-width value (9 bytes).
	pub fn new(provider: impl SinkProvider + 'p, allocator: &dyn BufferAllocator, capacity: usize) -> Result<Self> {
		assert!(capacity >= MIN_BUFFER_CAPACITY, "write buffer capacity {capacity} cannot hold a fixed-width value");
		Ok(Self { provider: Box::new(provider), buf: allocator.byte_buffer(capacity)?, pos: 0, closed: false })
	}

	/// Free space left in the staging buffer.
	pub fn remaining(&self) -> usize {
		self.buf.len() - self.pos
	}

	/// Make at least `min` bytes of free space, flushing the staged bytes if needed.
	pub fn ensure_remaining(&mut self, min: usize) -> Result<()> {
		if self.remaining() >= min {
			return Ok(());
		}
		self.flush_staged()?;
		if self.buf.len() < min {
			return Err(Error::SizeLimitExceeded { requested: min, max: self.buf.len() });
		}
		Ok(())
	}

	/// Drain the staged bytes to the provider without flushing the provider itself.
	pub(crate) fn flush_staged(&mut self) -> Result<()> {
		if self.pos > 0 {
			trace!("flushing {} staged bytes", self.pos);
			self.provider.write(&self.buf[..self.pos])?;
			self.pos = 0;
		}
		Ok(())
	}

	pub fn write_byte(&mut self, byte: u8) -> Result<()> {
		self.ensure_remaining(1)?;
		self.buf[self.pos] = byte;
		self.pos += 1;
		Ok(())
	}

	fn write_array<const N: usize>(&mut self, bytes: [u8; N]) -> Result<()> {
		self.ensure_remaining(N)?;
		self.buf[self.pos..self.pos + N].copy_from_slice(&bytes);
		self.pos += N;
		Ok(())
	}

	/// Reserve once and write a tag byte followed by a fixed-width value.
	fn write_tag_with<const N: usize>(&mut self, tag: u8, bytes: [u8; N]) -> Result<()> {
		self.ensure_remaining(1 + N)?;
		self.buf[self.pos] = tag;
		self.buf[self.pos + 1..self.pos + 1 + N].copy_from_slice(&bytes);
		self.pos += 1 + N;
		Ok(())
	}

	pub fn write_u8(&mut self, value: u8) -> Result<()> {
		self.write_byte(value)
	}

	pub fn write_i8(&mut self, value: i8) -> Result<()> {
		self.write_byte(value as u8)
	}

	pub fn write_u16(&mut self, value: u16) -> Result<()> {
		self.write_array(value.to_be_bytes())
	}

	pub fn write_i16(&mut self, value: i16) -> Result<()> {
		self.write_array(value.to_be_bytes())
	}

	pub fn write_u32(&mut self, value: u32) -> Result<()> {
		self.write_array(value.to_be_bytes())
	}

	pub fn write_i32(&mut self, value: i32) -> Result<()> {
		self.write_array(value.to_be_bytes())
	}

	pub fn write_u64(&mut self, value: u64) -> Result<()> {
		self.write_array(value.to_be_bytes())
	}

	pub fn write_i64(&mut self, value: i64) -> Result<()> {
		self.write_array(value.to_be_bytes())
	}

	pub fn write_f32(&mut self, value: f32) -> Result<()> {
		self.write_array(value.to_be_bytes())
	}

	pub fn write_f64(&mut self, value: f64) -> Result<()> {
		self.write_array(value.to_be_bytes())
	}

	pub fn write_tag_and_u8(&mut self, tag: u8, value: u8) -> Result<()> {
		self.write_tag_with(tag, [value])
	}

	pub fn write_tag_and_i8(&mut self, tag: u8, value: i8) -> Result<()> {
		self.write_tag_with(tag, [value as u8])
	}

	pub fn write_tag_and_u16(&mut self, tag: u8, value: u16) -> Result<()> {
		self.write_tag_with(tag, value.to_be_bytes())
	}

	pub fn write_tag_and_i16(&mut self, tag: u8, value: i16) -> Result<()> {
		self.write_tag_with(tag, value.to_be_bytes())
	}

	pub fn write_tag_and_u32(&mut self, tag: u8, value: u32) -> Result<()> {
		self.write_tag_with(tag, value.to_be_bytes())
	}

	pub fn write_tag_and_i32(&mut self, tag: u8, value: i32) -> Result<()> {
		self.write_tag_with(tag, value.to_be_bytes())
	}

	pub fn write_tag_and_u64(&mut self, tag: u8, value: u64) -> Result<()> {
		self.write_tag_with(tag, value.to_be_bytes())
	}

	pub fn write_tag_and_i64(&mut self, tag: u8, value: i64) -> Result<()> {
		self.write_tag_with(tag, value.to_be_bytes())
	}

	pub fn write_tag_and_f32(&mut self, tag: u8, value: f32) -> Result<()> {
		self.write_tag_with(tag, value.to_be_bytes())
	}

	pub fn write_tag_and_f64(&mut self, tag: u8, value: f64) -> Result<()> {
		self.write_tag_with(tag, value.to_be_bytes())
	}

	/// Write a byte run: copied into the staging buffer when it fits, otherwise forwarded to the
	/// provider together with the staged bytes in one vectored call.
	pub fn write_slice(&mut self, bytes: &[u8]) -> Result<()> {
		if bytes.len() <= self.remaining() {
			self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
			self.pos += bytes.len();
			return Ok(());
		}
		if bytes.len() < self.buf.len() {
			self.flush_staged()?;
			self.buf[..bytes.len()].copy_from_slice(bytes);
			self.pos = bytes.len();
			return Ok(());
		}
		if self.pos > 0 {
			let staged = IoSlice::new(&self.buf[..self.pos]);
			self.provider.write_vectored(&[staged, IoSlice::new(bytes)])?;
			self.pos = 0;
		} else {
			self.provider.write(bytes)?;
		}
		Ok(())
	}

	/// Scatter-write several byte runs in order.
	pub fn write_slices(&mut self, slices: &[&[u8]]) -> Result<()> {
		let total: usize = slices.iter().map(|slice| slice.len()).sum();
		if total <= self.remaining() {
			for slice in slices {
				self.buf[self.pos..self.pos + slice.len()].copy_from_slice(slice);
				self.pos += slice.len();
			}
			return Ok(());
		}
		let mut bufs = Vec::with_capacity(slices.len() + 1);
		if self.pos > 0 {
			bufs.push(IoSlice::new(&self.buf[..self.pos]));
		}
		bufs.extend(slices.iter().map(|slice| IoSlice::new(slice)));
		self.provider.write_vectored(&bufs)?;
		self.pos = 0;
		Ok(())
	}

	/// Pull up to `count` bytes out of `source`, returning how many actually arrived.
	pub fn transfer_from(&mut self, source: &mut MessageSource<'_>, count: u64) -> Result<u64> {
		source.transfer_to(self, count)
	}

	/// Drain the staged bytes and flush the provider.
	pub fn flush(&mut self) -> Result<()> {
		self.flush_staged()?;
		self.provider.flush()
	}

	/// Flush everything and close the provider.
	pub fn close(mut self) -> Result<()> {
		debug!("closing sink");
		let result = self.flush_staged().and_then(|_| self.provider.close());
		self.closed = true;
		result
	}

	pub(crate) fn provider_raw_fd(&self) -> Option<RawFd> {
		self.provider.raw_fd()
	}

	/// Staged-byte count; an index into the staging buffer for later [`patch`](Self::patch).
	pub(crate) fn position(&self) -> usize {
		self.pos
	}

	/// Unwritten tail of the staging buffer. Pair with [`advance`](Self::advance).
	pub(crate) fn tail_mut(&mut self) -> &mut [u8] {
		&mut self.buf[self.pos..]
	}

	/// Commit `count` bytes written directly into [`tail_mut`](Self::tail_mut).
	pub(crate) fn advance(&mut self, count: usize) {
		debug_assert!(count <= self.remaining());
		self.pos += count;
	}

	/// Overwrite staged bytes at `at`. The range must lie below the current position.
	pub(crate) fn patch(&mut self, at: usize, bytes: &[u8]) {
		debug_assert!(at + bytes.len() <= self.pos);
		self.buf[at..at + bytes.len()].copy_from_slice(bytes);
	}
}

impl Drop for MessageSink<'_> {
	fn drop(&mut self) {
		if !self.closed {
			let _ = self.flush_staged();
			let _ = self.provider.close();
		}
	}
}
