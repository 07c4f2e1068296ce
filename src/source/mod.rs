use crate::{
	alloc::{BufferAllocator, LeasedBytes},
	error::{Error, Result},
	sink::MessageSink,
	MIN_BUFFER_CAPACITY,
};
use log::{debug, trace};
use nix::{errno::Errno, fcntl::copy_file_range};
use std::{io, io::ErrorKind, os::unix::io::RawFd};

pub use self::provider::{FileSource, SliceSource, SourceProvider, StreamSource};

mod provider;

/// Buffered reading half of a message stream.
///
/// One working buffer straddles the provider: bytes in `[position, limit)` are pending input.
/// Every read ensures enough buffered bytes first, refilling from the provider as needed; a
/// refill that cannot reach the requested minimum is a premature end of input.
///
/// Not safe for concurrent use.
pub struct MessageSource<'p> {
	provider: Box<dyn SourceProvider + 'p>,
	buf: LeasedBytes,
	pos: usize,
	limit: usize,
}

impl<'p> MessageSource<'p> {
	/// Wrap a provider, leasing a working buffer of `capacity` bytes from `allocator`.
	///
	/// Panics if `capacity` cannot hold the largest fixed-width value (9 bytes).
	pub fn new(provider: impl SourceProvider + 'p, allocator: &dyn BufferAllocator, capacity: usize) -> Result<Self> {
		assert!(capacity >= MIN_BUFFER_CAPACITY, "read buffer capacity {capacity} cannot hold a fixed-width value");
		Ok(Self { provider: Box::new(provider), buf: allocator.byte_buffer(capacity)?, pos: 0, limit: 0 })
	}

	/// Bytes buffered and not yet consumed.
	pub fn remaining(&self) -> usize {
		self.limit - self.pos
	}

	/// Make at least `min` bytes available at the current position, refilling from the provider
	/// as needed.
	pub fn ensure_remaining(&mut self, min: usize) -> Result<()> {
		if self.remaining() >= min {
			return Ok(());
		}
		let capacity = self.buf.len();
		if min > capacity {
			return Err(Error::SizeLimitExceeded { requested: min, max: capacity });
		}
		self.compact();
		while self.remaining() < min {
			let limit = self.limit;
			let needed = min - limit;
			let n = self.provider.read(&mut self.buf[limit..], needed).map_err(reveal_non_blocking)?;
			if n == 0 {
				return Err(Error::PrematureEndOfInput { required: min, got: limit });
			}
			trace!("refilled {n} bytes (needed {needed})");
			self.limit += n;
		}
		Ok(())
	}

	fn compact(&mut self) {
		if self.pos > 0 {
			self.buf.copy_within(self.pos..self.limit, 0);
			self.limit -= self.pos;
			self.pos = 0;
		}
	}

	/// Consume one byte.
	pub fn read_byte(&mut self) -> Result<u8> {
		self.ensure_remaining(1)?;
		let byte = self.buf[self.pos];
		self.pos += 1;
		Ok(byte)
	}

	/// Peek at the next byte without consuming it.
	pub fn next_byte(&mut self) -> Result<u8> {
		self.ensure_remaining(1)?;
		Ok(self.buf[self.pos])
	}

	fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
		self.ensure_remaining(N)?;
		let mut bytes = [0; N];
		bytes.copy_from_slice(&self.buf[self.pos..self.pos + N]);
		self.pos += N;
		Ok(bytes)
	}

	pub fn read_u8(&mut self) -> Result<u8> {
		self.read_byte()
	}

	pub fn read_i8(&mut self) -> Result<i8> {
		Ok(self.read_byte()? as i8)
	}

	pub fn read_u16(&mut self) -> Result<u16> {
		Ok(u16::from_be_bytes(self.take()?))
	}

	pub fn read_i16(&mut self) -> Result<i16> {
		Ok(i16::from_be_bytes(self.take()?))
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		Ok(u32::from_be_bytes(self.take()?))
	}

	pub fn read_i32(&mut self) -> Result<i32> {
		Ok(i32::from_be_bytes(self.take()?))
	}

	pub fn read_u64(&mut self) -> Result<u64> {
		Ok(u64::from_be_bytes(self.take()?))
	}

	pub fn read_i64(&mut self) -> Result<i64> {
		Ok(i64::from_be_bytes(self.take()?))
	}

	pub fn read_f32(&mut self) -> Result<f32> {
		Ok(f32::from_be_bytes(self.take()?))
	}

	pub fn read_f64(&mut self) -> Result<f64> {
		Ok(f64::from_be_bytes(self.take()?))
	}

	/// Read a 1-byte unsigned length field.
	pub fn read_length8(&mut self) -> Result<u32> {
		Ok(self.read_u8()? as u32)
	}

	/// Read a 2-byte unsigned length field.
	pub fn read_length16(&mut self) -> Result<u32> {
		Ok(self.read_u16()? as u32)
	}

	/// Read a 4-byte unsigned length field, rejecting lengths above the supported ceiling.
	pub fn read_length32(&mut self) -> Result<u32> {
		let length = self.read_u32()?;
		if length > i32::MAX as u32 {
			return Err(Error::LengthTooLarge { length, max: i32::MAX as u32 });
		}
		Ok(length)
	}

	/// View of the buffered bytes at the current position. Only meaningful after
	/// [`ensure_remaining`](Self::ensure_remaining).
	pub(crate) fn buffered(&self) -> &[u8] {
		&self.buf[self.pos..self.limit]
	}

	/// Consume `count` already-buffered bytes.
	pub(crate) fn consume(&mut self, count: usize) {
		debug_assert!(count <= self.remaining());
		self.pos += count;
	}

	pub(crate) fn capacity(&self) -> usize {
		self.buf.len()
	}

	/// Fill `dest` completely, draining buffered bytes first and then reading from the provider.
	pub fn read_exact(&mut self, dest: &mut [u8]) -> Result<()> {
		let buffered = dest.len().min(self.remaining());
		dest[..buffered].copy_from_slice(&self.buf[self.pos..self.pos + buffered]);
		self.pos += buffered;
		let mut filled = buffered;
		while filled < dest.len() {
			let want = dest.len() - filled;
			let n = self.provider.read(&mut dest[filled..], want).map_err(reveal_non_blocking)?;
			if n == 0 {
				return Err(Error::PrematureEndOfInput { required: dest.len(), got: filled });
			}
			filled += n;
		}
		Ok(())
	}

	/// Discard `count` bytes.
	pub fn skip(&mut self, count: usize) -> Result<()> {
		let buffered = count.min(self.remaining());
		self.pos += buffered;
		let rest = count - buffered;
		if rest > 0 {
			// The buffer is fully drained here; lend it to the provider as scratch.
			self.pos = 0;
			self.limit = 0;
			self.provider.skip(rest, &mut self.buf)?;
		}
		Ok(())
	}

	/// Move up to `count` bytes into `sink`, returning how many actually moved (the input may
	/// end first). Runs fd-to-fd when both providers expose descriptors.
	pub fn transfer_to(&mut self, sink: &mut MessageSink<'_>, count: u64) -> Result<u64> {
		let mut transferred = 0;

		let buffered = count.min(self.remaining() as u64) as usize;
		if buffered > 0 {
			sink.write_slice(&self.buf[self.pos..self.pos + buffered])?;
			self.pos += buffered;
			transferred += buffered as u64;
		}
		if transferred == count {
			return Ok(transferred);
		}

		// Past the buffered bytes everything moves provider-to-provider.
		sink.flush_staged()?;
		let mut rest = count - transferred;
		if let (Some(fd_in), Some(fd_out)) = (self.provider.raw_fd(), sink.provider_raw_fd()) {
			if let Some(copied) = copy_fd_range(fd_in, fd_out, rest)? {
				return Ok(transferred + copied);
			}
		}
		self.pos = 0;
		self.limit = 0;
		while rest > 0 {
			let chunk = rest.min(self.buf.len() as u64) as usize;
			let n = self.provider.read(&mut self.buf[..chunk], 1).map_err(reveal_non_blocking)?;
			if n == 0 {
				break;
			}
			sink.write_slice(&self.buf[..n])?;
			rest -= n as u64;
			transferred += n as u64;
		}
		Ok(transferred)
	}

	/// Release the working buffer and close the provider.
	pub fn close(mut self) -> Result<()> {
		debug!("closing source");
		self.provider.close()
	}
}

/// A provider that cannot make progress reports `WouldBlock`; surface that as the dedicated
/// error instead of an opaque I/O failure.
fn reveal_non_blocking(err: Error) -> Error {
	match err {
		Error::Io(io) if io.kind() == ErrorKind::WouldBlock => Error::NonBlockingChannel,
		other => other,
	}
}

/// Copy up to `count` bytes fd-to-fd. `Ok(None)` means the kernel cannot service this pair and
/// the caller should fall back to buffered copying.
fn copy_fd_range(fd_in: RawFd, fd_out: RawFd, count: u64) -> Result<Option<u64>> {
	let mut copied = 0;
	while copied < count {
		let chunk = (count - copied).min(usize::MAX as u64) as usize;
		match copy_file_range(fd_in, None, fd_out, None, chunk) {
			Ok(0) => break,
			Ok(n) => copied += n as u64,
			Err(Errno::EXDEV | Errno::EINVAL | Errno::ENOSYS) if copied == 0 => return Ok(None),
			Err(errno) => return Err(io::Error::from_raw_os_error(errno as i32).into()),
		}
	}
	trace!("copy_file_range moved {copied} bytes");
	Ok(Some(copied))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alloc::UnpooledAllocator;

	fn slice_source(data: &[u8]) -> MessageSource<'_> {
		MessageSource::new(SliceSource::new(data), &UnpooledAllocator, 16).unwrap()
	}

	#[test]
	fn big_endian_primitives() {
		let data = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0];
		let mut source = slice_source(&data);
		assert_eq!(source.read_u16().unwrap(), 0x1234);
		assert_eq!(source.read_u16().unwrap(), 0x5678);
		assert_eq!(source.read_i32().unwrap(), 0x9abcdef0u32 as i32);
	}

	#[test]
	fn peek_does_not_consume() {
		let mut source = slice_source(&[7, 8]);
		assert_eq!(source.next_byte().unwrap(), 7);
		assert_eq!(source.read_byte().unwrap(), 7);
		assert_eq!(source.read_byte().unwrap(), 8);
	}

	#[test]
	fn refill_crosses_buffer_boundary() {
		// 40 bytes through a 16-byte working buffer forces compaction and refills.
		let data: Vec<u8> = (0..40).collect();
		let mut source = slice_source(&data);
		for chunk in data.chunks(5) {
			let mut out = [0u8; 5];
			source.ensure_remaining(5).unwrap();
			source.read_exact(&mut out).unwrap();
			assert_eq!(&out, chunk);
		}
	}

	#[test]
	fn premature_end_of_input() {
		let mut source = slice_source(&[1, 2, 3]);
		match source.read_u64() {
			Err(Error::PrematureEndOfInput { required: 8, got: 3 }) => (),
			other => panic!("expected premature EOF, got {other:?}"),
		}
	}

	#[test]
	fn length32_ceiling() {
		let mut source = slice_source(&[0x80, 0x00, 0x00, 0x00]);
		match source.read_length32() {
			Err(Error::LengthTooLarge { length: 0x8000_0000, .. }) => (),
			other => panic!("expected LengthTooLarge, got {other:?}"),
		}
	}

	#[test]
	fn skip_spans_buffer_and_provider() {
		let data: Vec<u8> = (0..100).collect();
		let mut source = slice_source(&data);
		source.ensure_remaining(10).unwrap();
		source.skip(50).unwrap();
		assert_eq!(source.read_byte().unwrap(), 50);
		source.skip(48).unwrap();
		assert_eq!(source.read_byte().unwrap(), 99);
		assert!(matches!(source.skip(1), Err(Error::PrematureEndOfInput { .. })));
	}

	#[test]
	fn read_exact_larger_than_buffer() {
		let data: Vec<u8> = (0..64).collect();
		let mut source = slice_source(&data);
		source.ensure_remaining(4).unwrap();
		let mut out = vec![0u8; 64];
		source.read_exact(&mut out).unwrap();
		assert_eq!(out, data);
	}
}
