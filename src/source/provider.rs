use crate::error::{Error, Result};
use std::{
	fs::File,
	io::{ErrorKind, Read, Seek, SeekFrom},
	os::unix::io::{AsRawFd, RawFd},
};

/// The I/O resource a [`MessageSource`](super::MessageSource) reads from.
///
/// Providers are blocking: `read` must not return until at least one byte arrived or the input
/// ended. `Ok(0)` means end of input. A provider that fails with [`ErrorKind::WouldBlock`] makes
/// the source fail loudly instead of spinning.
pub trait SourceProvider {
	/// Fill the start of `buf`, returning the byte count. `min_hint` is how many bytes the caller
	/// needs before it can make progress; providers may use it to size their own reads but are
	/// free to return less.
	fn read(&mut self, buf: &mut [u8], min_hint: usize) -> Result<usize>;

	/// Discard `count` bytes. The caller passes its (drained) working buffer as scratch space;
	/// seekable providers can reposition instead of reading.
	fn skip(&mut self, count: usize, scratch: &mut [u8]) -> Result<()> {
		let mut left = count;
		while left > 0 {
			let chunk = left.min(scratch.len());
			let n = self.read(&mut scratch[..chunk], chunk)?;
			if n == 0 {
				return Err(Error::PrematureEndOfInput { required: count, got: count - left });
			}
			left -= n;
		}
		Ok(())
	}

	/// The file descriptor behind this provider, when there is one. Lets bulk transfers between
	/// fd-backed providers go through `copy_file_range` instead of the working buffer.
	fn raw_fd(&self) -> Option<RawFd> {
		None
	}

	/// Release the underlying resource.
	fn close(&mut self) -> Result<()> {
		Ok(())
	}
}

/// Adapter over any blocking [`Read`] stream.
#[derive(Debug)]
pub struct StreamSource<R> {
	inner: R,
}

impl<R: Read> StreamSource<R> {
	pub fn new(inner: R) -> Self {
		Self { inner }
	}
}

impl<R: Read> SourceProvider for StreamSource<R> {
	fn read(&mut self, buf: &mut [u8], _min_hint: usize) -> Result<usize> {
		loop {
			match self.inner.read(buf) {
				Ok(n) => return Ok(n),
				Err(err) if err.kind() == ErrorKind::Interrupted => continue,
				Err(err) => return Err(err.into()),
			}
		}
	}
}

/// Adapter over an in-memory byte slice.
#[derive(Debug)]
pub struct SliceSource<'a> {
	data: &'a [u8],
}

impl<'a> SliceSource<'a> {
	pub fn new(data: &'a [u8]) -> Self {
		Self { data }
	}
}

impl SourceProvider for SliceSource<'_> {
	fn read(&mut self, buf: &mut [u8], _min_hint: usize) -> Result<usize> {
		let n = buf.len().min(self.data.len());
		buf[..n].copy_from_slice(&self.data[..n]);
		self.data = &self.data[n..];
		Ok(n)
	}

	fn skip(&mut self, count: usize, _scratch: &mut [u8]) -> Result<()> {
		if count > self.data.len() {
			return Err(Error::PrematureEndOfInput { required: count, got: self.data.len() });
		}
		self.data = &self.data[count..];
		Ok(())
	}
}

/// Adapter over a [`File`]: skips reposition with `seek` and bulk transfers can run fd-to-fd.
#[derive(Debug)]
pub struct FileSource {
	file: File,
}

impl FileSource {
	pub fn new(file: File) -> Self {
		Self { file }
	}
}

impl SourceProvider for FileSource {
	fn read(&mut self, buf: &mut [u8], _min_hint: usize) -> Result<usize> {
		loop {
			match self.file.read(buf) {
				Ok(n) => return Ok(n),
				Err(err) if err.kind() == ErrorKind::Interrupted => continue,
				Err(err) => return Err(err.into()),
			}
		}
	}

	fn skip(&mut self, count: usize, _scratch: &mut [u8]) -> Result<()> {
		self.file.seek(SeekFrom::Current(count as i64))?;
		Ok(())
	}

	fn raw_fd(&self) -> Option<RawFd> {
		Some(self.file.as_raw_fd())
	}
}
