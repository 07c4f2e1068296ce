use crate::error::Result;
use std::{
	fs::File,
	io::{IoSlice, Write},
	os::unix::io::{AsRawFd, RawFd},
};

/// The I/O resource a [`MessageSink`](super::MessageSink) drains into.
///
/// Writes are all-or-nothing: a provider must fully drain every range it is given.
pub trait SinkProvider {
	fn write(&mut self, buf: &[u8]) -> Result<()>;

	/// Drain several ranges in order. Providers with a vectored syscall can do this in one call.
	fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<()> {
		for buf in bufs {
			self.write(buf)?;
		}
		Ok(())
	}

	fn flush(&mut self) -> Result<()>;

	/// The file descriptor behind this provider, when there is one. See
	/// [`SourceProvider::raw_fd`](crate::source::SourceProvider::raw_fd).
	fn raw_fd(&self) -> Option<RawFd> {
		None
	}

	/// Flush and release the underlying resource.
	fn close(&mut self) -> Result<()> {
		self.flush()
	}
}

/// Adapter over any blocking [`Write`] stream.
#[derive(Debug)]
pub struct StreamSink<W> {
	inner: W,
}

impl<W: Write> StreamSink<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

impl<W: Write> SinkProvider for StreamSink<W> {
	fn write(&mut self, buf: &[u8]) -> Result<()> {
		Ok(self.inner.write_all(buf)?)
	}

	fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<()> {
		let total: usize = bufs.iter().map(|buf| buf.len()).sum();
		let mut written = self.inner.write_vectored(bufs)?;
		if written == total {
			return Ok(());
		}
		// Partial vectored write; finish slice by slice.
		for buf in bufs {
			if written >= buf.len() {
				written -= buf.len();
				continue;
			}
			self.inner.write_all(&buf[written..])?;
			written = 0;
		}
		Ok(())
	}

	fn flush(&mut self) -> Result<()> {
		Ok(self.inner.flush()?)
	}
}

/// Adapter collecting output into a caller-owned byte vector.
#[derive(Debug)]
pub struct VecSink<'a> {
	out: &'a mut Vec<u8>,
}

impl<'a> VecSink<'a> {
	pub fn new(out: &'a mut Vec<u8>) -> Self {
		Self { out }
	}
}

impl SinkProvider for VecSink<'_> {
	fn write(&mut self, buf: &[u8]) -> Result<()> {
		self.out.extend_from_slice(buf);
		Ok(())
	}

	fn flush(&mut self) -> Result<()> {
		Ok(())
	}
}

/// Adapter that throws output away, counting what it discarded.
#[derive(Debug, Default)]
pub struct DiscardSink {
	written: u64,
}

impl DiscardSink {
	pub fn new() -> Self {
		Self::default()
	}

	/// Bytes discarded so far.
	pub fn written(&self) -> u64 {
		self.written
	}
}

impl SinkProvider for DiscardSink {
	fn write(&mut self, buf: &[u8]) -> Result<()> {
		self.written += buf.len() as u64;
		Ok(())
	}

	fn flush(&mut self) -> Result<()> {
		Ok(())
	}
}

/// Adapter over a [`File`]: bulk transfers can run fd-to-fd.
#[derive(Debug)]
pub struct FileSink {
	file: File,
}

impl FileSink {
	pub fn new(file: File) -> Self {
		Self { file }
	}
}

impl SinkProvider for FileSink {
	fn write(&mut self, buf: &[u8]) -> Result<()> {
		Ok(self.file.write_all(buf)?)
	}

	fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<()> {
		let total: usize = bufs.iter().map(|buf| buf.len()).sum();
		let mut written = self.file.write_vectored(bufs)?;
		if written == total {
			return Ok(());
		}
		for buf in bufs {
			if written >= buf.len() {
				written -= buf.len();
				continue;
			}
			self.file.write_all(&buf[written..])?;
			written = 0;
		}
		Ok(())
	}

	fn flush(&mut self) -> Result<()> {
		Ok(self.file.flush()?)
	}

	fn raw_fd(&self) -> Option<RawFd> {
		Some(self.file.as_raw_fd())
	}
}
