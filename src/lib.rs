//! Streaming MessagePack encoder/decoder.
//!
//! A [`MessageWriter`] stages values in a single reusable buffer and drains it to a pluggable
//! [`SinkProvider`](sink::SinkProvider); a [`MessageReader`] is the mirror image over a
//! [`SourceProvider`](source::SourceProvider). Working buffers come from a shared
//! [`BufferAllocator`](alloc::BufferAllocator), and string decoding can intern repeated map keys
//! by their on-wire bytes.
//!
//! ```
//! use wirepack::{MessageReader, MessageWriter};
//!
//! fn main() -> wirepack::Result<()> {
//! 	let mut out = Vec::new();
//! 	let mut writer = MessageWriter::to_vec(&mut out)?;
//! 	writer.write_array_header(2)?;
//! 	writer.write_i32(42)?;
//! 	writer.write_string("Hello, MiniPack!")?;
//! 	writer.close()?;
//!
//! 	let mut reader = MessageReader::from_slice(&out)?;
//! 	assert_eq!(reader.read_array_header()?, 2);
//! 	assert_eq!(reader.read_i32()?, 42);
//! 	assert_eq!(reader.read_string()?, "Hello, MiniPack!");
//! 	reader.close()
//! }
//! ```
//!
//! Readers, writers, sources, and sinks are single-threaded; only allocators are meant to be
//! shared across threads.

pub mod alloc;
pub mod codec;
pub mod error;
pub mod format;
pub mod pool;
pub mod reader;
pub mod sink;
pub mod source;
pub mod writer;

pub use crate::{
	error::{Error, Result},
	format::{ExtensionHeader, Timestamp, ValueKind},
	reader::{MessageReader, ReaderOptions},
	writer::{MessageWriter, WriterOptions},
};

/// Smallest usable working buffer: one tag byte plus a 64-bit value.
pub(crate) const MIN_BUFFER_CAPACITY: usize = 9;
