use crate::{
	alloc::{BufferAllocator, PooledAllocator},
	codec::{self, IdentifierEncoder, IdentifierOptions, StringOptions, Utf8Codec, ValueEncoder},
	error::{Error, Result},
	format::{tag, Timestamp},
	sink::{MessageSink, SinkProvider, VecSink},
};
use std::sync::Arc;

/// Configuration for a [`MessageWriter`].
pub struct WriterOptions {
	pub allocator: Arc<dyn BufferAllocator>,
	/// Working buffer size; at least 9 bytes so any fixed-width value fits.
	pub buffer_capacity: usize,
	pub string_encoder: Box<dyn ValueEncoder<str>>,
	pub identifier_encoder: Box<dyn ValueEncoder<str>>,
}

impl Default for WriterOptions {
	fn default() -> Self {
		let allocator: Arc<dyn BufferAllocator> = PooledAllocator::global();
		Self {
			string_encoder: Box::new(Utf8Codec::new(Arc::clone(&allocator), StringOptions::default())),
			identifier_encoder: Box::new(IdentifierEncoder::new(IdentifierOptions::default())),
			buffer_capacity: 8 * 1024,
			allocator,
		}
	}
}

/// Writes MessagePack values to a [`SinkProvider`], always in the minimum-width encoding.
///
/// The writer owns its sink exclusively; closing it flushes and closes the provider. After a
/// container header the caller must write exactly the announced number of values (twice that for
/// maps); the writer does not verify this.
///
/// Not safe for concurrent use.
pub struct MessageWriter<'p> {
	sink: MessageSink<'p>,
	string_encoder: Box<dyn ValueEncoder<str>>,
	identifier_encoder: Box<dyn ValueEncoder<str>>,
}

impl<'p> MessageWriter<'p> {
	pub fn new(provider: impl SinkProvider + 'p, options: WriterOptions) -> Result<Self> {
		let sink = MessageSink::new(provider, &*options.allocator, options.buffer_capacity)?;
		Ok(Self {
			sink,
			string_encoder: options.string_encoder,
			identifier_encoder: options.identifier_encoder,
		})
	}

	/// Write into a caller-owned byte vector with default options.
	pub fn to_vec(out: &'p mut Vec<u8>) -> Result<Self> {
		Self::new(VecSink::new(out), WriterOptions::default())
	}

	pub fn write_nil(&mut self) -> Result<()> {
		self.sink.write_byte(tag::NIL)
	}

	pub fn write_bool(&mut self, value: bool) -> Result<()> {
		self.sink.write_byte(if value { tag::TRUE } else { tag::FALSE })
	}

	/// Write a signed integer in its narrowest form. Non-negative values use the unsigned forms.
	pub fn write_i64(&mut self, value: i64) -> Result<()> {
		if value >= 0 {
			return self.write_u64(value as u64);
		}
		if value >= -32 {
			return self.sink.write_byte(value as i8 as u8);
		}
		if value >= i8::MIN as i64 {
			return self.sink.write_tag_and_i8(tag::INT8, value as i8);
		}
		if value >= i16::MIN as i64 {
			return self.sink.write_tag_and_i16(tag::INT16, value as i16);
		}
		if value >= i32::MIN as i64 {
			return self.sink.write_tag_and_i32(tag::INT32, value as i32);
		}
		self.sink.write_tag_and_i64(tag::INT64, value)
	}

	/// Write an unsigned integer in its narrowest form.
	pub fn write_u64(&mut self, value: u64) -> Result<()> {
		if value < 1 << 7 {
			return self.sink.write_byte(value as u8);
		}
		if value <= 0xff {
			return self.sink.write_tag_and_u8(tag::UINT8, value as u8);
		}
		if value <= 0xffff {
			return self.sink.write_tag_and_u16(tag::UINT16, value as u16);
		}
		if value <= 0xffff_ffff {
			return self.sink.write_tag_and_u32(tag::UINT32, value as u32);
		}
		self.sink.write_tag_and_u64(tag::UINT64, value)
	}

	pub fn write_i8(&mut self, value: i8) -> Result<()> {
		self.write_i64(value as i64)
	}

	pub fn write_i16(&mut self, value: i16) -> Result<()> {
		self.write_i64(value as i64)
	}

	pub fn write_i32(&mut self, value: i32) -> Result<()> {
		self.write_i64(value as i64)
	}

	pub fn write_u8(&mut self, value: u8) -> Result<()> {
		self.write_u64(value as u64)
	}

	pub fn write_u16(&mut self, value: u16) -> Result<()> {
		self.write_u64(value as u64)
	}

	pub fn write_u32(&mut self, value: u32) -> Result<()> {
		self.write_u64(value as u64)
	}

	/// Write a `float32`. Single-precision input is never promoted.
	pub fn write_f32(&mut self, value: f32) -> Result<()> {
		self.sink.write_tag_and_f32(tag::FLOAT32, value)
	}

	pub fn write_f64(&mut self, value: f64) -> Result<()> {
		self.sink.write_tag_and_f64(tag::FLOAT64, value)
	}

	/// Write a timestamp in the shortest of its three forms.
	pub fn write_timestamp(&mut self, timestamp: Timestamp) -> Result<()> {
		let seconds = timestamp.seconds();
		let nanos = timestamp.nanos();
		if nanos == 0 && (0..=u32::MAX as i64).contains(&seconds) {
			self.sink.write_tag_and_i8(tag::FIXEXT4, crate::format::TIMESTAMP_EXT_TYPE)?;
			self.sink.write_u32(seconds as u32)
		} else if (0..1 << 34).contains(&seconds) {
			let packed = ((nanos as u64) << 34) | seconds as u64;
			self.sink.write_tag_and_i8(tag::FIXEXT8, crate::format::TIMESTAMP_EXT_TYPE)?;
			self.sink.write_u64(packed)
		} else {
			self.sink.write_tag_and_u8(tag::EXT8, 12)?;
			self.sink.write_i8(crate::format::TIMESTAMP_EXT_TYPE)?;
			self.sink.write_u32(nanos)?;
			self.sink.write_i64(seconds)
		}
	}

	pub fn write_array_header(&mut self, count: u32) -> Result<()> {
		if count <= 15 {
			self.sink.write_byte(0x90 | count as u8)
		} else if count <= 0xffff {
			self.sink.write_tag_and_u16(tag::ARRAY16, count as u16)
		} else {
			self.sink.write_tag_and_u32(tag::ARRAY32, count)
		}
	}

	pub fn write_map_header(&mut self, count: u32) -> Result<()> {
		if count <= 15 {
			self.sink.write_byte(0x80 | count as u8)
		} else if count <= 0xffff {
			self.sink.write_tag_and_u16(tag::MAP16, count as u16)
		} else {
			self.sink.write_tag_and_u32(tag::MAP32, count)
		}
	}

	pub fn write_string_header(&mut self, length: u32) -> Result<()> {
		codec::write_str_header(&mut self.sink, length)
	}

	pub fn write_binary_header(&mut self, length: u32) -> Result<()> {
		if length <= 0xff {
			self.sink.write_tag_and_u8(tag::BIN8, length as u8)
		} else if length <= 0xffff {
			self.sink.write_tag_and_u16(tag::BIN16, length as u16)
		} else {
			self.sink.write_tag_and_u32(tag::BIN32, length)
		}
	}

	/// Write an extension header; payload lengths 1, 2, 4, 8, and 16 use the fixext forms.
	pub fn write_extension_header(&mut self, length: u32, ext_type: i8) -> Result<()> {
		let fixext = match length {
			1 => Some(tag::FIXEXT1),
			2 => Some(tag::FIXEXT2),
			4 => Some(tag::FIXEXT4),
			8 => Some(tag::FIXEXT8),
			16 => Some(tag::FIXEXT16),
			_ => None,
		};
		if let Some(fixext) = fixext {
			return self.sink.write_tag_and_i8(fixext, ext_type);
		}
		if length <= 0xff {
			self.sink.write_tag_and_u8(tag::EXT8, length as u8)?;
		} else if length <= 0xffff {
			self.sink.write_tag_and_u16(tag::EXT16, length as u16)?;
		} else {
			self.sink.write_tag_and_u32(tag::EXT32, length)?;
		}
		self.sink.write_i8(ext_type)
	}

	/// Write a string through the configured string encoder.
	pub fn write_string(&mut self, value: &str) -> Result<()> {
		self.string_encoder.encode(value, &mut self.sink)
	}

	/// Write an identifier through the configured identifier encoder; repeated identifiers go on
	/// the wire as references.
	pub fn write_identifier(&mut self, value: &str) -> Result<()> {
		self.identifier_encoder.encode(value, &mut self.sink)
	}

	/// Write payload bytes announced by a preceding header.
	pub fn write_payload(&mut self, bytes: &[u8]) -> Result<()> {
		self.sink.write_slice(bytes)
	}

	/// Write a whole binary value: header plus payload.
	pub fn write_binary(&mut self, bytes: &[u8]) -> Result<()> {
		if bytes.len() > u32::MAX as usize {
			return Err(Error::LengthTooLarge { length: u32::MAX, max: u32::MAX });
		}
		self.write_binary_header(bytes.len() as u32)?;
		self.write_payload(bytes)
	}

	/// Write a value through a caller-supplied encoder.
	pub fn write_value<T: ?Sized>(&mut self, encoder: &mut dyn ValueEncoder<T>, value: &T) -> Result<()> {
		encoder.encode(value, &mut self.sink)
	}

	/// Access the underlying sink, e.g. for bulk transfers.
	pub fn sink_mut(&mut self) -> &mut MessageSink<'p> {
		&mut self.sink
	}

	/// Flush staged bytes through to the provider.
	pub fn flush(&mut self) -> Result<()> {
		self.sink.flush()
	}

	/// Flush everything and close the provider.
	pub fn close(self) -> Result<()> {
		self.sink.close()
	}
}
