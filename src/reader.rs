use crate::{
	alloc::{BufferAllocator, PooledAllocator},
	codec::{self, IdentifierDecoder, IdentifierOptions, StringOptions, Utf8Codec, ValueDecoder},
	error::{Error, Result},
	format::{self, tag, ExtensionHeader, Timestamp, ValueKind, TIMESTAMP_EXT_TYPE},
	source::{MessageSource, SliceSource, SourceProvider},
};
use std::{rc::Rc, sync::Arc};

/// Configuration for a [`MessageReader`].
pub struct ReaderOptions {
	pub allocator: Arc<dyn BufferAllocator>,
	/// Working buffer size; at least 9 bytes so any fixed-width value fits.
	pub buffer_capacity: usize,
	pub string_decoder: Box<dyn ValueDecoder<String>>,
	pub identifier_decoder: Box<dyn ValueDecoder<Rc<str>>>,
}

impl Default for ReaderOptions {
	fn default() -> Self {
		let allocator: Arc<dyn BufferAllocator> = PooledAllocator::global();
		Self {
			string_decoder: Box::new(Utf8Codec::new(Arc::clone(&allocator), StringOptions::default())),
			identifier_decoder: Box::new(IdentifierDecoder::new(IdentifierOptions::default())),
			buffer_capacity: 8 * 1024,
			allocator,
		}
	}
}

/// Reads MessagePack values from a [`SourceProvider`].
///
/// The reader owns its source exclusively; closing it closes the provider. A failed read leaves
/// the stream position undefined (the offending bytes are consumed, not rolled back), so callers
/// should close the reader after any error.
///
/// Not safe for concurrent use.
pub struct MessageReader<'p> {
	source: MessageSource<'p>,
	string_decoder: Box<dyn ValueDecoder<String>>,
	identifier_decoder: Box<dyn ValueDecoder<Rc<str>>>,
}

impl<'p> MessageReader<'p> {
	pub fn new(provider: impl SourceProvider + 'p, options: ReaderOptions) -> Result<Self> {
		let source = MessageSource::new(provider, &*options.allocator, options.buffer_capacity)?;
		Ok(Self {
			source,
			string_decoder: options.string_decoder,
			identifier_decoder: options.identifier_decoder,
		})
	}

	/// Read from an in-memory buffer with default options.
	pub fn from_slice(data: &'p [u8]) -> Result<Self> {
		Self::new(SliceSource::new(data), ReaderOptions::default())
	}

	/// The kind of the next value, without consuming anything.
	pub fn next_kind(&mut self) -> Result<ValueKind> {
		ValueKind::from_tag(self.source.next_byte()?)
	}

	pub fn read_nil(&mut self) -> Result<()> {
		let tag = self.source.read_byte()?;
		if tag != tag::NIL {
			return Err(codec::mismatch(tag, ValueKind::Nil));
		}
		Ok(())
	}

	pub fn read_bool(&mut self) -> Result<bool> {
		let tag = self.source.read_byte()?;
		match tag {
			tag::FALSE => Ok(false),
			tag::TRUE => Ok(true),
			_ => Err(codec::mismatch(tag, ValueKind::Bool)),
		}
	}

	/// Read any integer form, then range-check it against the destination type.
	fn read_int(&mut self, requested: ValueKind, target: &'static str, min: i128, max: i128) -> Result<i128> {
		let tag = self.source.read_byte()?;
		let value: i128 = if format::is_pos_fix_int(tag) {
			tag as i128
		} else if format::is_neg_fix_int(tag) {
			tag as i8 as i128
		} else {
			match tag {
				tag::INT8 => self.source.read_i8()? as i128,
				tag::INT16 => self.source.read_i16()? as i128,
				tag::INT32 => self.source.read_i32()? as i128,
				tag::INT64 => self.source.read_i64()? as i128,
				tag::UINT8 => self.source.read_u8()? as i128,
				tag::UINT16 => self.source.read_u16()? as i128,
				tag::UINT32 => self.source.read_u32()? as i128,
				tag::UINT64 => self.source.read_u64()? as i128,
				_ => return Err(codec::mismatch(tag, requested)),
			}
		};
		if value < min || value > max {
			return Err(Error::IntegerOverflow { value, target });
		}
		Ok(value)
	}

	pub fn read_i8(&mut self) -> Result<i8> {
		Ok(self.read_int(ValueKind::Int, "i8", i8::MIN as i128, i8::MAX as i128)? as i8)
	}

	pub fn read_i16(&mut self) -> Result<i16> {
		Ok(self.read_int(ValueKind::Int, "i16", i16::MIN as i128, i16::MAX as i128)? as i16)
	}

	pub fn read_i32(&mut self) -> Result<i32> {
		Ok(self.read_int(ValueKind::Int, "i32", i32::MIN as i128, i32::MAX as i128)? as i32)
	}

	pub fn read_i64(&mut self) -> Result<i64> {
		Ok(self.read_int(ValueKind::Int, "i64", i64::MIN as i128, i64::MAX as i128)? as i64)
	}

	pub fn read_u8(&mut self) -> Result<u8> {
		Ok(self.read_int(ValueKind::UInt, "u8", 0, u8::MAX as i128)? as u8)
	}

	pub fn read_u16(&mut self) -> Result<u16> {
		Ok(self.read_int(ValueKind::UInt, "u16", 0, u16::MAX as i128)? as u16)
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		Ok(self.read_int(ValueKind::UInt, "u32", 0, u32::MAX as i128)? as u32)
	}

	pub fn read_u64(&mut self) -> Result<u64> {
		Ok(self.read_int(ValueKind::UInt, "u64", 0, u64::MAX as i128)? as u64)
	}

	/// Read a `float32`. A `float64` on the wire is a type mismatch, not a narrowing.
	pub fn read_f32(&mut self) -> Result<f32> {
		let tag = self.source.read_byte()?;
		if tag != tag::FLOAT32 {
			return Err(codec::mismatch(tag, ValueKind::Float32));
		}
		self.source.read_f32()
	}

	/// Read a `float64`. A `float32` on the wire is a type mismatch, not a widening.
	pub fn read_f64(&mut self) -> Result<f64> {
		let tag = self.source.read_byte()?;
		if tag != tag::FLOAT64 {
			return Err(codec::mismatch(tag, ValueKind::Float64));
		}
		self.source.read_f64()
	}

	pub fn read_timestamp(&mut self) -> Result<Timestamp> {
		let header = codec::read_ext_header(&mut self.source)?;
		if header.ext_type != TIMESTAMP_EXT_TYPE {
			return Err(Error::TimestampTypeMismatch(header.ext_type));
		}
		let (seconds, nanos) = match header.length {
			4 => (self.source.read_u32()? as i64, 0),
			8 => {
				let packed = self.source.read_u64()?;
				((packed & 0x3_ffff_ffff) as i64, (packed >> 34) as u32)
			},
			12 => {
				let nanos = self.source.read_u32()?;
				(self.source.read_i64()?, nanos)
			},
			other => return Err(Error::InvalidTimestampLength(other)),
		};
		if nanos >= 1_000_000_000 {
			return Err(Error::IntegerOverflow { value: nanos as i128, target: "timestamp nanoseconds" });
		}
		Ok(Timestamp::new(seconds, nanos))
	}

	pub fn read_array_header(&mut self) -> Result<u32> {
		let tag = self.source.read_byte()?;
		if format::is_fix_array(tag) {
			return Ok(format::fix_array_length(tag));
		}
		match tag {
			tag::ARRAY16 => self.source.read_length16(),
			tag::ARRAY32 => self.source.read_length32(),
			_ => Err(codec::mismatch(tag, ValueKind::Array)),
		}
	}

	pub fn read_map_header(&mut self) -> Result<u32> {
		let tag = self.source.read_byte()?;
		if format::is_fix_map(tag) {
			return Ok(format::fix_map_length(tag));
		}
		match tag {
			tag::MAP16 => self.source.read_length16(),
			tag::MAP32 => self.source.read_length32(),
			_ => Err(codec::mismatch(tag, ValueKind::Map)),
		}
	}

	pub fn read_binary_header(&mut self) -> Result<u32> {
		let tag = self.source.read_byte()?;
		match tag {
			tag::BIN8 => self.source.read_length8(),
			tag::BIN16 => self.source.read_length16(),
			tag::BIN32 => self.source.read_length32(),
			_ => Err(codec::mismatch(tag, ValueKind::Bin)),
		}
	}

	pub fn read_string_header(&mut self) -> Result<u32> {
		codec::read_str_header(&mut self.source)
	}

	pub fn read_extension_header(&mut self) -> Result<ExtensionHeader> {
		codec::read_ext_header(&mut self.source)
	}

	/// Fill `dest` with payload bytes announced by a preceding header.
	pub fn read_payload(&mut self, dest: &mut [u8]) -> Result<()> {
		self.source.read_exact(dest)
	}

	/// Read a whole binary value: header plus payload.
	pub fn read_binary(&mut self) -> Result<Vec<u8>> {
		let length = self.read_binary_header()? as usize;
		let mut payload = vec![0; length];
		self.source.read_exact(&mut payload)?;
		Ok(payload)
	}

	/// Read a string through the configured string decoder.
	pub fn read_string(&mut self) -> Result<String> {
		self.string_decoder.decode(&mut self.source)
	}

	/// Read an identifier through the configured identifier decoder; repeated identifiers share
	/// one allocation.
	pub fn read_identifier(&mut self) -> Result<Rc<str>> {
		self.identifier_decoder.decode(&mut self.source)
	}

	/// Read a value through a caller-supplied decoder.
	pub fn read_value<T>(&mut self, decoder: &mut dyn ValueDecoder<T>) -> Result<T> {
		decoder.decode(&mut self.source)
	}

	/// Skip the next whole value, however deeply nested.
	pub fn skip_value(&mut self) -> Result<()> {
		self.skip_values(1)
	}

	/// Skip the next `count` whole values.
	pub fn skip_values(&mut self, count: u32) -> Result<()> {
		let mut left = count as u64;
		while left > 0 {
			left -= 1;
			let tag = self.source.read_byte()?;
			if format::is_fix_int(tag) {
				continue;
			}
			if format::is_fix_str(tag) {
				self.source.skip(format::fix_str_length(tag) as usize)?;
				continue;
			}
			if format::is_fix_array(tag) {
				left += format::fix_array_length(tag) as u64;
				continue;
			}
			if format::is_fix_map(tag) {
				left += 2 * format::fix_map_length(tag) as u64;
				continue;
			}
			match tag {
				tag::NIL | tag::FALSE | tag::TRUE => (),
				tag::NEVER_USED => return Err(Error::InvalidFormat(tag)),
				tag::UINT8 | tag::INT8 => self.source.skip(1)?,
				tag::UINT16 | tag::INT16 => self.source.skip(2)?,
				tag::UINT32 | tag::INT32 | tag::FLOAT32 => self.source.skip(4)?,
				tag::UINT64 | tag::INT64 | tag::FLOAT64 => self.source.skip(8)?,
				tag::FIXEXT1 => self.source.skip(2)?,
				tag::FIXEXT2 => self.source.skip(3)?,
				tag::FIXEXT4 => self.source.skip(5)?,
				tag::FIXEXT8 => self.source.skip(9)?,
				tag::FIXEXT16 => self.source.skip(17)?,
				tag::BIN8 | tag::STR8 => {
					let length = self.source.read_length8()?;
					self.source.skip(length as usize)?;
				},
				tag::BIN16 | tag::STR16 => {
					let length = self.source.read_length16()?;
					self.source.skip(length as usize)?;
				},
				tag::BIN32 | tag::STR32 => {
					let length = self.source.read_length32()?;
					self.source.skip(length as usize)?;
				},
				tag::EXT8 => {
					let length = self.source.read_length8()?;
					self.source.skip(length as usize + 1)?;
				},
				tag::EXT16 => {
					let length = self.source.read_length16()?;
					self.source.skip(length as usize + 1)?;
				},
				tag::EXT32 => {
					let length = self.source.read_length32()?;
					self.source.skip(length as usize + 1)?;
				},
				tag::ARRAY16 => left += self.source.read_length16()? as u64,
				tag::ARRAY32 => left += self.source.read_length32()? as u64,
				tag::MAP16 => left += 2 * self.source.read_length16()? as u64,
				tag::MAP32 => left += 2 * self.source.read_length32()? as u64,
				_ => unreachable!("fix-range tags handled above"),
			}
		}
		Ok(())
	}

	/// Access the underlying source, e.g. for bulk transfers.
	pub fn source_mut(&mut self) -> &mut MessageSource<'p> {
		&mut self.source
	}

	/// Close the source and its provider.
	pub fn close(self) -> Result<()> {
		self.source.close()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn reader(bytes: &[u8]) -> MessageReader<'_> {
		MessageReader::from_slice(bytes).unwrap()
	}

	#[test]
	fn integer_tags_dispatch() {
		assert_eq!(reader(&[0x2a]).read_i32().unwrap(), 42);
		assert_eq!(reader(&[0xff]).read_i32().unwrap(), -1);
		assert_eq!(reader(&[0xd0, 0xdf]).read_i32().unwrap(), -33);
		assert_eq!(reader(&[0xcc, 0xff]).read_i32().unwrap(), 255);
		assert_eq!(reader(&[0xcd, 0x80, 0x00]).read_i32().unwrap(), 0x8000);
		assert_eq!(reader(&[0xd2, 0x80, 0x00, 0x00, 0x00]).read_i32().unwrap(), i32::MIN);
		assert_eq!(reader(&[0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).read_u64().unwrap(), u64::MAX);
	}

	#[test]
	fn overflow_preserves_the_value() {
		// 128 does not fit an i8.
		match reader(&[0xcc, 0x80]).read_i8() {
			Err(Error::IntegerOverflow { value: 128, target: "i8" }) => (),
			other => panic!("unexpected {other:?}"),
		}
		// u64::MAX does not fit an i64.
		match reader(&[0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).read_i64() {
			Err(Error::IntegerOverflow { value, target: "i64" }) => assert_eq!(value, u64::MAX as i128),
			other => panic!("unexpected {other:?}"),
		}
		// Negative values never fit unsigned destinations.
		match reader(&[0xff]).read_u32() {
			Err(Error::IntegerOverflow { value: -1, target: "u32" }) => (),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn floats_do_not_widen_or_narrow() {
		let f32_bytes = [0xca, 0x3f, 0x80, 0x00, 0x00];
		assert_eq!(reader(&f32_bytes).read_f32().unwrap(), 1.0);
		assert!(matches!(
			reader(&f32_bytes).read_f64(),
			Err(Error::TypeMismatch { tag: 0xca, requested: ValueKind::Float64 })
		));
		let f64_bytes = [0xcb, 0x3f, 0xf0, 0, 0, 0, 0, 0, 0];
		assert!(matches!(
			reader(&f64_bytes).read_f32(),
			Err(Error::TypeMismatch { tag: 0xcb, requested: ValueKind::Float32 })
		));
	}

	#[test]
	fn integers_are_not_floats() {
		assert!(matches!(
			reader(&[0xca, 0, 0, 0, 0]).read_i32(),
			Err(Error::TypeMismatch { tag: 0xca, requested: ValueKind::Int })
		));
	}

	#[test]
	fn invalid_tag_is_rejected() {
		assert!(matches!(reader(&[0xc1]).next_kind(), Err(Error::InvalidFormat(0xc1))));
	}

	#[test]
	fn headers() {
		assert_eq!(reader(&[0x93]).read_array_header().unwrap(), 3);
		assert_eq!(reader(&[0xdc, 0x01, 0x00]).read_array_header().unwrap(), 256);
		assert_eq!(reader(&[0x82]).read_map_header().unwrap(), 2);
		assert_eq!(reader(&[0xc4, 5]).read_binary_header().unwrap(), 5);
		assert_eq!(reader(&[0xb0]).read_string_header().unwrap(), 16);
		let header = reader(&[0xd6, 0xff, 0, 0, 0, 0]).read_extension_header().unwrap();
		assert_eq!(header, ExtensionHeader { ext_type: -1, length: 4 });
	}

	#[test]
	fn timestamp_forms() {
		let mut r = reader(&[0xd6, 0xff, 0x65, 0x53, 0xf3, 0x00]);
		assert_eq!(r.read_timestamp().unwrap(), Timestamp::new(1_700_000_000, 0));

		// 8-byte form: nanos 1 in the top 30 bits, seconds 2 in the low 34.
		let packed: u64 = (1 << 34) | 2;
		let mut bytes = vec![0xd7, 0xff];
		bytes.extend_from_slice(&packed.to_be_bytes());
		assert_eq!(reader(&bytes).read_timestamp().unwrap(), Timestamp::new(2, 1));

		// 12-byte form with negative seconds.
		let mut bytes = vec![0xc7, 12, 0xff];
		bytes.extend_from_slice(&500u32.to_be_bytes());
		bytes.extend_from_slice(&(-3i64).to_be_bytes());
		assert_eq!(reader(&bytes).read_timestamp().unwrap(), Timestamp::new(-3, 500));

		assert!(matches!(
			reader(&[0xd4, 0xff, 0x00]).read_timestamp(),
			Err(Error::InvalidTimestampLength(1))
		));
		assert!(matches!(
			reader(&[0xd6, 0x07, 0, 0, 0, 0]).read_timestamp(),
			Err(Error::TimestampTypeMismatch(7))
		));
	}

	#[test]
	fn skip_value_recurses() {
		// [1, {"k": "vv"}, bin(3), ext(2)] followed by 0x2a.
		let bytes = [
			0x94, // array of 4
			0x01, // 1
			0x81, 0xa1, b'k', 0xa2, b'v', b'v', // {"k": "vv"}
			0xc4, 3, 1, 2, 3, // bin
			0xd5, 0x07, 9, 9, // fixext2
			0x2a,
		];
		let mut r = reader(&bytes);
		r.skip_value().unwrap();
		assert_eq!(r.read_i32().unwrap(), 42);
	}

	#[test]
	fn premature_eof_surfaces() {
		assert!(matches!(reader(&[0xcd, 0x01]).read_i32(), Err(Error::PrematureEndOfInput { .. })));
		assert!(matches!(reader(&[]).next_kind(), Err(Error::PrematureEndOfInput { .. })));
	}
}
