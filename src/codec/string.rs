use super::{read_str_header, write_str_header, ValueDecoder, ValueEncoder};
use crate::{
	alloc::{BufferAllocator, LeasedBytes, PooledAllocator},
	error::{Error, Result},
	format::tag,
	sink::MessageSink,
	source::MessageSource,
};
use std::{char, str, sync::Arc};

/// Behavior knobs for [`Utf8Codec`].
#[derive(Debug, Clone)]
pub struct StringOptions {
	/// Decoded strings above this byte length are rejected.
	pub max_string_size: usize,
	/// Fail on ill-formed input instead of substituting U+FFFD.
	pub strict: bool,
}

impl Default for StringOptions {
	fn default() -> Self {
		Self { max_string_size: 1024 * 1024, strict: false }
	}
}

/// The built-in string codec.
///
/// Encoding a `&str` is a header plus a byte copy; the byte length is known up front. The UTF-16
/// path cannot know its UTF-8 length without transcoding, so it reserves a worst-case header,
/// streams code points into the sink buffer (overflowing into a leased buffer), and patches the
/// header afterwards. Decoding transcodes in place when the payload is already buffered and
/// through a leased buffer otherwise.
pub struct Utf8Codec {
	allocator: Arc<dyn BufferAllocator>,
	options: StringOptions,
}

impl Utf8Codec {
	pub fn new(allocator: Arc<dyn BufferAllocator>, options: StringOptions) -> Self {
		Self { allocator, options }
	}

	/// Encode UTF-16 code units as a MessagePack string without materializing a `String`.
	///
	/// Unpaired surrogates become U+FFFD, or [`Error::InvalidSurrogatePair`] under
	/// [`StringOptions::strict`].
	pub fn encode_utf16(&mut self, units: &[u16], sink: &mut MessageSink<'_>) -> Result<()> {
		if units.is_empty() {
			return sink.write_byte(0xa0);
		}
		let worst = units
			.len()
			.checked_mul(3)
			.filter(|&worst| worst <= u32::MAX as usize)
			.ok_or(Error::StringTooLarge { length: units.len(), max: u32::MAX as usize / 3 })?;
		let header_len = str_header_width(worst);

		// Reserve the header now; everything up to the patch stays in the staging buffer.
		sink.ensure_remaining(header_len)?;
		let header_at = sink.position();
		sink.advance(header_len);

		let mut total = 0usize;
		let mut unit_index = 0usize;
		let mut overflow: Option<(LeasedBytes, usize)> = None;
		for decoded in char::decode_utf16(units.iter().copied()) {
			let ch = match decoded {
				Ok(ch) => ch,
				Err(_) if self.options.strict => return Err(Error::InvalidSurrogatePair(unit_index)),
				Err(_) => char::REPLACEMENT_CHARACTER,
			};
			let mut utf8 = [0u8; 4];
			let encoded = ch.encode_utf8(&mut utf8).as_bytes();
			if let Some((spill, len)) = overflow.as_mut() {
				spill[*len..*len + encoded.len()].copy_from_slice(encoded);
				*len += encoded.len();
			} else if sink.remaining() >= encoded.len() {
				sink.tail_mut()[..encoded.len()].copy_from_slice(encoded);
				sink.advance(encoded.len());
			} else {
				// Sink buffer is full and flushing would tear the unpatched header away; spill
				// the rest into a leased buffer sized for the remaining worst case.
				let mut spill = self.allocator.byte_buffer((units.len() - unit_index) * 3)?;
				spill[..encoded.len()].copy_from_slice(encoded);
				overflow = Some((spill, encoded.len()));
			}
			total += encoded.len();
			unit_index += ch.len_utf16();
		}

		let header = str_header_bytes(header_len, total as u32);
		sink.patch(header_at, &header[..header_len]);
		if let Some((spill, len)) = overflow {
			sink.write_slice(&spill[..len])?;
		}
		Ok(())
	}

	fn transcode(&self, bytes: &[u8]) -> Result<String> {
		match str::from_utf8(bytes) {
			Ok(s) => Ok(s.to_owned()),
			Err(err) if self.options.strict => Err(Error::InvalidUtf8 { position: err.valid_up_to() }),
			Err(_) => Ok(String::from_utf8_lossy(bytes).into_owned()),
		}
	}
}

impl Default for Utf8Codec {
	fn default() -> Self {
		Self::new(PooledAllocator::global(), StringOptions::default())
	}
}

impl ValueEncoder<str> for Utf8Codec {
	fn encode(&mut self, value: &str, sink: &mut MessageSink<'_>) -> Result<()> {
		if value.len() > u32::MAX as usize {
			return Err(Error::StringTooLarge { length: value.len(), max: u32::MAX as usize });
		}
		write_str_header(sink, value.len() as u32)?;
		sink.write_slice(value.as_bytes())
	}
}

impl ValueDecoder<String> for Utf8Codec {
	fn decode(&mut self, source: &mut MessageSource<'_>) -> Result<String> {
		let length = read_str_header(source)? as usize;
		if length > self.options.max_string_size {
			return Err(Error::StringTooLarge { length, max: self.options.max_string_size });
		}
		if length == 0 {
			return Ok(String::new());
		}
		if length <= source.capacity() {
			source.ensure_remaining(length)?;
			let decoded = self.transcode(&source.buffered()[..length])?;
			source.consume(length);
			Ok(decoded)
		} else {
			let mut payload = self.allocator.byte_buffer(length)?;
			source.read_exact(&mut payload[..length])?;
			self.transcode(&payload[..length])
		}
	}
}

/// Header width needed for a string of at most `worst` bytes.
fn str_header_width(worst: usize) -> usize {
	if worst <= 31 {
		1
	} else if worst <= 0xff {
		2
	} else if worst <= 0xffff {
		3
	} else {
		5
	}
}

/// A string header of exactly `width` bytes. The length may be smaller than the width's natural
/// range; readers accept the longer form.
fn str_header_bytes(width: usize, length: u32) -> [u8; 5] {
	match width {
		1 => [0xa0 | length as u8, 0, 0, 0, 0],
		2 => [tag::STR8, length as u8, 0, 0, 0],
		3 => {
			let be = (length as u16).to_be_bytes();
			[tag::STR16, be[0], be[1], 0, 0]
		},
		_ => {
			let be = length.to_be_bytes();
			[tag::STR32, be[0], be[1], be[2], be[3]]
		},
	}
}
