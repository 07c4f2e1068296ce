use super::{read_ext_header, read_str_header, ValueDecoder, ValueEncoder};
use crate::{
	error::{Error, Result},
	format::{tag, ValueKind},
	sink::MessageSink,
	source::MessageSource,
};
use log::{debug, trace};
use slab::Slab;
use std::{collections::HashMap, rc::Rc};

/// Behavior knobs for the identifier codec pair.
#[derive(Debug, Clone)]
pub struct IdentifierOptions {
	/// Byte budget for cached identifier text. The decoder clears its cache past this; the
	/// encoder fails, because its peer cannot know a mapping was dropped.
	pub max_cache_size: usize,
	/// Extension type code for identifier definitions and references. Must be non-negative
	/// (negative codes are reserved by the format).
	pub extension_type: i8,
}

impl Default for IdentifierOptions {
	fn default() -> Self {
		Self { max_cache_size: 64 * 1024, extension_type: 8 }
	}
}

/// Write-side identifier interning.
///
/// The first occurrence of a string goes on the wire as a definition: an explicit-length
/// extension whose payload is the assigned id followed by the UTF-8 bytes. Every later
/// occurrence is a `fixext4` reference carrying only the id. The two encoding families keep a
/// 4-byte definition payload distinguishable from a reference.
pub struct IdentifierEncoder {
	ids: HashMap<Box<str>, u32>,
	cache_size: usize,
	options: IdentifierOptions,
}

impl IdentifierEncoder {
	pub fn new(options: IdentifierOptions) -> Self {
		assert!(options.extension_type >= 0, "extension type {} is reserved by the format", options.extension_type);
		Self { ids: HashMap::new(), cache_size: 0, options }
	}
}

impl Default for IdentifierEncoder {
	fn default() -> Self {
		Self::new(IdentifierOptions::default())
	}
}

impl ValueEncoder<str> for IdentifierEncoder {
	fn encode(&mut self, value: &str, sink: &mut MessageSink<'_>) -> Result<()> {
		if let Some(&id) = self.ids.get(value) {
			trace!("identifier {id} referenced again");
			sink.write_tag_and_i8(tag::FIXEXT4, self.options.extension_type)?;
			return sink.write_u32(id);
		}

		let id = self.ids.len() as u32;
		let payload_len = value.len() as u64 + 4;
		if payload_len <= 0xff {
			sink.write_tag_and_u8(tag::EXT8, payload_len as u8)?;
		} else if payload_len <= 0xffff {
			sink.write_tag_and_u16(tag::EXT16, payload_len as u16)?;
		} else if payload_len <= i32::MAX as u64 {
			sink.write_tag_and_u32(tag::EXT32, payload_len as u32)?;
		} else {
			return Err(Error::LengthTooLarge { length: u32::MAX, max: i32::MAX as u32 });
		}
		sink.write_i8(self.options.extension_type)?;
		sink.write_u32(id)?;
		sink.write_slice(value.as_bytes())?;

		self.ids.insert(value.into(), id);
		self.cache_size += value.len();
		if self.cache_size > self.options.max_cache_size {
			return Err(Error::IdentifierCacheSizeExceeded { max: self.options.max_cache_size });
		}
		Ok(())
	}
}

/// Read-side identifier interning.
///
/// Plain strings are deduplicated through a cache keyed by their on-wire bytes, so a repeated
/// key costs a hash lookup and a pointer clone, with no UTF-8 work. Streams produced by
/// [`IdentifierEncoder`] resolve through an id table instead.
pub struct IdentifierDecoder {
	cache: HashMap<Box<[u8]>, Rc<str>>,
	cache_size: usize,
	id_table: Slab<Rc<str>>,
	options: IdentifierOptions,
}

impl IdentifierDecoder {
	pub fn new(options: IdentifierOptions) -> Self {
		assert!(options.extension_type >= 0, "extension type {} is reserved by the format", options.extension_type);
		Self { cache: HashMap::new(), cache_size: 0, id_table: Slab::new(), options }
	}

	/// Total UTF-8 bytes currently cached.
	pub fn cache_size(&self) -> usize {
		self.cache_size
	}

	fn decode_interned(&mut self, source: &mut MessageSource<'_>) -> Result<Rc<str>> {
		let length = read_str_header(source)? as usize;
		if length > source.capacity() {
			return Err(Error::IdentifierTooLarge { length, capacity: source.capacity() });
		}
		source.ensure_remaining(length)?;
		let bytes = &source.buffered()[..length];
		if let Some(cached) = self.cache.get(bytes) {
			trace!("identifier cache hit ({length} bytes)");
			let interned = Rc::clone(cached);
			source.consume(length);
			return Ok(interned);
		}

		let decoded: Rc<str> = Rc::from(&*String::from_utf8_lossy(bytes));
		let key: Box<[u8]> = bytes.into();
		source.consume(length);
		self.cache.insert(key, Rc::clone(&decoded));
		self.cache_size += length;
		if self.cache_size > self.options.max_cache_size {
			debug!("identifier cache over its {}-byte budget, clearing", self.options.max_cache_size);
			self.cache.clear();
			self.cache_size = 0;
		}
		Ok(decoded)
	}

	fn decode_definition(&mut self, source: &mut MessageSource<'_>, tag: u8) -> Result<Rc<str>> {
		let header = read_ext_header(source)?;
		if header.ext_type != self.options.extension_type {
			return Err(Error::TypeMismatch { tag, requested: ValueKind::Str });
		}
		if header.length < 4 {
			return Err(Error::InvalidFormat(tag));
		}
		let id = source.read_u32()?;
		let length = header.length as usize - 4;
		if length > source.capacity() {
			return Err(Error::IdentifierTooLarge { length, capacity: source.capacity() });
		}
		source.ensure_remaining(length)?;
		let decoded: Rc<str> = Rc::from(&*String::from_utf8_lossy(&source.buffered()[..length]));
		source.consume(length);

		let assigned = self.id_table.insert(Rc::clone(&decoded)) as u32;
		if assigned != id {
			self.id_table.remove(assigned as usize);
			return Err(Error::UnknownIdentifier(id));
		}
		trace!("identifier {id} defined ({length} bytes)");
		Ok(decoded)
	}

	fn decode_reference(&mut self, source: &mut MessageSource<'_>, tag: u8) -> Result<Rc<str>> {
		let header = read_ext_header(source)?;
		if header.ext_type != self.options.extension_type {
			return Err(Error::TypeMismatch { tag, requested: ValueKind::Str });
		}
		let id = source.read_u32()?;
		self.id_table.get(id as usize).map(Rc::clone).ok_or(Error::UnknownIdentifier(id))
	}
}

impl Default for IdentifierDecoder {
	fn default() -> Self {
		Self::new(IdentifierOptions::default())
	}
}

impl ValueDecoder<Rc<str>> for IdentifierDecoder {
	fn decode(&mut self, source: &mut MessageSource<'_>) -> Result<Rc<str>> {
		let next = source.next_byte()?;
		match next {
			tag::EXT8 | tag::EXT16 | tag::EXT32 => self.decode_definition(source, next),
			tag::FIXEXT4 => self.decode_reference(source, next),
			_ => self.decode_interned(source),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{alloc::UnpooledAllocator, sink::VecSink, source::SliceSource};

	fn sink_into(out: &mut Vec<u8>) -> MessageSink<'_> {
		MessageSink::new(VecSink::new(out), &UnpooledAllocator, 64).unwrap()
	}

	fn source_over(data: &[u8]) -> MessageSource<'_> {
		MessageSource::new(SliceSource::new(data), &UnpooledAllocator, 64).unwrap()
	}

	#[test]
	fn encoder_defines_once_then_references() {
		let mut encoder = IdentifierEncoder::default();
		let mut out = Vec::new();
		let mut sink = sink_into(&mut out);
		encoder.encode("name", &mut sink).unwrap();
		encoder.encode("name", &mut sink).unwrap();
		sink.close().unwrap();

		// Definition: ext8, 8-byte payload, type 8, id 0, "name". Reference: fixext4, id 0.
		let definition = [tag::EXT8, 8, 8, 0, 0, 0, 0, b'n', b'a', b'm', b'e'];
		let reference = [tag::FIXEXT4, 8, 0, 0, 0, 0];
		assert_eq!(&out[..definition.len()], definition);
		assert_eq!(&out[definition.len()..], reference);
	}

	#[test]
	fn decoder_resolves_definitions_and_references() {
		let mut encoder = IdentifierEncoder::default();
		let mut out = Vec::new();
		let mut sink = sink_into(&mut out);
		for name in ["alpha", "beta", "alpha", "beta", "alpha"] {
			encoder.encode(name, &mut sink).unwrap();
		}
		sink.close().unwrap();

		let mut decoder = IdentifierDecoder::default();
		let mut source = source_over(&out);
		let decoded: Vec<Rc<str>> = (0..5).map(|_| decoder.decode(&mut source).unwrap()).collect();
		assert_eq!(decoded.iter().map(|s| &**s).collect::<Vec<_>>(), ["alpha", "beta", "alpha", "beta", "alpha"]);
		// References hand back the interned allocation, not a copy.
		assert!(Rc::ptr_eq(&decoded[0], &decoded[2]));
	}

	#[test]
	fn reference_to_undefined_id_fails() {
		let mut decoder = IdentifierDecoder::default();
		let bytes = [tag::FIXEXT4, 8, 0, 0, 0, 7];
		let mut source = source_over(&bytes);
		assert!(matches!(decoder.decode(&mut source), Err(Error::UnknownIdentifier(7))));
	}

	#[test]
	fn interns_plain_strings_by_wire_bytes() {
		let mut decoder = IdentifierDecoder::default();
		// Two fixstr "key" values back to back.
		let bytes = [0xa3, b'k', b'e', b'y', 0xa3, b'k', b'e', b'y'];
		let mut source = source_over(&bytes);
		let first = decoder.decode(&mut source).unwrap();
		let second = decoder.decode(&mut source).unwrap();
		assert_eq!(&*first, "key");
		assert!(Rc::ptr_eq(&first, &second));
		assert_eq!(decoder.cache_size(), 3);
	}

	#[test]
	fn cache_overflow_clears_and_resets() {
		let mut decoder = IdentifierDecoder::new(IdentifierOptions { max_cache_size: 7, extension_type: 8 });
		let mut bytes = Vec::new();
		for name in [&b"aaaa"[..], b"bbbb", b"cccc"] {
			bytes.push(0xa0 | name.len() as u8);
			bytes.extend_from_slice(name);
		}
		let mut source = source_over(&bytes);
		decoder.decode(&mut source).unwrap();
		assert_eq!(decoder.cache_size(), 4);
		decoder.decode(&mut source).unwrap();
		// 8 bytes exceeded the 7-byte budget: cleared.
		assert_eq!(decoder.cache_size(), 0);
		decoder.decode(&mut source).unwrap();
		assert_eq!(decoder.cache_size(), 4);
	}

	#[test]
	fn oversized_identifier_is_rejected() {
		let mut decoder = IdentifierDecoder::default();
		let mut bytes = vec![tag::STR8, 100];
		bytes.extend_from_slice(&[b'x'; 100]);
		let mut source = source_over(&bytes); // 64-byte working buffer
		assert!(matches!(
			decoder.decode(&mut source),
			Err(Error::IdentifierTooLarge { length: 100, capacity: 64 })
		));
	}

	#[test]
	fn encoder_cache_overflow_is_fatal() {
		let mut encoder = IdentifierEncoder::new(IdentifierOptions { max_cache_size: 6, extension_type: 8 });
		let mut out = Vec::new();
		let mut sink = sink_into(&mut out);
		encoder.encode("abcd", &mut sink).unwrap();
		match encoder.encode("efgh", &mut sink) {
			Err(Error::IdentifierCacheSizeExceeded { max: 6 }) => (),
			other => panic!("expected cache overflow, got {other:?}"),
		}
	}
}
