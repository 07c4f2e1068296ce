use crate::{
	error::{Error, Result},
	format::{self, tag, ExtensionHeader, ValueKind},
	sink::MessageSink,
	source::MessageSource,
};

pub use self::{
	ident::{IdentifierDecoder, IdentifierEncoder, IdentifierOptions},
	string::{StringOptions, Utf8Codec},
};

mod ident;
mod string;

/// Encodes one value type onto a sink.
///
/// The built-in string and identifier encoders implement this; user-defined extension encoders
/// implement it too and drive the sink through its public write surface (typically an extension
/// header followed by the payload).
pub trait ValueEncoder<T: ?Sized> {
	fn encode(&mut self, value: &T, sink: &mut MessageSink<'_>) -> Result<()>;
}

/// Decodes one value type from a source. Counterpart of [`ValueEncoder`].
pub trait ValueDecoder<T> {
	fn decode(&mut self, source: &mut MessageSource<'_>) -> Result<T>;
}

/// The error for a tag that does not open the requested kind of value. The one byte no value
/// starts with gets its own variant.
pub(crate) fn mismatch(tag: u8, requested: ValueKind) -> Error {
	if tag == tag::NEVER_USED {
		Error::InvalidFormat(tag)
	} else {
		Error::TypeMismatch { tag, requested }
	}
}

/// Read a string header: the tag plus its length field.
pub(crate) fn read_str_header(source: &mut MessageSource<'_>) -> Result<u32> {
	let tag = source.read_byte()?;
	if format::is_fix_str(tag) {
		return Ok(format::fix_str_length(tag));
	}
	match tag {
		tag::STR8 => source.read_length8(),
		tag::STR16 => source.read_length16(),
		tag::STR32 => source.read_length32(),
		_ => Err(mismatch(tag, ValueKind::Str)),
	}
}

/// Write a string header in its shortest form.
pub(crate) fn write_str_header(sink: &mut MessageSink<'_>, length: u32) -> Result<()> {
	if length <= 31 {
		sink.write_byte(0xa0 | length as u8)
	} else if length <= 0xff {
		sink.write_tag_and_u8(tag::STR8, length as u8)
	} else if length <= 0xffff {
		sink.write_tag_and_u16(tag::STR16, length as u16)
	} else {
		sink.write_tag_and_u32(tag::STR32, length)
	}
}

/// Read an extension header: the tag, its length field, and the type code.
pub(crate) fn read_ext_header(source: &mut MessageSource<'_>) -> Result<ExtensionHeader> {
	let tag = source.read_byte()?;
	let length = match tag {
		tag::FIXEXT1 => 1,
		tag::FIXEXT2 => 2,
		tag::FIXEXT4 => 4,
		tag::FIXEXT8 => 8,
		tag::FIXEXT16 => 16,
		tag::EXT8 => source.read_length8()?,
		tag::EXT16 => source.read_length16()?,
		tag::EXT32 => source.read_length32()?,
		_ => return Err(mismatch(tag, ValueKind::Extension)),
	};
	let ext_type = source.read_i8()?;
	Ok(ExtensionHeader { ext_type, length })
}
