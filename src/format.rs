use crate::error::{Error, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// First-byte tags of the MessagePack wire format.
///
/// Tags outside these constants encode their value (or length) in their own low bits; see the
/// `is_fix_*` predicates.
pub mod tag {
	pub const NIL: u8 = 0xc0;
	/// Reserved by the format, never valid on the wire.
	pub const NEVER_USED: u8 = 0xc1;
	pub const FALSE: u8 = 0xc2;
	pub const TRUE: u8 = 0xc3;
	pub const BIN8: u8 = 0xc4;
	pub const BIN16: u8 = 0xc5;
	pub const BIN32: u8 = 0xc6;
	pub const EXT8: u8 = 0xc7;
	pub const EXT16: u8 = 0xc8;
	pub const EXT32: u8 = 0xc9;
	pub const FLOAT32: u8 = 0xca;
	pub const FLOAT64: u8 = 0xcb;
	pub const UINT8: u8 = 0xcc;
	pub const UINT16: u8 = 0xcd;
	pub const UINT32: u8 = 0xce;
	pub const UINT64: u8 = 0xcf;
	pub const INT8: u8 = 0xd0;
	pub const INT16: u8 = 0xd1;
	pub const INT32: u8 = 0xd2;
	pub const INT64: u8 = 0xd3;
	pub const FIXEXT1: u8 = 0xd4;
	pub const FIXEXT2: u8 = 0xd5;
	pub const FIXEXT4: u8 = 0xd6;
	pub const FIXEXT8: u8 = 0xd7;
	pub const FIXEXT16: u8 = 0xd8;
	pub const STR8: u8 = 0xd9;
	pub const STR16: u8 = 0xda;
	pub const STR32: u8 = 0xdb;
	pub const ARRAY16: u8 = 0xdc;
	pub const ARRAY32: u8 = 0xdd;
	pub const MAP16: u8 = 0xde;
	pub const MAP32: u8 = 0xdf;
}

/// Extension type code reserved for timestamps.
pub const TIMESTAMP_EXT_TYPE: i8 = -1;

pub fn is_pos_fix_int(tag: u8) -> bool {
	tag & 0x80 == 0
}

pub fn is_neg_fix_int(tag: u8) -> bool {
	tag >= 0xe0
}

pub fn is_fix_int(tag: u8) -> bool {
	is_pos_fix_int(tag) || is_neg_fix_int(tag)
}

pub fn is_fix_map(tag: u8) -> bool {
	tag & 0xf0 == 0x80
}

pub fn is_fix_array(tag: u8) -> bool {
	tag & 0xf0 == 0x90
}

pub fn is_fix_str(tag: u8) -> bool {
	tag & 0xe0 == 0xa0
}

/// Entry count packed into a fixmap tag's low 4 bits.
pub fn fix_map_length(tag: u8) -> u32 {
	(tag & 0x0f) as u32
}

/// Element count packed into a fixarray tag's low 4 bits.
pub fn fix_array_length(tag: u8) -> u32 {
	(tag & 0x0f) as u32
}

/// Byte length packed into a fixstr tag's low 5 bits.
pub fn fix_str_length(tag: u8) -> u32 {
	(tag & 0x1f) as u32
}

/// The kind of value a tag byte begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
	Nil,
	Bool,
	/// A signed integer form: `int8/16/32/64` or negative fixint.
	Int,
	/// An unsigned integer form: `uint8/16/32/64` or positive fixint.
	UInt,
	Float32,
	Float64,
	Str,
	Bin,
	Array,
	Map,
	Extension,
}

impl ValueKind {
	/// Classify a tag byte. The reserved byte `0xc1` is the one tag with no kind.
	pub fn from_tag(tag: u8) -> Result<Self> {
		Ok(match tag {
			0x00..=0x7f => ValueKind::UInt,
			0x80..=0x8f => ValueKind::Map,
			0x90..=0x9f => ValueKind::Array,
			0xa0..=0xbf => ValueKind::Str,
			tag::NIL => ValueKind::Nil,
			tag::NEVER_USED => return Err(Error::InvalidFormat(tag)),
			tag::FALSE | tag::TRUE => ValueKind::Bool,
			tag::BIN8 | tag::BIN16 | tag::BIN32 => ValueKind::Bin,
			tag::EXT8 | tag::EXT16 | tag::EXT32 => ValueKind::Extension,
			tag::FLOAT32 => ValueKind::Float32,
			tag::FLOAT64 => ValueKind::Float64,
			tag::UINT8..=tag::UINT64 => ValueKind::UInt,
			tag::INT8..=tag::INT64 => ValueKind::Int,
			tag::FIXEXT1..=tag::FIXEXT16 => ValueKind::Extension,
			tag::STR8 | tag::STR16 | tag::STR32 => ValueKind::Str,
			tag::ARRAY16 | tag::ARRAY32 => ValueKind::Array,
			tag::MAP16 | tag::MAP32 => ValueKind::Map,
			0xe0..=0xff => ValueKind::Int,
		})
	}
}

/// Header of an extension value: a signed type code and the payload byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionHeader {
	pub ext_type: i8,
	pub length: u32,
}

/// A point in time as MessagePack transports it: whole seconds since the Unix epoch plus a
/// nanosecond offset in `0..1_000_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
	seconds: i64,
	nanos: u32,
}

impl Timestamp {
	/// Build a timestamp. Panics if `nanos` is a full second or more.
	pub fn new(seconds: i64, nanos: u32) -> Self {
		assert!(nanos < 1_000_000_000, "nanosecond offset {nanos} is a full second or more");
		Self { seconds, nanos }
	}

	pub fn seconds(self) -> i64 {
		self.seconds
	}

	pub fn nanos(self) -> u32 {
		self.nanos
	}
}

impl From<SystemTime> for Timestamp {
	fn from(time: SystemTime) -> Self {
		match time.duration_since(UNIX_EPOCH) {
			Ok(since) => Self::new(since.as_secs() as i64, since.subsec_nanos()),
			Err(err) => {
				// Pre-epoch: borrow a second so the nanosecond offset stays non-negative.
				let until = err.duration();
				let mut seconds = -(until.as_secs() as i64);
				let mut nanos = until.subsec_nanos();
				if nanos > 0 {
					seconds -= 1;
					nanos = 1_000_000_000 - nanos;
				}
				Self::new(seconds, nanos)
			},
		}
	}
}

impl From<Timestamp> for SystemTime {
	fn from(timestamp: Timestamp) -> Self {
		let nanos = Duration::from_nanos(timestamp.nanos as u64);
		if timestamp.seconds >= 0 {
			UNIX_EPOCH + Duration::from_secs(timestamp.seconds as u64) + nanos
		} else {
			UNIX_EPOCH - Duration::from_secs(timestamp.seconds.unsigned_abs()) + nanos
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fix_ranges() {
		assert!(is_pos_fix_int(0x00));
		assert!(is_pos_fix_int(0x7f));
		assert!(!is_pos_fix_int(0x80));
		assert!(is_neg_fix_int(0xe0));
		assert!(is_neg_fix_int(0xff));
		assert!(!is_neg_fix_int(0xdf));
		assert!(is_fix_map(0x80) && is_fix_map(0x8f) && !is_fix_map(0x90));
		assert!(is_fix_array(0x90) && is_fix_array(0x9f) && !is_fix_array(0xa0));
		assert!(is_fix_str(0xa0) && is_fix_str(0xbf) && !is_fix_str(0xc0));
	}

	#[test]
	fn fix_lengths() {
		assert_eq!(fix_map_length(0x8a), 10);
		assert_eq!(fix_array_length(0x93), 3);
		assert_eq!(fix_str_length(0xb0), 16);
		assert_eq!(fix_str_length(0xbf), 31);
	}

	#[test]
	fn classify_every_tag() {
		for tag in 0..=u8::MAX {
			match ValueKind::from_tag(tag) {
				Ok(_) => assert_ne!(tag, tag::NEVER_USED),
				Err(Error::InvalidFormat(byte)) => assert_eq!(byte, tag::NEVER_USED),
				Err(other) => panic!("unexpected error {other:?}"),
			}
		}
		assert_eq!(ValueKind::from_tag(0x2a).unwrap(), ValueKind::UInt);
		assert_eq!(ValueKind::from_tag(0xe0).unwrap(), ValueKind::Int);
		assert_eq!(ValueKind::from_tag(tag::FLOAT64).unwrap(), ValueKind::Float64);
		assert_eq!(ValueKind::from_tag(tag::FIXEXT4).unwrap(), ValueKind::Extension);
	}

	#[test]
	fn timestamp_from_system_time() {
		let t = Timestamp::from(UNIX_EPOCH + Duration::new(5, 250));
		assert_eq!((t.seconds(), t.nanos()), (5, 250));
		let t = Timestamp::from(UNIX_EPOCH - Duration::new(1, 250_000_000));
		assert_eq!((t.seconds(), t.nanos()), (-2, 750_000_000));
		assert_eq!(SystemTime::from(t), UNIX_EPOCH - Duration::new(1, 250_000_000));
	}
}
