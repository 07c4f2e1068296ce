use crate::format::ValueKind;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while encoding or decoding a message stream.
///
/// Nothing is retried internally; every variant surfaces to the caller of the failed `read_*` or
/// `write_*` operation. A failed write leaves the staged sink buffer in an undefined state, so
/// callers should close the writer after any error. Closing is always safe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// A byte that no MessagePack value starts with appeared where a value tag was required.
	#[error("invalid format byte 0x{0:02x}")]
	InvalidFormat(u8),
	/// The next value on the wire does not have the type the caller asked for.
	#[error("type mismatch: next value is tagged 0x{tag:02x}, which is not {requested:?}")]
	TypeMismatch { tag: u8, requested: ValueKind },
	/// The value is well-formed but does not fit the requested destination type.
	#[error("integer {value} does not fit in {target}")]
	IntegerOverflow { value: i128, target: &'static str },
	/// A 32-bit length field exceeds the supported ceiling.
	#[error("length {length} exceeds the supported maximum {max}")]
	LengthTooLarge { length: u32, max: u32 },
	#[error("string of {length} bytes exceeds the configured maximum {max}")]
	StringTooLarge { length: usize, max: usize },
	/// Identifiers must fit the source's working buffer so their wire bytes can key the cache.
	#[error("identifier of {length} bytes does not fit the read buffer ({capacity} bytes)")]
	IdentifierTooLarge { length: usize, capacity: usize },
	/// Timestamp extension payloads are exactly 4, 8, or 12 bytes.
	#[error("invalid timestamp payload length {0}")]
	InvalidTimestampLength(u32),
	#[error("extension type {0} is not the timestamp type (-1)")]
	TimestampTypeMismatch(i8),
	/// An unpaired surrogate in UTF-16 input, reported only by the strict encoding mode.
	#[error("unpaired surrogate at UTF-16 code unit {0}")]
	InvalidSurrogatePair(usize),
	/// Ill-formed UTF-8 payload bytes, reported only by the strict decoding mode.
	#[error("ill-formed UTF-8 at byte {position} of the payload")]
	InvalidUtf8 { position: usize },
	#[error("premature end of input: needed {required} bytes, got {got}")]
	PrematureEndOfInput { required: usize, got: usize },
	/// A buffer request above an allocator ceiling, or a reservation above a buffer's capacity.
	#[error("requested {requested} bytes, limit is {max}")]
	SizeLimitExceeded { requested: usize, max: usize },
	/// A provider returned no bytes even though the buffer had free space. Sources must block;
	/// failing loudly beats spinning on a non-blocking channel.
	#[error("provider made no progress on a non-full buffer")]
	NonBlockingChannel,
	/// The write-side identifier cache is full. Dropping mappings silently would desynchronize
	/// the reading side, so this is fatal.
	#[error("identifier cache grew past its configured maximum of {max} bytes")]
	IdentifierCacheSizeExceeded { max: usize },
	/// An identifier id outside this stream's definition sequence, from a reference to an id that
	/// was never defined or a definition that skips ahead.
	#[error("identifier id {0} is not part of this stream's definition sequence")]
	UnknownIdentifier(u32),
	#[error("{0} is already closed")]
	AlreadyClosed(&'static str),
	#[error(transparent)]
	Io(#[from] io::Error),
}
