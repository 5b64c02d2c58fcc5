use nom::error::{ErrorKind, FromExternalError, ParseError};

/// Errors returned by [`crate::osc::encode`] and [`crate::osc::decode`].
///
/// Encoder failures (`InvalidAddress`, `InvalidCharacter`) are structural — they mean the caller
/// handed the encoder a value that cannot be represented on the wire at all. Decoder failures
/// reflect every way strict OSC 1.0 parsing can reject a byte stream (see spec.md §4.2); the
/// transports in [`crate::transport`] treat every decoder failure as "malformed frame" and drop
/// the packet rather than propagating the error (spec.md §7).
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum OSCError {
	/// An address pattern did not begin with `/`.
	#[error("address pattern must begin with '/'")]
	InvalidAddress,
	/// A `char` argument's code point exceeded 127 (OSC chars are one ASCII byte wide).
	#[error("character {0:?} is not representable as an OSC char (must be ASCII)")]
	InvalidCharacter(char),
	/// The input ended before a required field could be read.
	#[error("packet is truncated")]
	Truncated,
	/// The packet's first byte was neither `/` nor `#`, or a bundle's header tag didn't match.
	#[error("packet is neither a valid message nor a valid bundle")]
	InvalidPacket,
	/// A null-terminated string never hit its terminator within the remaining bytes, or was not
	/// valid UTF-8.
	#[error("string is not null-terminated")]
	UnterminatedString,
	/// A message had argument bytes remaining but no type tag string, or the type tag string did
	/// not begin with `,`.
	#[error("message is missing its type tag string")]
	MissingTypeTag,
	/// A type tag character isn't one of the defined OSC 1.0 type tags.
	#[error("unknown type tag '{0}'")]
	UnknownTypeTag(char),
	/// A bundle element's declared length was non-positive or exceeded the remaining bytes.
	#[error("bundle element length is invalid")]
	InvalidBundleElement,
	/// An array-closing `]` type tag appeared with no matching `[`, or an array was left unclosed
	/// at the end of the type tag string.
	#[error("unmatched ']' in type tag string")]
	UnmatchedArrayClose
}

impl<I> ParseError<I> for OSCError {
	fn from_error_kind(_input: I, _kind: ErrorKind) -> Self {
		Self::InvalidPacket
	}

	fn append(_input: I, _kind: ErrorKind, other: Self) -> Self {
		other
	}
}

impl<I> FromExternalError<I, OSCError> for OSCError {
	fn from_external_error(_input: I, _kind: ErrorKind, e: OSCError) -> Self {
		e
	}
}

pub type OSCResult<T> = Result<T, OSCError>;
