use std::{
	convert::{TryFrom, TryInto},
	time::{Duration, SystemTime, UNIX_EPOCH}
};

pub mod decoder;
pub mod encoder;
pub mod error;

pub use self::decoder::decode;
pub use self::encoder::{encode, encode_into};
pub use self::error::{OSCError, OSCResult};

/// A time tag in an OSC message consists of two 32-bit integers where the first one denotes the
/// number of seconds since 1900-01-01 and the second the fractions of a second. For details on its
/// semantics see <http://opensoundcontrol.org/node/3/#timetags>.
///
/// The raw value `1` (seconds = 0, fractional = 1) is the OSC "immediately" sentinel and has no
/// wall-clock interpretation; see [`OSCTime::IMMEDIATELY`].
///
/// # Examples
///
/// ```
/// use std::{convert::TryFrom, time::UNIX_EPOCH};
///
/// use osc_suite::osc::OSCTime;
///
/// assert_eq!(OSCTime::try_from(UNIX_EPOCH).unwrap(), OSCTime::from((2_208_988_800, 0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OSCTime {
	pub seconds: u32,
	pub fractional: u32
}

impl OSCTime {
	/// The sentinel time tag meaning "dispatch immediately", per OSC 1.0 §"time tag". Raw value `1`.
	pub const IMMEDIATELY: OSCTime = OSCTime { seconds: 0, fractional: 1 };

	const UNIX_OFFSET: u64 = 2_208_988_800; // From RFC 5905
	const TWO_POW_32: f64 = (u32::MAX as f64) + 1.0;
	const ONE_OVER_TWO_POW_32: f64 = 1.0 / OSCTime::TWO_POW_32;
	const NANOS_PER_SECOND: f64 = 1.0e9;
	const SECONDS_PER_NANO: f64 = 1.0 / OSCTime::NANOS_PER_SECOND;

	/// The raw 64-bit NTP value (seconds in the upper 32 bits, fractional seconds in the lower 32).
	pub fn as_raw(self) -> u64 {
		((self.seconds as u64) << 32) | self.fractional as u64
	}

	/// Builds an `OSCTime` from its raw 64-bit NTP representation.
	pub fn from_raw(raw: u64) -> Self {
		OSCTime { seconds: (raw >> 32) as u32, fractional: raw as u32 }
	}
}

impl TryFrom<SystemTime> for OSCTime {
	type Error = OSCTimeError;

	fn try_from(time: SystemTime) -> core::result::Result<OSCTime, OSCTimeError> {
		let duration_since_epoch =
			time.duration_since(UNIX_EPOCH).map_err(|_| OSCTimeError(OSCTimeErrorKind::BeforeEpoch))? + Duration::new(OSCTime::UNIX_OFFSET, 0);
		let seconds = u32::try_from(duration_since_epoch.as_secs()).map_err(|_| OSCTimeError(OSCTimeErrorKind::Overflow))?;
		let nanos = duration_since_epoch.subsec_nanos() as f64;
		let fractional = (nanos * OSCTime::SECONDS_PER_NANO * OSCTime::TWO_POW_32).round() as u32;
		Ok(OSCTime { seconds, fractional })
	}
}

impl From<OSCTime> for SystemTime {
	fn from(time: OSCTime) -> SystemTime {
		let nanos = (time.fractional as f64) * OSCTime::ONE_OVER_TWO_POW_32 * OSCTime::NANOS_PER_SECOND;
		let duration_since_osc_epoch = Duration::new(time.seconds as u64, nanos.round() as u32);
		let duration_since_unix_epoch = duration_since_osc_epoch - Duration::new(OSCTime::UNIX_OFFSET, 0);
		UNIX_EPOCH + duration_since_unix_epoch
	}
}

impl From<(u32, u32)> for OSCTime {
	fn from(time: (u32, u32)) -> OSCTime {
		let (seconds, fractional) = time;
		OSCTime { seconds, fractional }
	}
}

impl From<OSCTime> for (u32, u32) {
	fn from(time: OSCTime) -> (u32, u32) {
		(time.seconds, time.fractional)
	}
}

/// An error returned by conversions involving [`OSCTime`].
#[derive(Debug, thiserror::Error)]
#[error("{}", match .0 {
	OSCTimeErrorKind::BeforeEpoch => "time is before the unix epoch and cannot be stored",
	OSCTimeErrorKind::Overflow => "time overflows what OSC time can store"
})]
pub struct OSCTimeError(OSCTimeErrorKind);

#[derive(Debug)]
enum OSCTimeErrorKind {
	BeforeEpoch,
	Overflow
}

/// Every argument carried by an [`OSCMessage`] is exactly one of these cases. See the OSC 1.0
/// spec's "OSC Type Tag String" section for the wire contract of each.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OSCType {
	Int(i32),
	Long(i64),
	Float(f32),
	Double(f64),
	String(String),
	Symbol(String),
	Blob(Vec<u8>),
	// use struct for time tag to avoid destructuring
	Time(OSCTime),
	Char(char),
	Color(OSCColor),
	Midi(OSCMidiMessage),
	Bool(bool),
	Array(OSCArray),
	Nil,
	Inf
}

macro_rules! value_impl {
    ($(($name:ident, $variant:ident, $ty:ty)),*) => {
        $(
        impl OSCType {
            #[allow(dead_code)]
            pub fn $name(self) -> Option<$ty> {
                match self {
                    OSCType::$variant(v) => Some(v),
                    _ => None
                }
            }
        }
        impl From<$ty> for OSCType {
            fn from(v: $ty) -> Self {
                OSCType::$variant(v)
            }
        }
        )*
    }
}
value_impl! {
	(int, Int, i32),
	(long, Long, i64),
	(float, Float, f32),
	(double, Double, f64),
	(string, String, String),
	(blob, Blob, Vec<u8>),
	(array, Array, OSCArray),
	(char, Char, char),
	(color, Color, OSCColor),
	(midi, Midi, OSCMidiMessage),
	(bool, Bool, bool)
}
impl From<(u32, u32)> for OSCType {
	fn from(time: (u32, u32)) -> Self {
		OSCType::Time(time.into())
	}
}
impl From<OSCTime> for OSCType {
	fn from(time: OSCTime) -> Self {
		OSCType::Time(time)
	}
}

impl TryFrom<SystemTime> for OSCType {
	type Error = OSCTimeError;

	fn try_from(time: SystemTime) -> std::result::Result<OSCType, OSCTimeError> {
		time.try_into().map(OSCType::Time)
	}
}

impl OSCType {
	pub fn time(self) -> Option<OSCTime> {
		match self {
			OSCType::Time(time) => Some(time),
			_ => None
		}
	}

	/// Converts a host `i64` to an [`OSCType`], choosing `Int` when the magnitude fits in 32 bits
	/// and falling back to `Long` otherwise (see spec.md §8: "encoding `Int` as the platform-native
	/// integer yields an `int32` argument; for larger magnitudes it yields `int64`").
	pub fn from_integer(n: i64) -> OSCType {
		match i32::try_from(n) {
			Ok(n) => OSCType::Int(n),
			Err(_) => OSCType::Long(n)
		}
	}
}
impl<'a> From<&'a str> for OSCType {
	fn from(string: &'a str) -> Self {
		OSCType::String(string.to_string())
	}
}

/// Represents the parts of a MIDI message. Mainly used for tunneling MIDI over a network using
/// the OSC protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OSCMidiMessage {
	pub port: u8,
	pub status: u8,
	pub data1: u8,
	pub data2: u8
}

/// An *OSC packet* can contain an *OSC message* or a bundle of nested packets which is called an
/// *OSC bundle*.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OSCPacket {
	Message(OSCMessage),
	Bundle(OSCBundle)
}

impl OSCPacket {
	/// Returns `Some(&message)` if the packet is `OSCPacket::Message`, `None` otherwise.
	pub fn message(&self) -> Option<&OSCMessage> {
		match self {
			OSCPacket::Message(message) => Some(message),
			_ => None
		}
	}

	/// Returns `Some(message)` if the packet is `OSCPacket::Message`, `None` otherwise.
	pub fn into_message(self) -> Option<OSCMessage> {
		match self {
			OSCPacket::Message(message) => Some(message),
			_ => None
		}
	}
}

/// An OSC message consists of an address pattern and zero or more arguments. The address should
/// specify an element of your instrument (or whatever you want to control with OSC) and the
/// arguments are used to set properties of the element to the respective values.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OSCMessage {
	pub addr: String,
	pub args: Vec<OSCType>
}

impl OSCMessage {
	/// Create a new OSCMessage from an address and args. The args can either be specified as a
	/// `Vec<OSCType>`, or as a tuple of regular Rust types that can be converted into [`OSCType`].
	pub fn new<T>(addr: impl ToString, args: T) -> Self
	where
		T: IntoOSCArgs
	{
		let args = args.into_osc_args();
		let addr = addr.to_string();
		OSCMessage { addr, args }
	}

	/// Returns `true` if the address starts with the given prefix.
	pub fn starts_with(&self, prefix: &str) -> bool {
		self.addr.starts_with(prefix)
	}

	/// Get a reference to the message in tuple form; useful for pattern matching.
	pub fn as_tuple(&self) -> (&str, &[OSCType]) {
		(self.addr.as_str(), &self.args[..])
	}
}

/// An OSC bundle contains zero or more OSC packets and a time tag. The contained packets *should*
/// be applied at the given time tag; this crate does not schedule dispatch at that instant (see
/// spec.md §1 Non-goals) — the time tag is carried verbatim for the consumer to act on.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OSCBundle {
	pub timetag: OSCTime,
	pub content: Vec<OSCPacket>
}

/// An RGBA color.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OSCColor {
	pub red: u8,
	pub green: u8,
	pub blue: u8,
	pub alpha: u8
}

/// An ordered, possibly nested sequence of arguments, expressed on the wire by bracketing type
/// tags (`[` ... `]`) with no payload bytes of their own.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OSCArray {
	pub content: Vec<OSCType>
}

impl<T: Into<OSCType>> FromIterator<T> for OSCArray {
	fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> OSCArray {
		OSCArray {
			content: iter.into_iter().map(T::into).collect()
		}
	}
}

impl From<String> for OSCMessage {
	fn from(s: String) -> OSCMessage {
		OSCMessage { addr: s, args: vec![] }
	}
}

impl<'a> From<&'a str> for OSCMessage {
	fn from(s: &str) -> OSCMessage {
		OSCMessage { addr: s.to_string(), args: vec![] }
	}
}

/// Helper trait to convert types into `Vec<OSCType>`.
pub trait IntoOSCArgs {
	fn into_osc_args(self) -> Vec<OSCType>;
}

impl<T> IntoOSCArgs for Vec<T>
where
	T: Into<OSCType>
{
	fn into_osc_args(self) -> Vec<OSCType> {
		self.into_iter().map(|a| a.into()).collect()
	}
}

impl IntoOSCArgs for () {
	fn into_osc_args(self) -> Vec<OSCType> {
		vec![]
	}
}

macro_rules! tuple_args_impl {
	($($name:ident),+) => {
		impl<$($name),+> IntoOSCArgs for ($($name,)+)
		where
			$($name: Into<OSCType>),+
		{
			#[allow(non_snake_case)]
			fn into_osc_args(self) -> Vec<OSCType> {
				let ($($name,)+) = self;
				vec![$($name.into()),+]
			}
		}
	};
}
tuple_args_impl!(T1);
tuple_args_impl!(T1, T2);
tuple_args_impl!(T1, T2, T3);
tuple_args_impl!(T1, T2, T3, T4);
tuple_args_impl!(T1, T2, T3, T4, T5);
tuple_args_impl!(T1, T2, T3, T4, T5, T6);
tuple_args_impl!(T1, T2, T3, T4, T5, T6, T7);
tuple_args_impl!(T1, T2, T3, T4, T5, T6, T7, T8);

impl IntoOSCArgs for OSCType {
	fn into_osc_args(self) -> Vec<OSCType> {
		vec![self]
	}
}

/// Helper trait to convert [`OSCMessage`] and [`OSCBundle`] into [`OSCPacket`].
pub trait IntoOSCPacket {
	fn into_osc_packet(self) -> OSCPacket;
}

impl IntoOSCPacket for OSCMessage {
	fn into_osc_packet(self) -> OSCPacket {
		OSCPacket::Message(self)
	}
}

impl IntoOSCPacket for OSCBundle {
	fn into_osc_packet(self) -> OSCPacket {
		OSCPacket::Bundle(self)
	}
}

impl IntoOSCPacket for OSCPacket {
	fn into_osc_packet(self) -> OSCPacket {
		self
	}
}

/// Helper trait to convert a `(impl ToString, impl IntoOSCArgs)` tuple into [`OSCMessage`].
pub trait IntoOSCMessage {
	fn into_osc_message(self) -> OSCMessage;
}

impl<S, A> IntoOSCMessage for (S, A)
where
	S: ToString,
	A: IntoOSCArgs
{
	fn into_osc_message(self) -> OSCMessage {
		OSCMessage::new(self.0, self.1)
	}
}

impl<T> IntoOSCPacket for T
where
	T: IntoOSCMessage
{
	fn into_osc_packet(self) -> OSCPacket {
		OSCPacket::Message(self.into_osc_message())
	}
}

#[cfg(test)]
mod tests {
	use std::{convert::TryFrom, time::UNIX_EPOCH};

	use super::*;

	#[test]
	fn time_tag_immediately_is_raw_one() {
		assert_eq!(OSCTime::IMMEDIATELY.as_raw(), 1);
	}

	#[test]
	fn time_tag_round_trips_through_system_time() {
		let time = OSCTime::try_from(UNIX_EPOCH).unwrap();
		let back: std::time::SystemTime = time.into();
		assert_eq!(back, UNIX_EPOCH);
	}

	#[test]
	fn integer_widens_past_i32_range() {
		assert_eq!(OSCType::from_integer(256), OSCType::Int(256));
		assert_eq!(OSCType::from_integer(i64::from(i32::MAX) + 1), OSCType::Long(i64::from(i32::MAX) + 1));
	}
}
