use super::{error::OSCResult, OSCArray, OSCBundle, OSCError, OSCMessage, OSCPacket, OSCTime, OSCType};

/// Takes a reference to an OSC packet and returns a byte vector on success.
///
/// Fails with [`OSCError::InvalidAddress`] if any message address does not begin with `/`, or
/// with [`OSCError::InvalidCharacter`] if any `char` argument's code point exceeds 127. See
/// spec.md §4.1.
///
/// # Example
///
/// ```
/// use osc_suite::osc::{encoder, OSCMessage, OSCPacket, OSCType};
///
/// let packet = OSCPacket::Message(OSCMessage {
/// 	addr: "/greet/me".to_string(),
/// 	args: vec![OSCType::String("hi!".to_string())]
/// });
/// assert!(encoder::encode(&packet).is_ok())
/// ```
pub fn encode(packet: &OSCPacket) -> OSCResult<Vec<u8>> {
	let mut bytes = Vec::new();
	encode_into(packet, &mut bytes).map_err(OSCError::from)?;
	Ok(bytes)
}

/// Takes a reference to an OSC packet and writes the encoded bytes to the given output. On
/// success, the number of bytes written is returned.
///
/// NOTE: The encoder will write output in small pieces (as small as a single byte), so the output
/// should be buffered if write calls have a large overhead (e.g. writing to a file).
///
/// # Example
///
/// ```
/// use osc_suite::osc::{encoder, OSCMessage, OSCPacket, OSCType};
///
/// let mut bytes = Vec::new();
/// let packet = OSCPacket::Message(OSCMessage {
/// 	addr: "/greet/me".to_string(),
/// 	args: vec![OSCType::String("hi!".to_string())]
/// });
/// assert!(encoder::encode_into(&packet, &mut bytes).is_ok())
/// ```
pub fn encode_into<O: Output>(packet: &OSCPacket, out: &mut O) -> Result<usize, EncodeError<O::Err>> {
	validate_packet(packet).map_err(EncodeError::Invalid)?;
	match *packet {
		OSCPacket::Message(ref msg) => encode_message(msg, out),
		OSCPacket::Bundle(ref bundle) => encode_bundle(bundle, out)
	}
	.map_err(EncodeError::Output)
}

/// An error produced while writing an encoded packet: either the packet itself was malformed
/// ([`OSCError`]), or the underlying [`Output`] sink failed.
#[derive(Debug)]
pub enum EncodeError<E> {
	Invalid(OSCError),
	Output(E)
}

impl<E: std::fmt::Display> std::fmt::Display for EncodeError<E> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			EncodeError::Invalid(e) => write!(f, "{e}"),
			EncodeError::Output(e) => write!(f, "{e}")
		}
	}
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for EncodeError<E> {}

impl From<EncodeError<std::convert::Infallible>> for OSCError {
	fn from(value: EncodeError<std::convert::Infallible>) -> Self {
		match value {
			EncodeError::Invalid(e) => e,
			EncodeError::Output(e) => match e {}
		}
	}
}

fn validate_packet(packet: &OSCPacket) -> OSCResult<()> {
	match packet {
		OSCPacket::Message(msg) => validate_message(msg),
		OSCPacket::Bundle(bundle) => {
			for packet in &bundle.content {
				validate_packet(packet)?;
			}
			Ok(())
		}
	}
}

fn validate_message(msg: &OSCMessage) -> OSCResult<()> {
	if !msg.addr.starts_with('/') {
		return Err(OSCError::InvalidAddress);
	}
	for arg in &msg.args {
		validate_arg(arg)?;
	}
	Ok(())
}

fn validate_arg(arg: &OSCType) -> OSCResult<()> {
	match arg {
		OSCType::Char(c) if *c as u32 > 127 => Err(OSCError::InvalidCharacter(*c)),
		OSCType::Array(array) => {
			for arg in &array.content {
				validate_arg(arg)?;
			}
			Ok(())
		}
		_ => Ok(())
	}
}

fn encode_message<O: Output>(msg: &OSCMessage, out: &mut O) -> Result<usize, O::Err> {
	let mut written = encode_string_into(&msg.addr, out)?;

	written += out.write(b",")?;
	for arg in &msg.args {
		written += encode_arg_type(arg, out)?;
	}

	let padding = pad(written as u64 + 1) as usize - written;
	written += out.write(&[0u8; 4][..padding])?;

	for arg in &msg.args {
		written += encode_arg_data(arg, out)?;
	}

	Ok(written)
}

fn encode_bundle<O: Output>(bundle: &OSCBundle, out: &mut O) -> Result<usize, O::Err> {
	let mut written = out.write(b"#bundle\0")?;
	written += encode_time_tag_into(&bundle.timetag, out)?;

	for packet in &bundle.content {
		let length_mark = out.mark(4)?;
		let length = match packet {
			OSCPacket::Message(m) => encode_message(m, out)?,
			OSCPacket::Bundle(b) => encode_bundle(b, out)?
		};
		out.place(length_mark, &(length as u32).to_be_bytes())?;
		written += 4 + length;
	}

	Ok(written)
}

fn encode_arg_data<O: Output>(arg: &OSCType, out: &mut O) -> Result<usize, O::Err> {
	match *arg {
		OSCType::Int(x) => out.write(&x.to_be_bytes()),
		OSCType::Long(x) => out.write(&x.to_be_bytes()),
		OSCType::Float(x) => out.write(&x.to_be_bytes()),
		OSCType::Double(x) => out.write(&x.to_be_bytes()),
		OSCType::Char(x) => out.write(&(x as u32).to_be_bytes()),
		OSCType::String(ref x) | OSCType::Symbol(ref x) => encode_string_into(x, out),
		OSCType::Blob(ref x) => {
			let padded_blob_length = pad(x.len() as u64) as usize;
			let padding = padded_blob_length - x.len();

			let mut written = out.write(&(x.len() as u32).to_be_bytes())?;
			written += out.write(x)?;

			if padding > 0 {
				written += out.write(&[0u8; 3][..padding])?;
			}

			Ok(written)
		}
		OSCType::Time(ref time) => encode_time_tag_into(time, out),
		OSCType::Midi(ref x) => out.write(&[x.port, x.status, x.data1, x.data2]),
		OSCType::Color(ref x) => out.write(&[x.red, x.green, x.blue, x.alpha]),
		OSCType::Bool(_) => Ok(0),
		OSCType::Nil => Ok(0),
		OSCType::Inf => Ok(0),
		OSCType::Array(ref x) => {
			let mut written = 0;
			for v in &x.content {
				written += encode_arg_data(v, out)?;
			}
			Ok(written)
		}
	}
}

fn encode_arg_type<O: Output>(arg: &OSCType, out: &mut O) -> Result<usize, O::Err> {
	match *arg {
		OSCType::Int(_) => out.write(b"i"),
		OSCType::Long(_) => out.write(b"h"),
		OSCType::Float(_) => out.write(b"f"),
		OSCType::Double(_) => out.write(b"d"),
		OSCType::Char(_) => out.write(b"c"),
		OSCType::String(_) => out.write(b"s"),
		OSCType::Symbol(_) => out.write(b"S"),
		OSCType::Blob(_) => out.write(b"b"),
		OSCType::Time(_) => out.write(b"t"),
		OSCType::Midi(_) => out.write(b"m"),
		OSCType::Color(_) => out.write(b"r"),
		OSCType::Bool(x) => out.write(if x { b"T" } else { b"F" }),
		OSCType::Nil => out.write(b"N"),
		OSCType::Inf => out.write(b"I"),
		OSCType::Array(ref x) => {
			let mut written = out.write(b"[")?;
			for v in &x.content {
				written += encode_arg_type(v, out)?;
			}
			written += out.write(b"]")?;
			Ok(written)
		}
	}
}

/// Null terminates the byte representation of string `s` and adds null bytes until the length of
/// the result is a multiple of 4.
pub fn encode_string<S: Into<String>>(s: S) -> Vec<u8> {
	let mut bytes: Vec<u8> = s.into().into_bytes();
	let new_len = pad(bytes.len() as u64 + 1) as usize;
	bytes.resize(new_len, 0u8);
	bytes
}

/// Writes the given string `s` to the given Output, adding 1-4 null bytes such that the length of
/// the result is a multiple of 4.
pub fn encode_string_into<S: AsRef<str>, O: Output>(s: S, out: &mut O) -> Result<usize, O::Err> {
	let s = s.as_ref();
	let padded_len = pad(s.len() as u64 + 1) as usize;
	let padding = padded_len - s.len();
	let mut written = out.write(s.as_bytes())?;
	written += out.write(&[0u8; 4][..padding])?;
	Ok(written)
}

/// Returns the position padded up to the next multiple of 4 (or left unchanged if it already is
/// one).
///
/// # Example
///
/// ```
/// use osc_suite::osc::encoder;
///
/// let pos: u64 = 10;
/// assert_eq!(12u64, encoder::pad(pos))
/// ```
pub fn pad(pos: u64) -> u64 {
	match pos % 4 {
		0 => pos,
		d => pos + (4 - d)
	}
}

fn encode_time_tag_into<O: Output>(time: &OSCTime, out: &mut O) -> Result<usize, O::Err> {
	out.write(&time.seconds.to_be_bytes())?;
	out.write(&time.fractional.to_be_bytes())?;
	Ok(8)
}

/// A trait for values that can receive encoded OSC output via `encode_into`. This allows more
/// flexibility in how the output is handled, including reusing part of an existing buffer or
/// writing directly to an external sink (e.g. a file).
///
/// Implementations are provided for:
/// - `Vec<u8>`: data is appended to the end of the Vec.
/// - `WriteOutput<W>`: a wrapper allowing data to be written to any type implementing
///   `std::io::Seek + std::io::Write`.
pub trait Output {
	/// The error type returned from Output functions.
	type Err;

	/// The type used to indicate the location of a mark.
	type Mark;

	/// Writes a block of data to the output. Unlike `std::io::Write::write`, this function is
	/// expected to write all of the given data prior to returning.
	fn write(&mut self, data: &[u8]) -> Result<usize, Self::Err>;

	/// Marks the location of a fixed-length value and returns a `Self::Mark` which may be used to
	/// fill in its data later with `place`.
	fn mark(&mut self, size: usize) -> Result<Self::Mark, Self::Err>;

	/// Consumes a previously-generated Mark and fills it in with data.
	fn place(&mut self, mark: Self::Mark, data: &[u8]) -> Result<(), Self::Err>;
}

impl Output for Vec<u8> {
	type Err = core::convert::Infallible;
	type Mark = (usize, usize);

	#[inline]
	fn mark(&mut self, size: usize) -> Result<Self::Mark, Self::Err> {
		let start = self.len();
		let end = start + size;
		self.resize(end, 0);
		Ok((start, end))
	}

	#[inline]
	fn place(&mut self, (start, end): Self::Mark, data: &[u8]) -> Result<(), Self::Err> {
		self[start..end].copy_from_slice(data);
		Ok(())
	}

	#[inline]
	fn write(&mut self, data: &[u8]) -> Result<usize, Self::Err> {
		self.extend(data);
		Ok(data.len())
	}
}

/// A newtype wrapping any type which implements `std::io::Seek` and `std::io::Write` to allow it
/// to be used as an [`Output`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct WriteOutput<W>(pub W);

impl<W: std::io::Seek + std::io::Write> Output for WriteOutput<W> {
	type Err = std::io::Error;
	type Mark = u64;

	fn mark(&mut self, size: usize) -> Result<Self::Mark, Self::Err> {
		let pos = self.0.stream_position()?;
		let mut left = size;
		while left > 0 {
			let num = left.min(8);
			self.0.write_all(&[0; 8][..num])?;
			left -= num;
		}
		Ok(pos)
	}

	fn place(&mut self, pos: Self::Mark, data: &[u8]) -> Result<(), Self::Err> {
		let old_pos = self.0.stream_position()?;
		self.0.seek(std::io::SeekFrom::Start(pos))?;
		self.0.write_all(data)?;
		self.0.seek(std::io::SeekFrom::Start(old_pos))?;
		Ok(())
	}

	#[inline]
	fn write(&mut self, data: &[u8]) -> Result<usize, Self::Err> {
		std::io::Write::write_all(&mut self.0, data).map(|_| data.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::osc::decode;

	#[test]
	fn rejects_invalid_address() {
		let packet = OSCPacket::Message(OSCMessage { addr: "no-leading-slash".into(), args: vec![] });
		assert_eq!(encode(&packet), Err(OSCError::InvalidAddress));
	}

	#[test]
	fn rejects_non_ascii_char() {
		let packet = OSCPacket::Message(OSCMessage { addr: "/c".into(), args: vec![OSCType::Char('é')] });
		assert_eq!(encode(&packet), Err(OSCError::InvalidCharacter('é')));
	}

	#[test]
	fn no_arguments_message_is_twelve_bytes() {
		let packet = OSCPacket::Message(OSCMessage { addr: "/test".into(), args: vec![] });
		let bytes = encode(&packet).unwrap();
		assert_eq!(bytes, vec![0x2F, 0x74, 0x65, 0x73, 0x74, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00]);
	}

	#[test]
	fn int_argument_round_trips() {
		let packet = OSCPacket::Message(OSCMessage { addr: "/v".into(), args: vec![OSCType::Int(256)] });
		let bytes = encode(&packet).unwrap();
		assert_eq!(bytes.len(), 12);
		assert_eq!(&bytes[8..], &[0x00, 0x00, 0x01, 0x00]);
		let (_, decoded) = decode(&bytes).unwrap();
		assert_eq!(decoded, packet);
	}

	#[test]
	fn bundle_with_immediate_timetag() {
		let inner = OSCMessage { addr: "/a".into(), args: vec![OSCType::Int(42)] };
		let bundle = OSCBundle { timetag: OSCTime::IMMEDIATELY, content: vec![OSCPacket::Message(inner)] };
		let bytes = encode(&OSCPacket::Bundle(bundle)).unwrap();
		assert_eq!(bytes.len(), 28);
		assert_eq!(&bytes[0..8], b"#bundle\0");
		assert_eq!(&bytes[8..16], &[0, 0, 0, 0, 0, 0, 0, 1]);
		assert_eq!(&bytes[16..20], &[0, 0, 0, 0x10]);
	}

	#[test]
	fn nested_array_round_trips() {
		let array = OSCArray { content: vec![OSCType::Int(1), OSCType::Array(OSCArray { content: vec![OSCType::Float(2.0)] }), OSCType::Int(3)] };
		let packet = OSCPacket::Message(OSCMessage { addr: "/arr".into(), args: vec![OSCType::Array(array)] });
		let bytes = encode(&packet).unwrap();
		let (_, decoded) = decode(&bytes).unwrap();
		assert_eq!(decoded, packet);
	}
}
