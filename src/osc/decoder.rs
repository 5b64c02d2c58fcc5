use nom::number::complete::{be_f32, be_f64, be_i32, be_i64, be_u32};

use super::{error::OSCResult, OSCArray, OSCBundle, OSCColor, OSCError, OSCMessage, OSCMidiMessage, OSCPacket, OSCTime, OSCType};

/// Decodes a single OSC packet (message or bundle) from `input`, returning the decoded packet and
/// whatever bytes remained after it.
///
/// The decoder is strict: every way a byte stream can fail to be a well-formed OSC 1.0 packet
/// (per spec.md §4.2) is rejected with a specific [`OSCError`] variant rather than silently
/// accepted or panicking.
///
/// # Examples
///
/// ```
/// use osc_suite::osc::{decode, OSCMessage, OSCPacket, OSCType};
///
/// let bytes = osc_suite::osc::encode(&OSCPacket::Message(OSCMessage { addr: "/a".into(), args: vec![OSCType::Int(1)] })).unwrap();
/// let (remainder, packet) = decode(&bytes).unwrap();
/// assert!(remainder.is_empty());
/// assert_eq!(packet.message().unwrap().addr, "/a");
/// ```
pub fn decode(input: &[u8]) -> OSCResult<(&[u8], OSCPacket)> {
	if input.is_empty() {
		return Err(OSCError::Truncated);
	}

	match input[0] {
		b'/' => decode_message(input),
		b'#' => decode_bundle(input),
		_ => Err(OSCError::InvalidPacket)
	}
}

fn take_bytes(input: &[u8], n: usize) -> OSCResult<(&[u8], &[u8])> {
	if input.len() < n {
		return Err(OSCError::Truncated);
	}
	let (consumed, rest) = input.split_at(n);
	Ok((rest, consumed))
}

fn be_i32_n(input: &[u8]) -> OSCResult<(&[u8], i32)> {
	let (rest, bytes) = take_bytes(input, 4)?;
	let (_, v) = be_i32::<_, nom::error::Error<&[u8]>>(bytes).map_err(|_| OSCError::Truncated)?;
	Ok((rest, v))
}

fn be_u32_n(input: &[u8]) -> OSCResult<(&[u8], u32)> {
	let (rest, bytes) = take_bytes(input, 4)?;
	let (_, v) = be_u32::<_, nom::error::Error<&[u8]>>(bytes).map_err(|_| OSCError::Truncated)?;
	Ok((rest, v))
}

fn be_i64_n(input: &[u8]) -> OSCResult<(&[u8], i64)> {
	let (rest, bytes) = take_bytes(input, 8)?;
	let (_, v) = be_i64::<_, nom::error::Error<&[u8]>>(bytes).map_err(|_| OSCError::Truncated)?;
	Ok((rest, v))
}

fn be_f32_n(input: &[u8]) -> OSCResult<(&[u8], f32)> {
	let (rest, bytes) = take_bytes(input, 4)?;
	let (_, v) = be_f32::<_, nom::error::Error<&[u8]>>(bytes).map_err(|_| OSCError::Truncated)?;
	Ok((rest, v))
}

fn be_f64_n(input: &[u8]) -> OSCResult<(&[u8], f64)> {
	let (rest, bytes) = take_bytes(input, 8)?;
	let (_, v) = be_f64::<_, nom::error::Error<&[u8]>>(bytes).map_err(|_| OSCError::Truncated)?;
	Ok((rest, v))
}

/// Reads a null-terminated string padded to a 4-byte boundary, where `padding` counts the bytes
/// already consumed in the enclosing packet (so alignment is relative to the start of the packet,
/// not the start of `input`).
fn read_osc_string<'a>(input: &'a [u8], consumed_so_far: usize) -> OSCResult<(&'a [u8], String)> {
	let null_pos = input.iter().position(|&b| b == 0).ok_or(OSCError::UnterminatedString)?;
	let raw = &input[..null_pos];
	let s = std::str::from_utf8(raw).map_err(|_| OSCError::UnterminatedString)?.to_string();

	let total_len = consumed_so_far + null_pos + 1;
	let padded_total = super::encoder::pad(total_len as u64) as usize;
	let padded_len = padded_total - consumed_so_far;
	if input.len() < padded_len {
		return Err(OSCError::Truncated);
	}
	Ok((&input[padded_len..], s))
}

fn decode_message(input: &[u8]) -> OSCResult<(&[u8], OSCPacket)> {
	let (rest, addr) = read_osc_string(input, 0)?;
	if !addr.starts_with('/') {
		return Err(OSCError::InvalidPacket);
	}
	let consumed = input.len() - rest.len();

	if rest.is_empty() {
		return Ok((rest, OSCPacket::Message(OSCMessage { addr, args: vec![] })));
	}

	let (rest, type_tags) = read_osc_string(rest, consumed)?;
	if !type_tags.starts_with(',') {
		return Err(OSCError::MissingTypeTag);
	}
	let consumed = input.len() - rest.len();

	let (rest, args) = read_osc_args(rest, consumed, &type_tags[1..])?;
	Ok((rest, OSCPacket::Message(OSCMessage { addr, args })))
}

fn read_osc_args<'a>(mut input: &'a [u8], mut consumed: usize, type_tags: &str) -> OSCResult<(&'a [u8], Vec<OSCType>)> {
	let mut args: Vec<OSCType> = Vec::with_capacity(type_tags.len());
	let mut stack: Vec<Vec<OSCType>> = Vec::new();

	for tag in type_tags.chars() {
		if tag == '[' {
			stack.push(args);
			args = Vec::new();
		} else if tag == ']' {
			let array = OSCType::Array(OSCArray { content: args });
			args = stack.pop().ok_or(OSCError::UnmatchedArrayClose)?;
			args.push(array);
		} else {
			let before = input.len();
			let (rest, arg) = read_osc_arg(input, consumed, tag)?;
			consumed += before - rest.len();
			input = rest;
			args.push(arg);
		}
	}

	if !stack.is_empty() {
		return Err(OSCError::UnmatchedArrayClose);
	}

	Ok((input, args))
}

fn read_osc_arg<'a>(input: &'a [u8], consumed: usize, tag: char) -> OSCResult<(&'a [u8], OSCType)> {
	match tag {
		'i' => be_i32_n(input).map(|(r, v)| (r, OSCType::Int(v))),
		'h' => be_i64_n(input).map(|(r, v)| (r, OSCType::Long(v))),
		'f' => be_f32_n(input).map(|(r, v)| (r, OSCType::Float(v))),
		'd' => be_f64_n(input).map(|(r, v)| (r, OSCType::Double(v))),
		's' => read_osc_string(input, consumed).map(|(r, s)| (r, OSCType::String(s))),
		'S' => read_osc_string(input, consumed).map(|(r, s)| (r, OSCType::Symbol(s))),
		'b' => read_blob(input, consumed),
		't' => read_time_tag(input).map(|(r, t)| (r, OSCType::Time(t))),
		'r' => read_quad(input).map(|(r, b)| (r, OSCType::Color(OSCColor { red: b[0], green: b[1], blue: b[2], alpha: b[3] }))),
		'm' => read_quad(input).map(|(r, b)| (r, OSCType::Midi(OSCMidiMessage { port: b[0], status: b[1], data1: b[2], data2: b[3] }))),
		'T' => Ok((input, OSCType::Bool(true))),
		'F' => Ok((input, OSCType::Bool(false))),
		'N' => Ok((input, OSCType::Nil)),
		'I' => Ok((input, OSCType::Inf)),
		'c' => read_char(input),
		_ => Err(OSCError::UnknownTypeTag(tag))
	}
}

fn read_char(input: &[u8]) -> OSCResult<(&[u8], OSCType)> {
	let (rest, v) = be_u32_n(input)?;
	let low = (v & 0xFF) as u8;
	if low >= 128 {
		return Err(OSCError::InvalidPacket);
	}
	Ok((rest, OSCType::Char(low as char)))
}

fn read_quad(input: &[u8]) -> OSCResult<(&[u8], [u8; 4])> {
	let (rest, bytes) = take_bytes(input, 4)?;
	Ok((rest, [bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_blob<'a>(input: &'a [u8], consumed: usize) -> OSCResult<(&'a [u8], OSCType)> {
	let (rest, size) = be_i32_n(input)?;
	if size < 0 {
		return Err(OSCError::InvalidPacket);
	}
	let size = size as usize;
	let (rest, blob) = take_bytes(rest, size)?;

	let total_len = consumed + 4 + size;
	let padded_total = super::encoder::pad(total_len as u64) as usize;
	let padding = padded_total - total_len;
	let (rest, _) = take_bytes(rest, padding)?;

	Ok((rest, OSCType::Blob(blob.to_vec())))
}

fn read_time_tag(input: &[u8]) -> OSCResult<(&[u8], OSCTime)> {
	let (rest, seconds) = be_u32_n(input)?;
	let (rest, fractional) = be_u32_n(rest)?;
	Ok((rest, OSCTime { seconds, fractional }))
}

fn decode_bundle(input: &[u8]) -> OSCResult<(&[u8], OSCPacket)> {
	if input.len() < 16 {
		return Err(OSCError::Truncated);
	}
	if &input[0..8] != b"#bundle\0" {
		return Err(OSCError::InvalidPacket);
	}
	let (rest, timetag) = read_time_tag(&input[8..])?;

	let mut content = Vec::new();
	let mut rest = rest;
	while !rest.is_empty() {
		let (after_len, elem_len) = be_i32_n(rest)?;
		if elem_len <= 0 || elem_len as usize > after_len.len() {
			return Err(OSCError::InvalidBundleElement);
		}
		let elem_len = elem_len as usize;
		let (_, elem_bytes) = take_bytes(after_len, elem_len)?;
		let (remainder, packet) = decode(elem_bytes)?;
		if !remainder.is_empty() {
			return Err(OSCError::InvalidBundleElement);
		}
		content.push(packet);
		rest = &after_len[elem_len..];
	}

	Ok((rest, OSCPacket::Bundle(OSCBundle { timetag, content })))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::osc::encoder::encode;

	#[test]
	fn empty_input_is_truncated() {
		assert_eq!(decode(&[]), Err(OSCError::Truncated));
	}

	#[test]
	fn neither_message_nor_bundle_is_invalid() {
		assert_eq!(decode(b"xyz\0"), Err(OSCError::InvalidPacket));
	}

	#[test]
	fn message_without_type_tag_comma_is_rejected() {
		let mut bytes = encode(&OSCPacket::Message(OSCMessage { addr: "/a".into(), args: vec![] })).unwrap();
		// corrupt the type tag string's leading comma
		let comma_pos = bytes.iter().position(|&b| b == b',').unwrap();
		bytes[comma_pos] = b'x';
		assert_eq!(decode(&bytes), Err(OSCError::MissingTypeTag));
	}

	#[test]
	fn unmatched_array_close_is_rejected() {
		let mut bytes = Vec::new();
		bytes.extend(b"/a\0\0");
		bytes.extend(b",]\0\0");
		assert_eq!(decode(&bytes), Err(OSCError::UnmatchedArrayClose));
	}

	#[test]
	fn unclosed_array_is_rejected() {
		let mut bytes = Vec::new();
		bytes.extend(b"/a\0\0");
		bytes.extend(b",[i\0");
		bytes.extend(1i32.to_be_bytes());
		assert_eq!(decode(&bytes), Err(OSCError::UnmatchedArrayClose));
	}

	#[test]
	fn unknown_type_tag_is_rejected() {
		let mut bytes = Vec::new();
		bytes.extend(b"/a\0\0");
		bytes.extend(b",z\0\0");
		assert_eq!(decode(&bytes), Err(OSCError::UnknownTypeTag('z')));
	}

	#[test]
	fn truncated_argument_payload_is_rejected() {
		let mut bytes = Vec::new();
		bytes.extend(b"/a\0\0");
		bytes.extend(b",i\0\0");
		bytes.extend([0u8, 0u8]); // only 2 of 4 required bytes
		assert_eq!(decode(&bytes), Err(OSCError::Truncated));
	}

	#[test]
	fn char_above_ascii_range_is_rejected() {
		let mut bytes = Vec::new();
		bytes.extend(b"/a\0\0");
		bytes.extend(b",c\0\0");
		bytes.extend(200u32.to_be_bytes());
		assert_eq!(decode(&bytes), Err(OSCError::InvalidPacket));
	}

	#[test]
	fn char_only_checks_the_low_byte() {
		// high bytes are supposed to be zero (spec.md §3), but the range check applies only to the
		// low byte, so a non-zero high byte with a valid low byte still decodes.
		let mut bytes = Vec::new();
		bytes.extend(b"/a\0\0");
		bytes.extend(b",c\0\0");
		bytes.extend([0x01, 0x00, 0x00, b'A']);
		let (_, packet) = decode(&bytes).unwrap();
		assert_eq!(packet.message().unwrap().args, vec![OSCType::Char('A')]);
	}

	#[test]
	fn bundle_requires_exact_header() {
		let mut bytes = Vec::new();
		bytes.extend(b"#bungle\0");
		bytes.extend(0u64.to_be_bytes());
		assert_eq!(decode(&bytes), Err(OSCError::InvalidPacket));
	}

	#[test]
	fn bundle_element_length_overrun_is_rejected() {
		let mut bytes = Vec::new();
		bytes.extend(b"#bundle\0");
		bytes.extend(1u64.to_be_bytes());
		bytes.extend(100i32.to_be_bytes()); // declares far more than remains
		assert_eq!(decode(&bytes), Err(OSCError::InvalidBundleElement));
	}

	#[test]
	fn nested_bundle_round_trips() {
		let inner = OSCBundle { timetag: OSCTime::from((5, 0)), content: vec![OSCPacket::Message(OSCMessage { addr: "/a".into(), args: vec![OSCType::Int(1)] })] };
		let outer = OSCBundle { timetag: OSCTime::IMMEDIATELY, content: vec![OSCPacket::Bundle(inner)] };
		let bytes = encode(&OSCPacket::Bundle(outer.clone())).unwrap();
		let (remainder, decoded) = decode(&bytes).unwrap();
		assert!(remainder.is_empty());
		assert_eq!(decoded, OSCPacket::Bundle(outer));
	}

	#[test]
	fn blob_round_trips_with_padding() {
		let blob = vec![1u8; 257];
		let packet = OSCPacket::Message(OSCMessage { addr: "/b".into(), args: vec![OSCType::Blob(blob)] });
		let bytes = encode(&packet).unwrap();
		let (remainder, decoded) = decode(&bytes).unwrap();
		assert!(remainder.is_empty());
		assert_eq!(decoded, packet);
	}
}
