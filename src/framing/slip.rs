//! SLIP (Serial Line Internet Protocol) byte-stuffing framing. Resynchronises on the next `END`
//! byte regardless of what came before, which makes it tolerant of a peer flushing line noise.

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

/// Frames `payload` by replacing every `END` with `ESC, ESC_END` and every `ESC` with
/// `ESC, ESC_ESC`, wrapped in a leading and trailing `END` byte.
pub fn frame(payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(payload.len() + 2);
	out.push(END);
	for &byte in payload {
		match byte {
			END => out.extend_from_slice(&[ESC, ESC_END]),
			ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
			b => out.push(b)
		}
	}
	out.push(END);
	out
}

/// Stream deframer for [`frame`]d data. A leading or trailing run of `END` bytes produces no
/// empty packets, which lets a peer flush line noise with a leading `END`.
#[derive(Debug, Default)]
pub struct SlipDeframer {
	buf: Vec<u8>,
	in_escape: bool
}

impl SlipDeframer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feeds bytes through the SLIP state machine, appending any completed packets to `out` in
	/// arrival order.
	pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<Vec<u8>>) {
		for &byte in bytes {
			if self.in_escape {
				match byte {
					ESC_END => self.buf.push(END),
					ESC_ESC => self.buf.push(ESC),
					other => self.buf.push(other)
				}
				self.in_escape = false;
				continue;
			}

			match byte {
				END => {
					if !self.buf.is_empty() {
						out.push(std::mem::take(&mut self.buf));
					}
				}
				ESC => self.in_escape = true,
				other => self.buf.push(other)
			}
		}
	}

	/// Convenience wrapper around [`SlipDeframer::feed`] returning the drained packets directly.
	pub fn feed_and_drain(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
		let mut out = Vec::new();
		self.feed(bytes, &mut out);
		out
	}
}
