//! # `osc-suite`
//!
//! Open Sound Control (OSC) 1.0 end-to-end: a binary codec for messages and bundles, a wildcard
//! address pattern matcher with a dispatching registry, two TCP stream framers (PLH and SLIP),
//! and a family of asynchronous network transports over TCP and UDP (unicast, bidirectional peer,
//! and multicast).
//!
//! This crate does not implement OSC Query, bundle time-tag scheduling (time tags are carried
//! verbatim and dispatched immediately), a transport reliability layer beyond what TCP itself
//! provides, or discovery/zeroconf.
//!
//! ## Layout
//! - [`osc`] — the value model (`OSCType`, `OSCMessage`, `OSCBundle`, `OSCPacket`, `OSCTime`) and
//!   the `encode`/`decode` codec.
//! - [`pattern`] — the OSC 1.0 address pattern matcher.
//! - [`address_space`] — a thread-safe `pattern -> handler` registry with exact/wildcard dispatch.
//! - [`framing`] — the PLH and SLIP TCP stream framers.
//! - [`transport`] — async TCP client/server and UDP client/server/peer/multicast transports.
//!
//! ## Examples
//!
//! ### Encode and decode a message
//! ```
//! use osc_suite::osc::{decode, encode, OSCMessage, OSCPacket, OSCType};
//!
//! let packet = OSCPacket::Message(OSCMessage { addr: "/volume".into(), args: vec![OSCType::Float(0.8)] });
//! let bytes = encode(&packet).unwrap();
//! let (_, decoded) = decode(&bytes).unwrap();
//! assert_eq!(decoded, packet);
//! ```
//!
//! ### Dispatch a message through the address space
//! ```
//! use osc_suite::{address_space::AddressSpace, osc::OSCMessage};
//!
//! let space = AddressSpace::new();
//! space.register("/eos/out/active/chan", |msg| println!("{}", msg.addr));
//! space.register("/eos/*", |_| {});
//! assert_eq!(space.dispatch_message(&OSCMessage { addr: "/eos/out/active/chan".into(), args: vec![] }), 2);
//! ```
//!
//! ### Send over TCP with PLH framing
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use osc_suite::{framing::Framing, osc::OSCMessage, transport::TcpClient};
//!
//! let client = TcpClient::new(Framing::Plh);
//! client.connect("127.0.0.1", 9000);
//! client.send(OSCMessage { addr: "/ping".into(), args: vec![] }).await?;
//! # Ok(()) }
//! ```

#![allow(clippy::tabs_in_doc_comments)]

pub mod address_space;
pub mod framing;
pub mod osc;
pub mod pattern;
pub mod transport;

pub use self::{
	address_space::AddressSpace,
	osc::{IntoOSCArgs, IntoOSCMessage, IntoOSCPacket, OSCBundle, OSCMessage, OSCPacket, OSCTime, OSCType}
};
