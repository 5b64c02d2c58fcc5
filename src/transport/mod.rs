//! Asynchronous network transports (spec.md §4.6), generalizing the teacher's `Arc<UdpSocket>` +
//! stream-of-decoded-packets shape (`src/udp.rs`'s `UDPSocketStream`, now folded into every
//! transport here) across TCP and UDP, unicast and multicast.
//!
//! Every transport is an *isolated state container*: an owned socket plus a background task that
//! serializes operations, per spec.md §5. Malformed datagrams/frames are dropped at the ingress
//! boundary — logged via `tracing` for operator visibility, never surfaced on the event stream and
//! never fatal to the connection (spec.md §7).

pub mod error;
mod tcp_client;
mod tcp_server;
mod udp_client;
mod udp_multicast;
mod udp_peer;
mod udp_server;

use std::{
	fmt, io,
	net::{Ipv6Addr, SocketAddr}
};

use socket2::{Domain, Protocol, Socket, Type};

pub use self::{
	error::{MulticastError, TcpClientError, TcpServerError, UdpClientError, UdpPeerError, UdpServerError},
	tcp_client::{ConnectionState, ConnectionStates, TcpClient},
	tcp_server::{ConnectionEvent, TcpServer},
	udp_client::UdpClient,
	udp_multicast::UdpMulticast,
	udp_peer::UdpPeer,
	udp_server::UdpServer
};

/// An opaque handle identifying a remote endpoint that has sent at least one datagram to a
/// [`UdpServer`] or [`UdpPeer`]. Supports value equality and hashing, per spec.md §4.6.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderEndpoint(SocketAddr);

impl SenderEndpoint {
	pub(crate) fn new(addr: SocketAddr) -> Self {
		SenderEndpoint(addr)
	}

	/// The remote host and port this endpoint represents.
	pub fn addr(&self) -> SocketAddr {
		self.0
	}
}

impl fmt::Display for SenderEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}

/// A monotonically increasing identifier assigned to each connection accepted by a [`TcpServer`].
pub type ConnectionId = u64;

const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Builds an unbound, non-blocking dual-stack socket of `ty` (`Type::STREAM` or `Type::DGRAM`):
/// an IPv6 socket with `IPV6_V6ONLY` disabled, so it also accepts IPv4 traffic (delivered as
/// IPv4-mapped IPv6 addresses), per spec.md §6's "TCP v4/v6. UDP v4/v6." Reuse of the local
/// endpoint is enabled, matching the reuse semantics the spec already requires of `UdpClient`'s
/// broadcast mode and `UdpPeer`/`UdpMulticast`'s binds.
fn new_dual_stack_socket(ty: Type, protocol: Protocol) -> io::Result<Socket> {
	let socket = Socket::new(Domain::IPV6, ty, Some(protocol))?;
	socket.set_only_v6(false)?;
	socket.set_reuse_address(true)?;
	socket.set_nonblocking(true)?;
	Ok(socket)
}

/// Binds a dual-stack socket of `ty` to `[::]:port` (`port` `0` for an ephemeral port).
fn bind_dual_stack(ty: Type, protocol: Protocol, port: u16) -> io::Result<Socket> {
	let socket = new_dual_stack_socket(ty, protocol)?;
	let bind_addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
	socket.bind(&bind_addr.into())?;
	Ok(socket)
}

/// Converts an IPv4 destination address into its IPv4-mapped IPv6 equivalent so it can be used
/// with a dual-stack IPv6 socket's `send_to`, which otherwise rejects a plain `AF_INET` address.
/// IPv6 addresses pass through unchanged.
fn to_dual_stack_addr(addr: SocketAddr) -> SocketAddr {
	match addr {
		SocketAddr::V4(v4) => SocketAddr::new(v4.ip().to_ipv6_mapped().into(), v4.port()),
		SocketAddr::V6(_) => addr
	}
}
