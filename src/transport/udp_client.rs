use std::{
	io,
	net::SocketAddr,
	sync::Arc
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::{net::UdpSocket, sync::Mutex as AsyncMutex};

use super::{bind_dual_stack, error::UdpClientError, to_dual_stack_addr};
use crate::osc::{IntoOSCPacket, OSCPacket};

/// A lazy, fire-and-forget OSC-over-UDP sender (spec.md §4.6.3).
///
/// Grounded on the teacher's `VMCSender` (`src/lib.rs`'s `Arc<UdpSocket>` wrapper): no socket is
/// created until the first [`UdpClient::send`], and the same socket is reused for every
/// subsequent send.
pub struct UdpClient {
	broadcast: bool,
	socket: AsyncMutex<Option<Arc<UdpSocket>>>
}

impl UdpClient {
	/// Creates a client. `broadcast` enables local-endpoint reuse and datagram broadcast on the
	/// lazily-created socket; it is off by default, matching spec.md §4.6.3.
	pub fn new(broadcast: bool) -> Self {
		Self { broadcast, socket: AsyncMutex::new(None) }
	}

	/// Encodes `packet` and writes it as a single unframed datagram to `host:port`, creating and
	/// caching the outbound socket on first use.
	pub async fn send<P: IntoOSCPacket>(&self, packet: P, host: impl AsRef<str>, port: u16) -> Result<(), UdpClientError> {
		let bytes = crate::osc::encode(&packet.into_osc_packet())?;
		let socket = self.socket_or_create().await?;

		let mut last_err = None;
		for addr in tokio::net::lookup_host((host.as_ref(), port)).await? {
			let addr = if self.broadcast { addr } else { to_dual_stack_addr(addr) };
			match socket.send_to(&bytes, addr).await {
				Ok(_) => return Ok(()),
				Err(error) => last_err = Some(error)
			}
		}
		Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")).into())
	}

	/// Cancels and clears the outbound socket. Safe to call multiple times, including before any
	/// send has ever been made.
	pub async fn close(&self) {
		self.socket.lock().await.take();
	}

	async fn socket_or_create(&self) -> io::Result<Arc<UdpSocket>> {
		let mut guard = self.socket.lock().await;
		if let Some(socket) = guard.as_ref() {
			return Ok(Arc::clone(socket));
		}

		// Broadcast has no IPv6 equivalent, so a broadcast-enabled client stays IPv4-only; otherwise
		// bind dual-stack so `send` can reach both families, per spec.md §6.
		let socket = if self.broadcast {
			let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
			raw.set_reuse_address(true)?;
			raw.set_broadcast(true)?;
			let bind_addr: SocketAddr = "0.0.0.0:0".parse().expect("valid socket address");
			raw.bind(&bind_addr.into())?;
			raw.set_nonblocking(true)?;
			UdpSocket::from_std(raw.into())?
		} else {
			let raw = bind_dual_stack(Type::DGRAM, Protocol::UDP, 0)?;
			UdpSocket::from_std(raw.into())?
		};
		let socket = Arc::new(socket);
		*guard = Some(Arc::clone(&socket));
		tracing::debug!(broadcast = self.broadcast, "udp client created outbound socket");
		Ok(socket)
	}
}

impl Default for UdpClient {
	fn default() -> Self {
		Self::new(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::osc::OSCMessage;

	#[tokio::test]
	async fn sends_a_datagram_to_a_bound_receiver() {
		let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let addr = receiver.local_addr().unwrap();

		let client = UdpClient::new(false);
		client.send(OSCMessage { addr: "/a".into(), args: vec![] }, "127.0.0.1", addr.port()).await.unwrap();

		let mut buf = vec![0u8; 1024];
		let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
		let (_, packet) = crate::osc::decode(&buf[..n]).unwrap();
		assert_eq!(packet.message().unwrap().addr, "/a");
	}

	#[tokio::test]
	async fn close_is_idempotent_before_and_after_use() {
		let client = UdpClient::new(false);
		client.close().await;
		client.close().await;
	}
}
