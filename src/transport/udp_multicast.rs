use std::{
	net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
	pin::Pin,
	sync::{Arc, Mutex as SyncMutex},
	task::{Context, Poll}
};

use futures_core::Stream;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
	net::UdpSocket,
	sync::{mpsc, oneshot},
	task::JoinHandle
};

use super::{error::MulticastError, SenderEndpoint, RECV_BUFFER_SIZE};
use crate::osc::{IntoOSCPacket, OSCPacket};

struct Inner {
	socket: UdpSocket,
	group: IpAddr,
	port: u16,
	packet_tx: mpsc::UnboundedSender<(SenderEndpoint, OSCPacket)>
}

/// An async OSC-over-UDP multicast group member (spec.md §4.6.6).
///
/// Joins an IPv4 (224.0.0.0/4) or IPv6 multicast group, enables local-endpoint reuse and
/// loopback, and behaves otherwise like [`super::UdpServer`]: a receive stream plus
/// send-to-group/send-to-member.
pub struct UdpMulticast {
	group: IpAddr,
	port: u16,
	inner: Option<Arc<Inner>>,
	recv_task: SyncMutex<Option<JoinHandle<()>>>,
	packet_rx: mpsc::UnboundedReceiver<(SenderEndpoint, OSCPacket)>,
	packet_tx: mpsc::UnboundedSender<(SenderEndpoint, OSCPacket)>
}

impl UdpMulticast {
	/// Creates a member for `group:port`. `group` must be a multicast address (224.0.0.0/4 for
	/// IPv4, or an IPv6 equivalent); this is not validated until [`UdpMulticast::start`] attempts
	/// to join.
	pub fn new(group: IpAddr, port: u16) -> Self {
		let (packet_tx, packet_rx) = mpsc::unbounded_channel();
		Self { group, port, inner: None, recv_task: SyncMutex::new(None), packet_rx, packet_tx }
	}

	/// Joins the group, enabling local-endpoint reuse, and begins receiving; returns once ready.
	///
	/// Surfaces three failure modes (spec.md §4.6.6): [`MulticastError::JoinFailed`] if the bind
	/// or group-join syscalls themselves fail, the same variant if the internal readiness
	/// handshake completes with an error, and [`MulticastError::Cancelled`] if that handshake's
	/// sender is dropped without a result (the setup task panicked or was aborted mid-join).
	pub async fn start(&mut self) -> Result<SocketAddr, MulticastError> {
		let group = self.group;
		let port = self.port;
		let (ready_tx, ready_rx) = oneshot::channel();

		let setup = tokio::task::spawn_blocking(move || bind_and_join(group, port));
		tokio::spawn(async move {
			let result = match setup.await {
				Ok(result) => result,
				Err(_) => Err(MulticastError::Cancelled)
			};
			let _ = ready_tx.send(result);
		});

		let socket = match ready_rx.await {
			Ok(result) => result?,
			Err(_) => return Err(MulticastError::Cancelled)
		};
		let local_addr = socket.local_addr()?;

		let inner = Arc::new(Inner { socket, group, port: local_addr.port(), packet_tx: self.packet_tx.clone() });
		let recv_inner = Arc::clone(&inner);
		let handle = tokio::spawn(async move { recv_inner.recv_loop().await });
		*self.recv_task.lock().expect("udp multicast recv task lock poisoned") = Some(handle);
		self.inner = Some(inner);
		tracing::debug!(group = %group, port, "joined multicast group");
		Ok(local_addr)
	}

	/// A stream of decoded packets, each tagged with the [`SenderEndpoint`] that sent it.
	pub fn packets(&mut self) -> PacketStream<'_> {
		PacketStream(&mut self.packet_rx)
	}

	/// Sends `packet` to every member of the group.
	pub async fn send<P: IntoOSCPacket>(&self, packet: P) -> Result<(), MulticastError> {
		let Some(inner) = self.inner.as_ref() else {
			return Err(MulticastError::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "multicast group not joined")));
		};
		let bytes = crate::osc::encode(&packet.into_osc_packet())?;
		inner.socket.send_to(&bytes, (inner.group, inner.port)).await?;
		Ok(())
	}

	/// Sends `packet` to a specific group member, useful for unicast replies over the same
	/// socket.
	pub async fn send_to<P: IntoOSCPacket>(&self, packet: P, to: SenderEndpoint) -> Result<(), MulticastError> {
		let Some(inner) = self.inner.as_ref() else {
			return Err(MulticastError::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "multicast group not joined")));
		};
		let bytes = crate::osc::encode(&packet.into_osc_packet())?;
		inner.socket.send_to(&bytes, to.addr()).await?;
		Ok(())
	}

	/// Leaves the group and closes the event stream. Idempotent.
	pub async fn stop(&mut self) {
		if let Some(handle) = self.recv_task.lock().expect("udp multicast recv task lock poisoned").take() {
			handle.abort();
		}
		if let Some(inner) = self.inner.take() {
			match (inner.group, inner.socket.local_addr()) {
				(IpAddr::V4(group), Ok(_)) => {
					let _ = inner.socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED);
				}
				(IpAddr::V6(group), Ok(_)) => {
					let _ = inner.socket.leave_multicast_v6(&group, 0);
				}
				_ => {}
			}
		}
		self.packet_rx.close();
	}
}

impl Inner {
	async fn recv_loop(self: Arc<Self>) {
		let mut buf = vec![0u8; RECV_BUFFER_SIZE];
		loop {
			let (n, from) = match self.socket.recv_from(&mut buf).await {
				Ok(recvd) => recvd,
				Err(error) => {
					tracing::warn!(%error, "multicast recv failed");
					break;
				}
			};

			match crate::osc::decode(&buf[..n]) {
				Ok((_, packet)) => {
					if self.packet_tx.send((SenderEndpoint::new(from), packet)).is_err() {
						return;
					}
				}
				Err(error) => tracing::debug!(?error, %from, "dropping malformed multicast datagram")
			}
		}
	}
}

/// Binds a socket on `port`, enables local-endpoint reuse, joins `group`, and enables multicast
/// loopback (on by default so a sole group member receives its own packets). Runs on a blocking
/// thread: `Socket::new`/`bind`/`join_multicast_*` are synchronous syscalls.
fn bind_and_join(group: IpAddr, port: u16) -> Result<UdpSocket, MulticastError> {
	match group {
		IpAddr::V4(group) => {
			let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(MulticastError::JoinFailed)?;
			raw.set_reuse_address(true).map_err(MulticastError::JoinFailed)?;
			let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
			raw.bind(&bind_addr.into()).map_err(MulticastError::JoinFailed)?;
			raw.set_nonblocking(true).map_err(MulticastError::JoinFailed)?;
			let socket = UdpSocket::from_std(raw.into()).map_err(MulticastError::JoinFailed)?;
			socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED).map_err(MulticastError::JoinFailed)?;
			socket.set_multicast_loop_v4(true).map_err(MulticastError::JoinFailed)?;
			Ok(socket)
		}
		IpAddr::V6(group) => {
			let raw = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).map_err(MulticastError::JoinFailed)?;
			raw.set_reuse_address(true).map_err(MulticastError::JoinFailed)?;
			let bind_addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
			raw.bind(&bind_addr.into()).map_err(MulticastError::JoinFailed)?;
			raw.set_nonblocking(true).map_err(MulticastError::JoinFailed)?;
			let socket = UdpSocket::from_std(raw.into()).map_err(MulticastError::JoinFailed)?;
			socket.join_multicast_v6(&group, 0).map_err(MulticastError::JoinFailed)?;
			socket.set_multicast_loop_v6(true).map_err(MulticastError::JoinFailed)?;
			Ok(socket)
		}
	}
}

/// Borrowed stream of `(sender, decoded packet)` pairs; see [`UdpMulticast::packets`].
pub struct PacketStream<'a>(&'a mut mpsc::UnboundedReceiver<(SenderEndpoint, OSCPacket)>);

impl<'a> Stream for PacketStream<'a> {
	type Item = (SenderEndpoint, OSCPacket);

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.get_mut().0.poll_recv(cx)
	}
}

#[cfg(test)]
mod tests {
	use tokio_stream::StreamExt;

	use super::*;
	use crate::osc::OSCMessage;

	#[tokio::test]
	async fn sole_member_receives_its_own_multicast_send() {
		let group: IpAddr = "239.255.0.1".parse().unwrap();
		let mut member = UdpMulticast::new(group, 0);
		member.start().await.unwrap();

		member.send(OSCMessage { addr: "/ping".into(), args: vec![] }).await.unwrap();

		let (_, packet) = tokio::time::timeout(std::time::Duration::from_secs(2), member.packets().next()).await.unwrap().unwrap();
		assert_eq!(packet.message().unwrap().addr, "/ping");
	}

	#[tokio::test]
	async fn stop_is_idempotent() {
		let group: IpAddr = "239.255.0.2".parse().unwrap();
		let mut member = UdpMulticast::new(group, 0);
		member.start().await.unwrap();
		member.stop().await;
		member.stop().await;
	}

	#[tokio::test]
	async fn packet_stream_finishes_after_stop() {
		let group: IpAddr = "239.255.0.3".parse().unwrap();
		let mut member = UdpMulticast::new(group, 0);
		member.start().await.unwrap();
		member.stop().await;
		assert_eq!(member.packets().next().await, None);
	}
}
