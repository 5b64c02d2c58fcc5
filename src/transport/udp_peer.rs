use std::{
	collections::{HashMap, HashSet},
	net::SocketAddr,
	pin::Pin,
	sync::{Arc, Mutex as SyncMutex},
	task::{Context, Poll}
};

use futures_core::Stream;
use socket2::{Protocol, Type};
use tokio::{
	net::UdpSocket,
	sync::{mpsc, Mutex as AsyncMutex},
	task::JoinHandle
};

use super::{bind_dual_stack, error::UdpPeerError, to_dual_stack_addr, SenderEndpoint, RECV_BUFFER_SIZE};
use crate::osc::{IntoOSCPacket, OSCPacket};

struct Inner {
	socket: UdpSocket,
	senders: AsyncMutex<HashSet<SocketAddr>>,
	/// Resolved `(host, port) -> addr` cache, reused across sends so a repeated destination
	/// doesn't re-resolve (spec.md §4.6.5).
	outbound_cache: AsyncMutex<HashMap<(String, u16), SocketAddr>>,
	packet_tx: mpsc::UnboundedSender<(SenderEndpoint, OSCPacket)>
}

/// A symmetric bidirectional OSC-over-UDP socket: receives like a [`super::UdpServer`] and also
/// sends to arbitrary `(host, port)` destinations (spec.md §4.6.5).
pub struct UdpPeer {
	inner: Option<Arc<Inner>>,
	recv_task: SyncMutex<Option<JoinHandle<()>>>,
	packet_rx: mpsc::UnboundedReceiver<(SenderEndpoint, OSCPacket)>,
	packet_tx: mpsc::UnboundedSender<(SenderEndpoint, OSCPacket)>
}

impl UdpPeer {
	pub fn new() -> Self {
		let (packet_tx, packet_rx) = mpsc::unbounded_channel();
		Self { inner: None, recv_task: SyncMutex::new(None), packet_rx, packet_tx }
	}

	/// Binds `port` (`0` for ephemeral) with local-endpoint reuse enabled, so two peers can
	/// coexist on the same host for loopback testing, and begins receiving. The socket is
	/// dual-stack (IPv4 and IPv6, per spec.md §6).
	pub async fn start(&mut self, port: u16) -> Result<SocketAddr, UdpPeerError> {
		let raw = bind_dual_stack(Type::DGRAM, Protocol::UDP, port)?;
		let socket = UdpSocket::from_std(raw.into())?;
		let local_addr = socket.local_addr()?;

		let inner = Arc::new(Inner { socket, senders: AsyncMutex::new(HashSet::new()), outbound_cache: AsyncMutex::new(HashMap::new()), packet_tx: self.packet_tx.clone() });
		let recv_inner = Arc::clone(&inner);
		let handle = tokio::spawn(async move { recv_inner.recv_loop().await });
		*self.recv_task.lock().expect("udp peer recv task lock poisoned") = Some(handle);
		self.inner = Some(inner);
		Ok(local_addr)
	}

	/// A stream of decoded packets, each tagged with the [`SenderEndpoint`] that sent it.
	pub fn packets(&mut self) -> PacketStream<'_> {
		PacketStream(&mut self.packet_rx)
	}

	/// Sends `packet` to `host:port`, resolving and caching the destination address on first use.
	pub async fn send_to<P: IntoOSCPacket>(&self, packet: P, host: impl AsRef<str>, port: u16) -> Result<(), UdpPeerError> {
		let Some(inner) = self.inner.as_ref() else {
			return Err(UdpPeerError::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "udp peer not started")));
		};

		let key = (host.as_ref().to_string(), port);
		let addr = {
			let cache = inner.outbound_cache.lock().await;
			cache.get(&key).copied()
		};
		let addr = match addr {
			Some(addr) => addr,
			None => {
				let resolved = tokio::net::lookup_host((host.as_ref(), port))
					.await?
					.next()
					.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses"))?;
				let resolved = to_dual_stack_addr(resolved);
				inner.outbound_cache.lock().await.insert(key, resolved);
				resolved
			}
		};

		let bytes = crate::osc::encode(&packet.into_osc_packet())?;
		inner.socket.send_to(&bytes, addr).await?;
		Ok(())
	}

	/// Writes `packet` to the per-flow channel for `to`, exactly as [`super::UdpServer::send`].
	pub async fn send<P: IntoOSCPacket>(&self, packet: P, to: SenderEndpoint) -> Result<(), UdpPeerError> {
		let Some(inner) = self.inner.as_ref() else {
			return Err(UdpPeerError::UnknownSender);
		};
		if !inner.senders.lock().await.contains(&to.addr()) {
			return Err(UdpPeerError::UnknownSender);
		}
		let bytes = crate::osc::encode(&packet.into_osc_packet())?;
		inner.socket.send_to(&bytes, to.addr()).await?;
		Ok(())
	}

	/// Cancels the receive loop and clears cached flows/destinations. Idempotent. Closes the
	/// `packets()` stream, per spec.md §5.
	pub async fn stop(&mut self) {
		if let Some(handle) = self.recv_task.lock().expect("udp peer recv task lock poisoned").take() {
			handle.abort();
		}
		if let Some(inner) = &self.inner {
			inner.senders.lock().await.clear();
			inner.outbound_cache.lock().await.clear();
		}
		self.inner = None;
		self.packet_rx.close();
	}
}

impl Default for UdpPeer {
	fn default() -> Self {
		Self::new()
	}
}

impl Inner {
	async fn recv_loop(self: Arc<Self>) {
		let mut buf = vec![0u8; RECV_BUFFER_SIZE];
		loop {
			let (n, from) = match self.socket.recv_from(&mut buf).await {
				Ok(recvd) => recvd,
				Err(error) => {
					tracing::warn!(%error, "udp peer recv failed");
					break;
				}
			};

			self.senders.lock().await.insert(from);

			match crate::osc::decode(&buf[..n]) {
				Ok((_, packet)) => {
					if self.packet_tx.send((SenderEndpoint::new(from), packet)).is_err() {
						return;
					}
				}
				Err(error) => tracing::debug!(?error, %from, "dropping malformed udp datagram")
			}
		}
	}
}

/// Borrowed stream of `(sender, decoded packet)` pairs; see [`UdpPeer::packets`].
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
	async fn two_peers_exchange_datagrams_on_loopback() {
		let mut a = UdpPeer::new();
		let mut b = UdpPeer::new();
		let a_addr = a.start(0).await.unwrap();
		let b_addr = b.start(0).await.unwrap();

		a.send_to(OSCMessage { addr: "/hello".into(), args: vec![] }, "127.0.0.1", b_addr.port()).await.unwrap();
		let (sender, packet) = b.packets().next().await.unwrap();
		assert_eq!(packet.message().unwrap().addr, "/hello");

		b.send(OSCMessage { addr: "/world".into(), args: vec![] }, sender).await.unwrap();
		let (_, reply) = a.packets().next().await.unwrap();
		assert_eq!(reply.message().unwrap().addr, "/world");
		assert!(a_addr.port() > 0);
	}

	#[tokio::test]
	async fn send_to_unknown_sender_fails() {
		let mut peer = UdpPeer::new();
		peer.start(0).await.unwrap();
		let bogus = SenderEndpoint::new("127.0.0.1:1".parse().unwrap());
		let err = peer.send(OSCMessage { addr: "/a".into(), args: vec![] }, bogus).await.unwrap_err();
		assert!(matches!(err, UdpPeerError::UnknownSender));
	}

	#[tokio::test]
	async fn packet_stream_finishes_after_stop() {
		let mut peer = UdpPeer::new();
		peer.start(0).await.unwrap();
		peer.stop().await;
		assert_eq!(peer.packets().next().await, None);
	}
}
