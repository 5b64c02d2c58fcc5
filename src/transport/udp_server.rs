use std::{
	collections::HashSet,
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

use super::{bind_dual_stack, error::UdpServerError, SenderEndpoint, RECV_BUFFER_SIZE};
use crate::osc::{IntoOSCPacket, OSCPacket};

struct Inner {
	socket: UdpSocket,
	/// Reconstructed per-flow state: every remote endpoint a datagram has ever arrived from,
	/// keyed by its source address, so `send` can validate that the destination is a known flow
	/// (spec.md §4.6.4, §9 "per-flow UDP channels").
	senders: AsyncMutex<HashSet<SocketAddr>>,
	packet_tx: mpsc::UnboundedSender<(SenderEndpoint, OSCPacket)>
}

/// An async OSC-over-UDP receiver with reply-to-sender capability (spec.md §4.6.4).
pub struct UdpServer {
	inner: Option<Arc<Inner>>,
	recv_task: SyncMutex<Option<JoinHandle<()>>>,
	packet_rx: mpsc::UnboundedReceiver<(SenderEndpoint, OSCPacket)>,
	packet_tx: mpsc::UnboundedSender<(SenderEndpoint, OSCPacket)>
}

impl UdpServer {
	pub fn new() -> Self {
		let (packet_tx, packet_rx) = mpsc::unbounded_channel();
		Self { inner: None, recv_task: SyncMutex::new(None), packet_rx, packet_tx }
	}

	/// Binds `port` (`0` for an ephemeral port) and begins receiving datagrams, returning the
	/// address actually bound. The socket is dual-stack (IPv4 and IPv6, per spec.md §6).
	pub async fn start(&mut self, port: u16) -> Result<SocketAddr, UdpServerError> {
		let raw = bind_dual_stack(Type::DGRAM, Protocol::UDP, port)?;
		let socket = UdpSocket::from_std(raw.into())?;
		let local_addr = socket.local_addr()?;
		let inner = Arc::new(Inner { socket, senders: AsyncMutex::new(HashSet::new()), packet_tx: self.packet_tx.clone() });
		let recv_inner = Arc::clone(&inner);
		let handle = tokio::spawn(async move { recv_inner.recv_loop().await });
		*self.recv_task.lock().expect("udp server recv task lock poisoned") = Some(handle);
		self.inner = Some(inner);
		Ok(local_addr)
	}

	/// A stream of decoded packets, each tagged with the [`SenderEndpoint`] that sent it.
	pub fn packets(&mut self) -> PacketStream<'_> {
		PacketStream(&mut self.packet_rx)
	}

	/// Writes `packet` to the per-flow channel for `to`. Fails with
	/// [`UdpServerError::UnknownSender`] if `to` has never sent a datagram, or its flow was torn
	/// down by [`UdpServer::stop`].
	pub async fn send<P: IntoOSCPacket>(&self, packet: P, to: SenderEndpoint) -> Result<(), UdpServerError> {
		let Some(inner) = self.inner.as_ref() else {
			return Err(UdpServerError::UnknownSender);
		};
		if !inner.senders.lock().await.contains(&to.addr()) {
			return Err(UdpServerError::UnknownSender);
		}
		let bytes = crate::osc::encode(&packet.into_osc_packet())?;
		inner.socket.send_to(&bytes, to.addr()).await?;
		Ok(())
	}

	/// Cancels every per-flow channel and the listener. Idempotent. Closes the `packets()` stream,
	/// per spec.md §5.
	pub async fn stop(&mut self) {
		if let Some(handle) = self.recv_task.lock().expect("udp server recv task lock poisoned").take() {
			handle.abort();
		}
		if let Some(inner) = &self.inner {
			inner.senders.lock().await.clear();
		}
		self.inner = None;
		self.packet_rx.close();
	}
}

impl Default for UdpServer {
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
					tracing::warn!(%error, "udp server recv failed");
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

/// Borrowed stream of `(sender, decoded packet)` pairs; see [`UdpServer::packets`].
pub struct PacketStream<'a>(&'a mut mpsc::UnboundedReceiver<(SenderEndpoint, OSCPacket)>);

impl<'a> Stream for PacketStream<'a> {
	type Item = (SenderEndpoint, OSCPacket);

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.get_mut().0.poll_recv(cx)
	}
}
