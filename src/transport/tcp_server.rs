use std::{
	collections::HashMap,
	net::SocketAddr,
	pin::Pin,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex as SyncMutex
	},
	task::{Context, Poll}
};

use futures_core::Stream;
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{
		tcp::{OwnedReadHalf, OwnedWriteHalf},
		TcpListener
	},
	sync::{mpsc, Mutex as AsyncMutex},
	task::JoinHandle
};

use socket2::{Protocol, Type};

use super::{bind_dual_stack, error::TcpServerError, ConnectionId, RECV_BUFFER_SIZE};
use crate::{
	framing::Framing,
	osc::{IntoOSCPacket, OSCPacket}
};

/// A connection lifecycle event from a [`TcpServer`], per spec.md §4.6.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
	Connected(ConnectionId),
	Disconnected(ConnectionId)
}

struct Connection {
	write_half: AsyncMutex<OwnedWriteHalf>,
	read_task: JoinHandle<()>
}

struct Inner {
	framing: Framing,
	connections: AsyncMutex<HashMap<ConnectionId, Arc<Connection>>>,
	next_id: AtomicU64,
	packet_tx: mpsc::UnboundedSender<(ConnectionId, OSCPacket)>,
	event_tx: mpsc::UnboundedSender<ConnectionEvent>,
	listener_task: SyncMutex<Option<JoinHandle<()>>>,
	/// Set once the server has stopped, so `packets()`/`events()` streams terminate instead of
	/// hanging on channels that will never receive again (spec.md §5, §4.6.2).
	closed: AtomicBool
}

/// A multi-connection OSC-over-TCP server (spec.md §4.6.2).
pub struct TcpServer {
	inner: Arc<Inner>,
	packet_rx: mpsc::UnboundedReceiver<(ConnectionId, OSCPacket)>,
	event_rx: mpsc::UnboundedReceiver<ConnectionEvent>
}

impl TcpServer {
	pub fn new(framing: Framing) -> Self {
		let (packet_tx, packet_rx) = mpsc::unbounded_channel();
		let (event_tx, event_rx) = mpsc::unbounded_channel();
		let inner = Arc::new(Inner {
			framing,
			connections: AsyncMutex::new(HashMap::new()),
			next_id: AtomicU64::new(0),
			packet_tx,
			event_tx,
			listener_task: SyncMutex::new(None),
			closed: AtomicBool::new(false)
		});
		Self { inner, packet_rx, event_rx }
	}

	/// Binds `port` (`0` for an ephemeral port) and begins accepting connections, returning the
	/// address actually bound. The listening socket is dual-stack (IPv4 and IPv6, per spec.md §6).
	/// Fails with a transport-level error if the port is already in use.
	pub async fn start(&self, port: u16) -> Result<SocketAddr, TcpServerError> {
		let socket = bind_dual_stack(Type::STREAM, Protocol::TCP, port)?;
		socket.listen(1024)?;
		let listener = TcpListener::from_std(socket.into())?;
		let local_addr = listener.local_addr()?;
		let inner = Arc::clone(&self.inner);
		let handle = tokio::spawn(async move { inner.accept_loop(listener).await });
		*self.inner.listener_task.lock().expect("tcp server listener lock poisoned") = Some(handle);
		Ok(local_addr)
	}

	/// A stream of decoded packets, each tagged with the id of the connection it arrived on. Ends
	/// once the server stops, per spec.md §5.
	pub fn packets(&mut self) -> PacketStream<'_> {
		PacketStream { rx: &mut self.packet_rx, inner: Arc::clone(&self.inner) }
	}

	/// A stream of `connected`/`disconnected` lifecycle events. Ends once the server stops, per
	/// spec.md §5.
	pub fn events(&mut self) -> ConnectionEvents<'_> {
		ConnectionEvents { rx: &mut self.event_rx, inner: Arc::clone(&self.inner) }
	}

	/// Encodes, frames, and writes `packet` to the connection identified by `to`.
	pub async fn send<P: IntoOSCPacket>(&self, packet: P, to: ConnectionId) -> Result<(), TcpServerError> {
		let bytes = crate::osc::encode(&packet.into_osc_packet())?;
		let framed = self.inner.framing.frame(&bytes);

		let conn = self.inner.connections.lock().await.get(&to).cloned();
		match conn {
			Some(conn) => {
				let mut write_half = conn.write_half.lock().await;
				match write_half.write_all(&framed).await {
					Ok(()) => Ok(()),
					Err(error) => {
						tracing::debug!(%error, connection = to, "tcp server write failed");
						Err(TcpServerError::Io(error))
					}
				}
			}
			None => Err(TcpServerError::NotConnected(to))
		}
	}

	/// Writes `packet` to every currently connected client. A write failing for one connection does
	/// not stop the broadcast from reaching the others, but if any connection failed, the first such
	/// error is returned once every connection has been attempted.
	pub async fn broadcast<P: IntoOSCPacket>(&self, packet: P) -> Result<(), TcpServerError> {
		let bytes = crate::osc::encode(&packet.into_osc_packet())?;
		let framed = self.inner.framing.frame(&bytes);

		let connections: Vec<Arc<Connection>> = self.inner.connections.lock().await.values().cloned().collect();
		let mut first_error = None;
		for conn in connections {
			let mut write_half = conn.write_half.lock().await;
			if let Err(error) = write_half.write_all(&framed).await {
				tracing::debug!(%error, "tcp server broadcast write failed for one connection");
				first_error.get_or_insert(error);
			}
		}
		match first_error {
			Some(error) => Err(TcpServerError::Io(error)),
			None => Ok(())
		}
	}

	/// Cancels the connection's socket and synchronously removes it. The disconnected event fires
	/// exactly once, regardless of whether this call or the read loop's own EOF wins the race.
	pub async fn disconnect(&self, id: ConnectionId) {
		self.inner.remove_connection(id, true).await;
	}

	/// Disconnects every connection and closes the listener. Idempotent. Closes the `packets()` and
	/// `events()` streams, per spec.md §5.
	pub async fn stop(&self) {
		if let Some(handle) = self.inner.listener_task.lock().expect("tcp server listener lock poisoned").take() {
			handle.abort();
		}
		let ids: Vec<ConnectionId> = self.inner.connections.lock().await.keys().copied().collect();
		for id in ids {
			self.disconnect(id).await;
		}
		self.inner.closed.store(true, Ordering::Release);
	}
}

impl Inner {
	async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
		loop {
			let (stream, peer_addr) = match listener.accept().await {
				Ok(accepted) => accepted,
				Err(error) => {
					tracing::warn!(%error, "tcp server accept failed");
					break;
				}
			};

			let id = self.next_id.fetch_add(1, Ordering::Relaxed);
			let (read_half, write_half) = stream.into_split();
			let inner = Arc::clone(&self);
			let read_task = tokio::spawn(async move { inner.read_loop(id, read_half).await });
			let conn = Arc::new(Connection { write_half: AsyncMutex::new(write_half), read_task });
			self.connections.lock().await.insert(id, conn);
			tracing::debug!(connection = id, %peer_addr, "tcp server accepted connection");
			let _ = self.event_tx.send(ConnectionEvent::Connected(id));
		}
	}

	async fn read_loop(self: Arc<Self>, id: ConnectionId, mut read_half: OwnedReadHalf) {
		let mut deframer = self.framing.deframer();
		let mut buf = vec![0u8; RECV_BUFFER_SIZE];
		loop {
			match read_half.read(&mut buf).await {
				Ok(0) | Err(_) => break,
				Ok(n) => {
					for frame in deframer.feed(&buf[..n]) {
						match crate::osc::decode(&frame) {
							Ok((_, packet)) => {
								if self.packet_tx.send((id, packet)).is_err() {
									return;
								}
							}
							Err(error) => tracing::debug!(?error, connection = id, "dropping malformed tcp frame"),
						}
					}
				}
			}
		}
		self.remove_connection(id, false).await;
	}

	/// Removes `id` from the connection table if present, firing the disconnected event exactly
	/// once. `abort_read_task` is `true` for caller-initiated disconnects (the read loop hasn't
	/// exited on its own and must be cancelled); the read loop's own exit path passes `false`
	/// since it is already finishing.
	async fn remove_connection(&self, id: ConnectionId, abort_read_task: bool) {
		let removed = self.connections.lock().await.remove(&id);
		if let Some(conn) = removed {
			if abort_read_task {
				conn.read_task.abort();
			}
			tracing::debug!(connection = id, "tcp server connection disconnected");
			let _ = self.event_tx.send(ConnectionEvent::Disconnected(id));
		}
	}
}

/// Borrowed stream of `(connection id, decoded packet)` pairs; see [`TcpServer::packets`].
pub struct PacketStream<'a> {
	rx: &'a mut mpsc::UnboundedReceiver<(ConnectionId, OSCPacket)>,
	inner: Arc<Inner>
}

impl<'a> Stream for PacketStream<'a> {
	type Item = (ConnectionId, OSCPacket);

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		if this.inner.closed.load(Ordering::Acquire) {
			return Poll::Ready(None);
		}
		this.rx.poll_recv(cx)
	}
}

/// Borrowed stream of connection lifecycle events; see [`TcpServer::events`].
pub struct ConnectionEvents<'a> {
	rx: &'a mut mpsc::UnboundedReceiver<ConnectionEvent>,
	inner: Arc<Inner>
}

impl<'a> Stream for ConnectionEvents<'a> {
	type Item = ConnectionEvent;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		if this.inner.closed.load(Ordering::Acquire) {
			return Poll::Ready(None);
		}
		this.rx.poll_recv(cx)
	}
}

#[cfg(test)]
mod tests {
	use tokio::{
		io::{AsyncReadExt, AsyncWriteExt},
		net::TcpStream
	};
	use tokio_stream::StreamExt;

	use super::*;
	use crate::osc::OSCMessage;

	#[tokio::test]
	async fn accepts_connection_and_dispatches_packets() {
		let mut server = TcpServer::new(Framing::Plh);
		let addr = server.start(0).await.unwrap();

		let mut socket = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
		let connected = server.events().next().await.unwrap();
		let id = match connected {
			ConnectionEvent::Connected(id) => id,
			other => panic!("expected Connected, got {other:?}")
		};

		let bytes = crate::osc::encode(&OSCPacket::Message(OSCMessage { addr: "/ping".into(), args: vec![] })).unwrap();
		socket.write_all(&Framing::Plh.frame(&bytes)).await.unwrap();

		let (from, packet) = server.packets().next().await.unwrap();
		assert_eq!(from, id);
		assert_eq!(packet.message().unwrap().addr, "/ping");

		server.send(OSCMessage { addr: "/pong".into(), args: vec![] }, id).await.unwrap();
		let mut len_buf = [0u8; 4];
		socket.read_exact(&mut len_buf).await.unwrap();
		let len = u32::from_be_bytes(len_buf) as usize;
		let mut payload = vec![0u8; len];
		socket.read_exact(&mut payload).await.unwrap();
		let (_, decoded) = crate::osc::decode(&payload).unwrap();
		assert_eq!(decoded.message().unwrap().addr, "/pong");
	}

	#[tokio::test]
	async fn send_to_unknown_connection_fails() {
		let server = TcpServer::new(Framing::Plh);
		let err = server.send(OSCMessage { addr: "/ping".into(), args: vec![] }, 42).await.unwrap_err();
		assert!(matches!(err, TcpServerError::NotConnected(42)));
	}

	#[tokio::test]
	async fn disconnect_fires_event_exactly_once() {
		let mut server = TcpServer::new(Framing::Plh);
		let addr = server.start(0).await.unwrap();
		let _socket = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();

		let connected = server.events().next().await.unwrap();
		let id = match connected {
			ConnectionEvent::Connected(id) => id,
			other => panic!("expected Connected, got {other:?}")
		};

		server.disconnect(id).await;
		assert_eq!(server.events().next().await.unwrap(), ConnectionEvent::Disconnected(id));
	}

	#[tokio::test]
	async fn streams_finish_after_stop() {
		let mut server = TcpServer::new(Framing::Plh);
		server.start(0).await.unwrap();
		server.stop().await;

		assert_eq!(server.packets().next().await, None);
		assert_eq!(server.events().next().await, None);
	}
}
