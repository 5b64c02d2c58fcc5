use std::{
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex as SyncMutex
	},
	task::{Context, Poll}
};

use futures_core::Stream;
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{tcp::OwnedWriteHalf, TcpStream},
	sync::{mpsc, watch, Mutex as AsyncMutex},
	task::JoinHandle
};
use tokio_stream::wrappers::WatchStream;

use super::{error::TcpClientError, RECV_BUFFER_SIZE};
use crate::{
	framing::Framing,
	osc::{IntoOSCPacket, OSCPacket}
};

/// The state of a [`TcpClient`]'s connection, per spec.md §4.6.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Connected,
	/// Terminal: reachable from any intermediate state when `connect` itself fails.
	Failed(String)
}

struct Inner {
	framing: Framing,
	write_half: AsyncMutex<Option<OwnedWriteHalf>>,
	state: watch::Sender<ConnectionState>,
	packet_tx: mpsc::UnboundedSender<OSCPacket>,
	read_task: SyncMutex<Option<JoinHandle<()>>>,
	/// Set once the client has disconnected (by request or by read-loop EOF/error), so that the
	/// packet stream and every outstanding [`TcpClient::states`] subscription terminate instead of
	/// hanging on a channel that will never receive again (spec.md §5, §4.6.1).
	closed: AtomicBool
}

/// A single-connection OSC-over-TCP client (spec.md §4.6.1).
///
/// `TcpClient` is itself the event stream of decoded packets (`Stream<Item = OSCPacket>`,
/// mirroring the teacher's `VMCSocket`); connection state transitions are observed separately via
/// [`TcpClient::states`].
pub struct TcpClient {
	inner: Arc<Inner>,
	packet_rx: mpsc::UnboundedReceiver<OSCPacket>
}

impl TcpClient {
	/// Creates a disconnected client that will frame payloads using `framing` once connected.
	pub fn new(framing: Framing) -> Self {
		let (packet_tx, packet_rx) = mpsc::unbounded_channel();
		let (state, _) = watch::channel(ConnectionState::Disconnected);
		let inner = Arc::new(Inner { framing, write_half: AsyncMutex::new(None), state, packet_tx, read_task: SyncMutex::new(None), closed: AtomicBool::new(false) });
		Self { inner, packet_rx }
	}

	/// The current connection state.
	pub fn state(&self) -> ConnectionState {
		self.inner.state.borrow().clone()
	}

	/// A stream of connection state transitions. Each call returns an independent subscription that
	/// ends once the client disconnects, per spec.md §4.6.1.
	pub fn states(&self) -> ConnectionStates {
		ConnectionStates { stream: WatchStream::new(self.inner.state.subscribe()), inner: Arc::clone(&self.inner) }
	}

	/// Initiates a connection to `host:port`. Fire-and-forget: this returns immediately, before the
	/// connection is established; observe [`TcpClient::states`] for the outcome.
	pub fn connect(&self, host: impl Into<String>, port: u16) {
		let inner = Arc::clone(&self.inner);
		let host = host.into();
		let handle = tokio::spawn(async move { inner.run(host, port).await });
		*self.inner.read_task.lock().expect("tcp client read task lock poisoned") = Some(handle);
	}

	/// Encodes, frames, and writes `packet`. Fails with [`TcpClientError::NotConnected`] unless the
	/// client is currently `Connected`. A write failure is returned as [`TcpClientError::Io`] but
	/// does not by itself disconnect the client; only the read loop's own EOF/error does that.
	pub async fn send<P: IntoOSCPacket>(&self, packet: P) -> Result<(), TcpClientError> {
		if *self.inner.state.borrow() != ConnectionState::Connected {
			return Err(TcpClientError::NotConnected);
		}
		let bytes = crate::osc::encode(&packet.into_osc_packet())?;
		let framed = self.inner.framing.frame(&bytes);

		let mut guard = self.inner.write_half.lock().await;
		match guard.as_mut() {
			Some(write_half) => match write_half.write_all(&framed).await {
				Ok(()) => Ok(()),
				Err(error) => {
					tracing::debug!(%error, "tcp client write failed; connection stays open");
					Err(TcpClientError::Io(error))
				}
			},
			None => Err(TcpClientError::NotConnected)
		}
	}

	/// Cancels the read loop, drops the write half, and transitions to `Disconnected`. Idempotent.
	/// Closes the packet stream and every `states()` subscription, per spec.md §5.
	pub async fn disconnect(&self) {
		if let Some(handle) = self.inner.read_task.lock().expect("tcp client read task lock poisoned").take() {
			handle.abort();
		}
		self.inner.write_half.lock().await.take();
		let _ = self.inner.state.send(ConnectionState::Disconnected);
		self.inner.closed.store(true, Ordering::Release);
	}
}

impl Stream for TcpClient {
	type Item = OSCPacket;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		if this.inner.closed.load(Ordering::Acquire) {
			return Poll::Ready(None);
		}
		this.packet_rx.poll_recv(cx)
	}
}

/// A per-subscription stream of [`ConnectionState`] transitions returned by [`TcpClient::states`].
/// Ends once the client disconnects, mirroring [`TcpClient`]'s own packet stream.
pub struct ConnectionStates {
	stream: WatchStream<ConnectionState>,
	inner: Arc<Inner>
}

impl Stream for ConnectionStates {
	type Item = ConnectionState;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		if this.inner.closed.load(Ordering::Acquire) {
			return Poll::Ready(None);
		}
		Pin::new(&mut this.stream).poll_next(cx)
	}
}

#[cfg(test)]
mod tests {
	use tokio::{
		io::{AsyncReadExt, AsyncWriteExt},
		net::TcpListener
	};
	use tokio_stream::StreamExt;

	use super::*;
	use crate::osc::OSCMessage;

	#[tokio::test]
	async fn connects_sends_and_receives_a_framed_packet() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		let mut client = TcpClient::new(Framing::Plh);
		client.connect("127.0.0.1", addr.port());

		let (mut socket, _) = listener.accept().await.unwrap();

		let mut states = client.states();
		while states.next().await != Some(ConnectionState::Connected) {}

		client.send(OSCMessage { addr: "/ping".into(), args: vec![] }).await.unwrap();

		let mut len_buf = [0u8; 4];
		socket.read_exact(&mut len_buf).await.unwrap();
		let len = u32::from_be_bytes(len_buf) as usize;
		let mut payload = vec![0u8; len];
		socket.read_exact(&mut payload).await.unwrap();
		let (_, decoded) = crate::osc::decode(&payload).unwrap();
		assert_eq!(decoded.message().unwrap().addr, "/ping");

		let reply = crate::osc::encode(&OSCPacket::Message(OSCMessage { addr: "/pong".into(), args: vec![] })).unwrap();
		let framed = Framing::Plh.frame(&reply);
		socket.write_all(&framed).await.unwrap();

		let packet = client.next().await.unwrap();
		assert_eq!(packet.message().unwrap().addr, "/pong");
	}

	#[tokio::test]
	async fn send_before_connect_is_rejected() {
		let client = TcpClient::new(Framing::Plh);
		let err = client.send(OSCMessage { addr: "/ping".into(), args: vec![] }).await.unwrap_err();
		assert!(matches!(err, TcpClientError::NotConnected));
	}

	#[tokio::test]
	async fn disconnect_is_idempotent() {
		let client = TcpClient::new(Framing::Plh);
		client.disconnect().await;
		client.disconnect().await;
		assert_eq!(client.state(), ConnectionState::Disconnected);
	}

	#[tokio::test]
	async fn streams_finish_after_disconnect() {
		let mut client = TcpClient::new(Framing::Plh);
		let mut states = client.states();
		client.disconnect().await;

		assert_eq!(client.next().await, None);
		assert_eq!(states.next().await, None);
	}
}

impl Inner {
	async fn run(self: Arc<Self>, host: String, port: u16) {
		let _ = self.state.send(ConnectionState::Connecting);

		let stream = match TcpStream::connect((host.as_str(), port)).await {
			Ok(stream) => stream,
			Err(error) => {
				tracing::warn!(%host, port, %error, "tcp client failed to connect");
				let _ = self.state.send(ConnectionState::Failed(error.to_string()));
				self.closed.store(true, Ordering::Release);
				return;
			}
		};

		let (mut read_half, write_half) = stream.into_split();
		*self.write_half.lock().await = Some(write_half);
		let _ = self.state.send(ConnectionState::Connected);
		tracing::debug!(%host, port, "tcp client connected");

		let mut deframer = self.framing.deframer();
		let mut buf = vec![0u8; RECV_BUFFER_SIZE];
		loop {
			match read_half.read(&mut buf).await {
				Ok(0) | Err(_) => break,
				Ok(n) => {
					for frame in deframer.feed(&buf[..n]) {
						match crate::osc::decode(&frame) {
							Ok((_, packet)) => {
								if self.packet_tx.send(packet).is_err() {
									return;
								}
							}
							Err(error) => tracing::debug!(?error, "dropping malformed tcp frame"),
						}
					}
				}
			}
		}

		self.write_half.lock().await.take();
		let _ = self.state.send(ConnectionState::Disconnected);
		self.closed.store(true, Ordering::Release);
		tracing::debug!(%host, port, "tcp client disconnected");
	}
}
