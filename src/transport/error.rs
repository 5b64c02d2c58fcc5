use std::io;

use crate::osc::OSCError;

/// Errors surfaced by [`crate::transport::TcpClient`].
#[derive(Debug, thiserror::Error)]
pub enum TcpClientError {
	/// `send` was called while the client was not in the `Connected` state.
	#[error("not connected")]
	NotConnected,
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Codec(#[from] OSCError)
}

/// Errors surfaced by [`crate::transport::TcpServer`].
#[derive(Debug, thiserror::Error)]
pub enum TcpServerError {
	/// `send` was called with a connection id the server does not currently recognise.
	#[error("connection {0} is not known to this server")]
	NotConnected(u64),
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Codec(#[from] OSCError)
}

/// Errors surfaced by [`crate::transport::UdpClient`].
#[derive(Debug, thiserror::Error)]
pub enum UdpClientError {
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Codec(#[from] OSCError)
}

/// Errors surfaced by [`crate::transport::UdpServer`].
#[derive(Debug, thiserror::Error)]
pub enum UdpServerError {
	/// `send` targeted a [`crate::transport::SenderEndpoint`] that has never sent a datagram, or
	/// whose flow has since been torn down.
	#[error("no datagram has ever been received from this sender")]
	UnknownSender,
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Codec(#[from] OSCError)
}

/// Errors surfaced by [`crate::transport::UdpPeer`].
#[derive(Debug, thiserror::Error)]
pub enum UdpPeerError {
	/// `send(packet, to: sender)` targeted an endpoint with no known receive flow.
	#[error("no datagram has ever been received from this sender")]
	UnknownSender,
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Codec(#[from] OSCError)
}

/// Errors surfaced by [`crate::transport::UdpMulticast`].
#[derive(Debug, thiserror::Error)]
pub enum MulticastError {
	/// Joining the multicast group failed outright.
	#[error("failed to join multicast group: {0}")]
	JoinFailed(io::Error),
	/// `start` was cancelled before the group join completed.
	#[error("multicast start was cancelled")]
	Cancelled,
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Codec(#[from] OSCError)
}
