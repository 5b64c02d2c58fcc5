//! Loopback integration tests exercising the async transports end-to-end. Every test binds port
//! `0` and reads back the assigned ephemeral port, per spec.md §8's testable properties.

use osc_suite::{
	framing::Framing,
	osc::{OSCMessage, OSCPacket, OSCType},
	transport::{ConnectionEvent, TcpClient, TcpServer, UdpClient, UdpPeer, UdpServer}
};
use tokio_stream::StreamExt;

fn ping() -> OSCMessage {
	OSCMessage { addr: "/ping".into(), args: vec![OSCType::Int(1)] }
}

#[tokio::test]
async fn tcp_client_and_server_round_trip_with_plh_framing() {
	let mut server = TcpServer::new(Framing::Plh);
	let addr = server.start(0).await.unwrap();

	let mut client = TcpClient::new(Framing::Plh);
	client.connect("127.0.0.1", addr.port());

	let mut states = client.states();
	while states.next().await != Some(osc_suite::transport::ConnectionState::Connected) {}

	client.send(ping()).await.unwrap();

	let (conn_id, packet) = server.packets().next().await.unwrap();
	assert_eq!(packet.message().unwrap().addr, "/ping");

	server.send(OSCMessage { addr: "/pong".into(), args: vec![] }, conn_id).await.unwrap();
	let reply = client.next().await.unwrap();
	assert_eq!(reply.message().unwrap().addr, "/pong");

	server.stop().await;
}

#[tokio::test]
async fn tcp_client_and_server_round_trip_with_slip_framing() {
	let mut server = TcpServer::new(Framing::Slip);
	let addr = server.start(0).await.unwrap();

	let client = TcpClient::new(Framing::Slip);
	client.connect("127.0.0.1", addr.port());

	let mut states = client.states();
	while states.next().await != Some(osc_suite::transport::ConnectionState::Connected) {}

	client.send(ping()).await.unwrap();
	let (_, packet) = server.packets().next().await.unwrap();
	assert_eq!(packet.message().unwrap().addr, "/ping");

	server.stop().await;
}

#[tokio::test]
async fn tcp_server_disconnect_fires_event_exactly_once() {
	let mut server = TcpServer::new(Framing::Plh);
	let addr = server.start(0).await.unwrap();

	let client = TcpClient::new(Framing::Plh);
	client.connect("127.0.0.1", addr.port());

	let connected = server.events().next().await.unwrap();
	let id = match connected {
		ConnectionEvent::Connected(id) => id,
		other => panic!("expected Connected, got {other:?}")
	};

	server.disconnect(id).await;
	assert_eq!(server.events().next().await.unwrap(), ConnectionEvent::Disconnected(id));

	server.stop().await;
}

#[tokio::test]
async fn tcp_send_before_connect_is_rejected() {
	let client = TcpClient::new(Framing::Plh);
	let err = client.send(ping()).await.unwrap_err();
	assert!(matches!(err, osc_suite::transport::TcpClientError::NotConnected));
}

#[tokio::test]
async fn udp_client_and_server_round_trip() {
	let mut server = UdpServer::new();
	let addr = server.start(0).await.unwrap();

	let client = UdpClient::new(false);
	client.send(ping(), "127.0.0.1", addr.port()).await.unwrap();

	let (sender, packet) = server.packets().next().await.unwrap();
	assert_eq!(packet.message().unwrap().addr, "/ping");

	server.send(OSCMessage { addr: "/ack".into(), args: vec![] }, sender).await.unwrap();

	server.stop().await;
	client.close().await;
}

#[tokio::test]
async fn udp_peer_exchanges_datagrams_bidirectionally() {
	let mut a = UdpPeer::new();
	let mut b = UdpPeer::new();
	let a_addr = a.start(0).await.unwrap();
	let b_addr = b.start(0).await.unwrap();

	b.send_to(ping(), "127.0.0.1", a_addr.port()).await.unwrap();
	let (sender, packet) = a.packets().next().await.unwrap();
	assert_eq!(packet.message().unwrap().addr, "/ping");

	a.send(OSCMessage { addr: "/pong".into(), args: vec![] }, sender).await.unwrap();
	let (_, reply) = b.packets().next().await.unwrap();
	assert_eq!(reply.message().unwrap().addr, "/pong");

	assert!(b_addr.port() > 0);
	a.stop().await;
	b.stop().await;
}

#[tokio::test]
async fn bundle_round_trips_over_tcp() {
	use osc_suite::osc::{OSCBundle, OSCTime};

	let mut server = TcpServer::new(Framing::Plh);
	let addr = server.start(0).await.unwrap();

	let client = TcpClient::new(Framing::Plh);
	client.connect("127.0.0.1", addr.port());
	let mut states = client.states();
	while states.next().await != Some(osc_suite::transport::ConnectionState::Connected) {}

	let bundle = OSCPacket::Bundle(OSCBundle { timetag: OSCTime::IMMEDIATELY, content: vec![OSCPacket::Message(ping())] });
	client.send(bundle).await.unwrap();

	let (_, packet) = server.packets().next().await.unwrap();
	match packet {
		OSCPacket::Bundle(bundle) => assert_eq!(bundle.content.len(), 1),
		_ => panic!("expected bundle")
	}

	server.stop().await;
}
