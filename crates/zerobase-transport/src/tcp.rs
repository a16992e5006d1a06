//! TCP transport implementation.
//!
//! A publisher listens on `tcp://host:port` and serves every accepted
//! subscriber from its own task. Subscribers greet the publisher with a
//! `Hello` frame and register their topic filters with `Subscribe` frames;
//! the publisher only forwards matching `Publish` frames. Subscribers
//! reconnect automatically when the publisher goes away.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use zerobase_protocol::{codec, topic_matches, Frame, ProtocolError, PROTOCOL_VERSION};

use crate::context::IoContext;
use crate::endpoint::Endpoint;
use crate::traits::{Envelope, PubSocket, SubSocket, Transport, TransportError};

/// Initial read buffer capacity.
const READ_BUFFER_SIZE: usize = 4096;

/// Listen backlog for publisher sockets.
const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// TCP transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a new TCP transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn resolve_bind_addr(endpoint: &Endpoint, host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    if host == "*" {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| TransportError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            reason: "host did not resolve",
        })
}

fn listen(io: &IoContext, endpoint: &Endpoint, addr: SocketAddr) -> Result<TcpListener, TransportError> {
    let in_use = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            TransportError::AddressInUse(endpoint.clone())
        } else {
            TransportError::Io(e)
        }
    };

    // Registering the listener needs the reactor of the I/O runtime.
    let _guard = io.handle().enter();
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr).map_err(in_use)?;
    socket.listen(LISTEN_BACKLOG).map_err(in_use)
}

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn supports(&self, endpoint: &Endpoint) -> bool {
        matches!(endpoint, Endpoint::Tcp { .. })
    }

    fn bind(
        &self,
        io: &IoContext,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn PubSocket>, TransportError> {
        let Endpoint::Tcp { host, port } = endpoint else {
            return Err(TransportError::UnsupportedScheme(endpoint.scheme()));
        };

        let addr = resolve_bind_addr(endpoint, host, *port)?;
        let listener = listen(io, endpoint, addr)?;
        let local = listener.local_addr()?;

        let bound = if endpoint.is_wildcard() {
            Endpoint::tcp(local.ip().to_string(), local.port())
        } else {
            Endpoint::tcp(host.clone(), local.port())
        };

        info!(endpoint = %bound, "TCP publisher listening");

        let peers = Arc::new(DashMap::new());
        let accept_task = io.handle().spawn(accept_loop(
            listener,
            Arc::clone(&peers),
            io.options().high_water_mark.max(1),
            bound.clone(),
        ));

        Ok(Box::new(TcpPubSocket {
            endpoint: bound,
            peers,
            accept_task: Some(accept_task),
        }))
    }

    fn connect(
        &self,
        io: &IoContext,
        endpoint: &Endpoint,
        topics: &[String],
    ) -> Result<Box<dyn SubSocket>, TransportError> {
        let Endpoint::Tcp { host, port } = endpoint else {
            return Err(TransportError::UnsupportedScheme(endpoint.scheme()));
        };
        if endpoint.is_wildcard() {
            return Err(TransportError::InvalidEndpoint {
                endpoint: endpoint.clone(),
                reason: "cannot connect to the wildcard host",
            });
        }

        let (tx, rx) = mpsc::channel(io.options().high_water_mark.max(1));
        let task = io.handle().spawn(subscriber_loop(
            endpoint.clone(),
            (host.clone(), *port),
            topics.to_vec(),
            tx,
            io.options().reconnect_interval,
        ));

        debug!(endpoint = %endpoint, topics = ?topics, "TCP subscriber connecting");

        Ok(Box::new(TcpSubSocket {
            endpoint: endpoint.clone(),
            topics: topics.to_vec(),
            inbox: rx,
            task: Some(task),
        }))
    }
}

/// A subscriber connection as seen by the publisher.
struct TcpPeer {
    addr: SocketAddr,
    greeted: bool,
    filters: Vec<String>,
    tx: mpsc::Sender<Bytes>,
}

impl TcpPeer {
    fn wants(&self, topic: &str) -> bool {
        self.greeted && self.filters.iter().any(|f| topic_matches(f, topic))
    }
}

type PeerMap = Arc<DashMap<u64, TcpPeer>>;

async fn accept_loop(listener: TcpListener, peers: PeerMap, queue_depth: usize, endpoint: Endpoint) {
    let mut next_id = 0u64;

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                next_id += 1;
                let (tx, rx) = mpsc::channel(queue_depth);
                peers.insert(
                    next_id,
                    TcpPeer {
                        addr,
                        greeted: false,
                        filters: Vec::new(),
                        tx,
                    },
                );
                debug!(endpoint = %endpoint, peer = %addr, "Subscriber connected");
                tokio::spawn(serve_peer(next_id, stream, rx, Arc::clone(&peers)));
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn serve_peer(id: u64, stream: TcpStream, outbound: mpsc::Receiver<Bytes>, peers: PeerMap) {
    let addr = stream.peer_addr().ok();
    let result = peer_session(id, stream, outbound, &peers).await;
    peers.remove(&id);

    match result {
        Ok(()) => debug!(peer = ?addr, "Subscriber disconnected"),
        Err(e) => debug!(peer = ?addr, error = %e, "Subscriber dropped"),
    }
}

async fn peer_session(
    id: u64,
    stream: TcpStream,
    mut outbound: mpsc::Receiver<Bytes>,
    peers: &PeerMap,
) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        tokio::select! {
            data = outbound.recv() => match data {
                Some(data) => writer.write_all(&data).await?,
                // Socket closed or peer evicted.
                None => return Ok(()),
            },
            read = reader.read_buf(&mut buf) => {
                if read? == 0 {
                    return Ok(());
                }
                while let Some(frame) = codec::decode_from(&mut buf)? {
                    handle_control_frame(id, frame, peers)?;
                }
            }
        }
    }
}

fn handle_control_frame(id: u64, frame: Frame, peers: &PeerMap) -> Result<(), TransportError> {
    let Some(mut peer) = peers.get_mut(&id) else {
        return Ok(());
    };

    match frame {
        Frame::Hello { version } => {
            PROTOCOL_VERSION.accept(version)?;
            peer.greeted = true;
        }
        Frame::Subscribe { topic } => {
            if !peer.greeted {
                return Err(ProtocolError::Invalid("subscribe before hello".into()).into());
            }
            trace!(peer = %peer.addr, topic = %topic, "Subscription registered");
            if !peer.filters.contains(&topic) {
                peer.filters.push(topic);
            }
        }
        Frame::Publish { .. } => {
            return Err(ProtocolError::Invalid("publish frame from subscriber".into()).into());
        }
    }

    Ok(())
}

/// Publisher side of a TCP endpoint.
pub struct TcpPubSocket {
    endpoint: Endpoint,
    peers: PeerMap,
    accept_task: Option<JoinHandle<()>>,
}

impl PubSocket for TcpPubSocket {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn send(&mut self, topic: &str, payload: &Bytes) -> Result<(), TransportError> {
        if self.accept_task.is_none() {
            return Err(TransportError::Closed);
        }

        let mut data: Option<Bytes> = None;
        let mut gone = Vec::new();

        for peer in self.peers.iter() {
            if !peer.wants(topic) {
                continue;
            }
            let bytes = match &data {
                Some(bytes) => bytes.clone(),
                None => {
                    let encoded = codec::encode(&Frame::publish(topic, payload.clone()))?;
                    data = Some(encoded.clone());
                    encoded
                }
            };
            match peer.tx.try_send(bytes) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!(peer = %peer.addr, topic = %topic, "Subscriber queue full, dropping");
                }
                Err(TrySendError::Closed(_)) => gone.push(*peer.key()),
            }
        }

        for id in gone {
            self.peers.remove(&id);
        }

        Ok(())
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.peers.iter().filter(|p| p.wants(topic)).count()
    }

    fn close(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            // Dropping the senders ends every peer session.
            self.peers.clear();
            debug!(endpoint = %self.endpoint, "TCP publisher closed");
        }
    }
}

impl Drop for TcpPubSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// How a subscriber session ended.
enum SessionEnd {
    Disconnected,
    InboxClosed,
}

async fn subscriber_loop(
    endpoint: Endpoint,
    addr: (String, u16),
    topics: Vec<String>,
    tx: mpsc::Sender<Envelope>,
    reconnect_interval: Duration,
) {
    loop {
        match TcpStream::connect((addr.0.as_str(), addr.1)).await {
            Ok(stream) => {
                debug!(endpoint = %endpoint, "Connected to publisher");
                match subscriber_session(stream, &topics, &tx).await {
                    Ok(SessionEnd::InboxClosed) => return,
                    Ok(SessionEnd::Disconnected) => {
                        debug!(endpoint = %endpoint, "Publisher disconnected, reconnecting");
                    }
                    Err(e) => {
                        warn!(endpoint = %endpoint, error = %e, "Subscriber session failed, reconnecting");
                    }
                }
            }
            Err(e) => {
                trace!(endpoint = %endpoint, error = %e, "Connect failed, retrying");
            }
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(reconnect_interval).await;
    }
}

async fn subscriber_session(
    mut stream: TcpStream,
    topics: &[String],
    tx: &mpsc::Sender<Envelope>,
) -> Result<SessionEnd, TransportError> {
    stream.set_nodelay(true)?;

    let mut greeting = BytesMut::new();
    codec::encode_into(&Frame::hello(PROTOCOL_VERSION), &mut greeting)?;
    for topic in topics {
        codec::encode_into(&Frame::subscribe(topic.as_str()), &mut greeting)?;
    }
    stream.write_all(&greeting).await?;

    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        while let Some(frame) = codec::decode_from(&mut buf)? {
            match frame {
                Frame::Publish { topic, payload } => {
                    if !topics.iter().any(|f| topic_matches(f, &topic)) {
                        trace!(topic = %topic, "Dropping unit outside subscription");
                        continue;
                    }
                    if tx.send(Envelope { topic, payload }).await.is_err() {
                        return Ok(SessionEnd::InboxClosed);
                    }
                }
                other => {
                    warn!(frame = other.kind(), "Unexpected frame from publisher");
                }
            }
        }

        if stream.read_buf(&mut buf).await? == 0 {
            return Ok(SessionEnd::Disconnected);
        }
    }
}

/// Subscriber side of a TCP endpoint.
pub struct TcpSubSocket {
    endpoint: Endpoint,
    topics: Vec<String>,
    inbox: mpsc::Receiver<Envelope>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl SubSocket for TcpSubSocket {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn topics(&self) -> &[String] {
        &self.topics
    }

    async fn recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.task.is_none() {
            return Ok(None);
        }
        Ok(self.inbox.recv().await)
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.inbox.close();
            debug!(endpoint = %self.endpoint, "TCP subscriber closed");
        }
    }
}

impl Drop for TcpSubSocket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SocketOptions;
    use std::time::Instant;

    fn io() -> IoContext {
        IoContext::new(2, SocketOptions::default()).unwrap()
    }

    fn wait_for_subscriber(publisher: &dyn PubSocket, topic: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while publisher.subscriber_count(topic) == 0 {
            assert!(Instant::now() < deadline, "subscriber never registered");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_bind_resolves_ephemeral_port() {
        let io = io();
        let publisher = TcpTransport.bind(&io, &"tcp://127.0.0.1:0".parse().unwrap()).unwrap();

        match publisher.endpoint() {
            Endpoint::Tcp { host, port } => {
                assert_eq!(host, "127.0.0.1");
                assert_ne!(*port, 0);
            }
            other => panic!("Expected tcp endpoint, got {}", other),
        }
    }

    #[test]
    fn test_bind_in_use() {
        let io = io();
        let first = TcpTransport.bind(&io, &"tcp://127.0.0.1:0".parse().unwrap()).unwrap();
        let taken = first.endpoint().clone();

        assert!(matches!(
            TcpTransport.bind(&io, &taken),
            Err(TransportError::AddressInUse(_))
        ));
    }

    #[test]
    fn test_connect_to_wildcard_rejected() {
        let io = io();
        let result = TcpTransport.connect(&io, &"tcp://*:5555".parse().unwrap(), &[]);
        assert!(matches!(result, Err(TransportError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_publish_subscribe_over_tcp() {
        let io = io();
        let mut publisher = TcpTransport.bind(&io, &"tcp://127.0.0.1:0".parse().unwrap()).unwrap();
        let mut subscriber = TcpTransport
            .connect(&io, publisher.endpoint(), &["A".to_string()])
            .unwrap();

        wait_for_subscriber(publisher.as_ref(), "A");
        assert_eq!(publisher.subscriber_count("C"), 0);

        publisher.send("C", &Bytes::from_static(b"skip")).unwrap();
        publisher.send("A", &Bytes::from_static(b"hello")).unwrap();

        let env = io
            .handle()
            .block_on(async { tokio::time::timeout(Duration::from_secs(5), subscriber.recv()).await })
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(env, Envelope::new("A", b"hello".to_vec()));
    }

    #[test]
    fn test_closed_publisher_rejects_send() {
        let io = io();
        let mut publisher = TcpTransport.bind(&io, &"tcp://127.0.0.1:0".parse().unwrap()).unwrap();
        publisher.close();
        publisher.close();

        assert!(matches!(
            publisher.send("A", &Bytes::from_static(b"x")),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_control_frames_update_filters() {
        let peers: PeerMap = Arc::new(DashMap::new());
        let (tx, _rx) = mpsc::channel(1);
        peers.insert(
            1,
            TcpPeer {
                addr: "127.0.0.1:1".parse().unwrap(),
                greeted: false,
                filters: Vec::new(),
                tx,
            },
        );

        assert!(handle_control_frame(1, Frame::subscribe("A"), &peers).is_err());

        handle_control_frame(1, Frame::hello(PROTOCOL_VERSION), &peers).unwrap();
        handle_control_frame(1, Frame::subscribe("A"), &peers).unwrap();
        handle_control_frame(1, Frame::subscribe("A"), &peers).unwrap();
        handle_control_frame(1, Frame::subscribe("topic/"), &peers).unwrap();
        assert_eq!(peers.get(&1).unwrap().filters, vec!["A", "topic/"]);
        assert!(peers.get(&1).unwrap().wants("topic/porkchop"));
        assert!(!peers.get(&1).unwrap().wants("B"));

        let incompatible = zerobase_protocol::Version::new(PROTOCOL_VERSION.major + 1, 0);
        assert!(handle_control_frame(1, Frame::hello(incompatible), &peers).is_err());
        assert!(handle_control_frame(1, Frame::publish("A", Vec::new()), &peers).is_err());
    }
}
