//! In-process transport.
//!
//! `inproc://name` endpoints meet in a process-wide registry. A publisher
//! binds a name exclusively; any number of subscribers may connect to it,
//! before or after the bind. Units travel as shared [`Envelope`]s without
//! serialization.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};
use zerobase_protocol::topic_matches;

use crate::context::IoContext;
use crate::endpoint::Endpoint;
use crate::traits::{Envelope, PubSocket, SubSocket, Transport, TransportError};

static HUBS: Lazy<DashMap<String, Arc<Hub>>> = Lazy::new(DashMap::new);
static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Meeting point for one inproc name.
#[derive(Default)]
struct Hub {
    bound: AtomicBool,
    peers: DashMap<u64, InprocPeer>,
}

struct InprocPeer {
    filters: Vec<String>,
    tx: mpsc::Sender<Envelope>,
}

fn hub_for(name: &str) -> Arc<Hub> {
    HUBS.entry(name.to_string()).or_default().clone()
}

fn release_hub(name: &str) {
    HUBS.remove_if(name, |_, hub| {
        !hub.bound.load(Ordering::SeqCst) && hub.peers.is_empty()
    });
}

/// In-process transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct InprocTransport;

impl InprocTransport {
    /// Create a new in-process transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Transport for InprocTransport {
    fn name(&self) -> &'static str {
        "inproc"
    }

    fn supports(&self, endpoint: &Endpoint) -> bool {
        matches!(endpoint, Endpoint::Inproc { .. })
    }

    fn bind(
        &self,
        _io: &IoContext,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn PubSocket>, TransportError> {
        let Endpoint::Inproc { name } = endpoint else {
            return Err(TransportError::UnsupportedScheme(endpoint.scheme()));
        };

        let hub = hub_for(name);
        if hub.bound.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AddressInUse(endpoint.clone()));
        }

        debug!(endpoint = %endpoint, "Inproc publisher bound");

        Ok(Box::new(InprocPubSocket {
            endpoint: endpoint.clone(),
            name: name.clone(),
            hub: Some(hub),
        }))
    }

    fn connect(
        &self,
        io: &IoContext,
        endpoint: &Endpoint,
        topics: &[String],
    ) -> Result<Box<dyn SubSocket>, TransportError> {
        let Endpoint::Inproc { name } = endpoint else {
            return Err(TransportError::UnsupportedScheme(endpoint.scheme()));
        };

        let (tx, rx) = mpsc::channel(io.options().high_water_mark.max(1));
        let id = NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed);
        let hub = hub_for(name);
        hub.peers.insert(
            id,
            InprocPeer {
                filters: topics.to_vec(),
                tx,
            },
        );

        debug!(endpoint = %endpoint, topics = ?topics, "Inproc subscriber connected");

        Ok(Box::new(InprocSubSocket {
            endpoint: endpoint.clone(),
            name: name.clone(),
            topics: topics.to_vec(),
            id,
            hub: Some(hub),
            inbox: rx,
        }))
    }
}

/// Publisher side of an inproc endpoint.
pub struct InprocPubSocket {
    endpoint: Endpoint,
    name: String,
    hub: Option<Arc<Hub>>,
}

impl PubSocket for InprocPubSocket {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn send(&mut self, topic: &str, payload: &Bytes) -> Result<(), TransportError> {
        let hub = self.hub.as_ref().ok_or(TransportError::Closed)?;

        let mut gone = Vec::new();
        for peer in hub.peers.iter() {
            if !peer.filters.iter().any(|f| topic_matches(f, topic)) {
                continue;
            }
            match peer.tx.try_send(Envelope::new(topic, payload.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!(endpoint = %self.endpoint, topic = %topic, "Subscriber queue full, dropping");
                }
                Err(TrySendError::Closed(_)) => gone.push(*peer.key()),
            }
        }
        for id in gone {
            hub.peers.remove(&id);
        }

        Ok(())
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.hub.as_ref().map_or(0, |hub| {
            hub.peers
                .iter()
                .filter(|p| p.filters.iter().any(|f| topic_matches(f, topic)))
                .count()
        })
    }

    fn close(&mut self) {
        if let Some(hub) = self.hub.take() {
            hub.bound.store(false, Ordering::SeqCst);
            drop(hub);
            release_hub(&self.name);
            debug!(endpoint = %self.endpoint, "Inproc publisher closed");
        }
    }
}

impl Drop for InprocPubSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// Subscriber side of an inproc endpoint.
pub struct InprocSubSocket {
    endpoint: Endpoint,
    name: String,
    topics: Vec<String>,
    id: u64,
    hub: Option<Arc<Hub>>,
    inbox: mpsc::Receiver<Envelope>,
}

#[async_trait]
impl SubSocket for InprocSubSocket {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn topics(&self) -> &[String] {
        &self.topics
    }

    async fn recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.hub.is_none() {
            return Ok(None);
        }
        Ok(self.inbox.recv().await)
    }

    fn close(&mut self) {
        if let Some(hub) = self.hub.take() {
            hub.peers.remove(&self.id);
            drop(hub);
            self.inbox.close();
            release_hub(&self.name);
            debug!(endpoint = %self.endpoint, "Inproc subscriber closed");
        }
    }
}

impl Drop for InprocSubSocket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SocketOptions;
    use std::time::Duration;

    fn io() -> IoContext {
        IoContext::new(1, SocketOptions::default()).unwrap()
    }

    #[test]
    fn test_bind_twice_is_address_in_use() {
        let io = io();
        let ep = Endpoint::inproc("test-bind-twice");
        let _first = InprocTransport.bind(&io, &ep).unwrap();

        assert!(matches!(
            InprocTransport.bind(&io, &ep),
            Err(TransportError::AddressInUse(_))
        ));
    }

    #[test]
    fn test_rebind_after_close() {
        let io = io();
        let ep = Endpoint::inproc("test-rebind");
        let mut first = InprocTransport.bind(&io, &ep).unwrap();
        first.close();
        first.close();

        assert!(InprocTransport.bind(&io, &ep).is_ok());
    }

    #[test]
    fn test_topic_filtering() {
        let io = io();
        let ep = Endpoint::inproc("test-filtering");
        let mut publisher = InprocTransport.bind(&io, &ep).unwrap();
        let mut subscriber = InprocTransport
            .connect(&io, &ep, &["A".to_string(), "B".to_string()])
            .unwrap();

        assert_eq!(publisher.subscriber_count("A"), 1);
        assert_eq!(publisher.subscriber_count("C"), 0);

        publisher.send("C", &Bytes::from_static(b"skip")).unwrap();
        publisher.send("A", &Bytes::from_static(b"hello")).unwrap();
        publisher.send("B", &Bytes::from_static(b"world")).unwrap();

        let received = io.handle().block_on(async {
            let first = subscriber.recv().await.unwrap().unwrap();
            let second = subscriber.recv().await.unwrap().unwrap();
            (first, second)
        });
        assert_eq!(received.0, Envelope::new("A", b"hello".to_vec()));
        assert_eq!(received.1, Envelope::new("B", b"world".to_vec()));
    }

    #[test]
    fn test_connect_before_bind() {
        let io = io();
        let ep = Endpoint::inproc("test-connect-first");
        let mut subscriber = InprocTransport.connect(&io, &ep, &[String::new()]).unwrap();
        let mut publisher = InprocTransport.bind(&io, &ep).unwrap();

        publisher.send("any", &Bytes::from_static(b"x")).unwrap();

        let env = io
            .handle()
            .block_on(async { tokio::time::timeout(Duration::from_secs(1), subscriber.recv()).await })
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(env.topic, "any");
    }

    #[test]
    fn test_high_water_mark_drops() {
        let io = IoContext::new(
            1,
            SocketOptions {
                high_water_mark: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let ep = Endpoint::inproc("test-hwm");
        let mut publisher = InprocTransport.bind(&io, &ep).unwrap();
        let mut subscriber = InprocTransport.connect(&io, &ep, &["t".to_string()]).unwrap();

        for i in 0..5u8 {
            publisher.send("t", &Bytes::from(vec![i])).unwrap();
        }

        let payloads = io.handle().block_on(async {
            let mut out = Vec::new();
            while let Ok(Some(Some(env))) =
                tokio::time::timeout(Duration::from_millis(50), subscriber.recv())
                    .await
                    .map(Result::ok)
            {
                out.push(env.payload[0]);
            }
            out
        });
        assert_eq!(payloads, vec![0, 1]);
    }

    #[test]
    fn test_closed_subscriber_is_removed() {
        let io = io();
        let ep = Endpoint::inproc("test-sub-close");
        let mut publisher = InprocTransport.bind(&io, &ep).unwrap();
        let mut subscriber = InprocTransport.connect(&io, &ep, &["A".to_string()]).unwrap();

        subscriber.close();
        assert_eq!(publisher.subscriber_count("A"), 0);
        assert!(publisher.send("A", &Bytes::from_static(b"x")).is_ok());

        let next = io.handle().block_on(subscriber.recv()).unwrap();
        assert!(next.is_none());
    }
}
