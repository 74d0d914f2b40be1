//! In-process broker with the same durable-queue semantics the organizer
//! relies on: unacknowledged deliveries can be requeued or discarded, and
//! severing the broker invalidates every open session. Faults can be
//! scheduled to exercise reconnect paths.

use super::{Acknowledge, BrokerError, BrokerSession, Connector, Delivery, DeliveryStream};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: FxHashMap<String, VecDeque<Message>>,
    unacked: FxHashMap<u64, (String, Message)>,
    next_tag: u64,
    generation: u64,
    connect_faults: u32,
    publish_faults: VecDeque<BrokerError>,
    connects: u64,
    published: u64,
    deliveries: u64,
    last_prefetch: Option<u16>,
    acked: Vec<Vec<u8>>,
    discarded: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `n` session opens fail with a connection error.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().connect_faults += n;
    }

    /// The next `n` publishes fail as if the channel had been closed under them.
    pub fn fail_next_publishes(&self, n: u32) {
        let mut state = self.lock();
        for _ in 0..n {
            state
                .publish_faults
                .push_back(BrokerError::ConnectionLost("channel closed".to_string()));
        }
    }

    /// The next publish fails with `err`.
    pub fn fail_next_publish_with(&self, err: BrokerError) {
        self.lock().publish_faults.push_back(err);
    }

    /// Drops every open session, as a broker restart would.
    pub fn sever(&self) {
        let mut state = self.lock();
        state.generation += 1;
        let unacked: Vec<_> = state.unacked.drain().collect();
        for (_, (queue, mut message)) in unacked {
            message.redelivered = true;
            state.queues.entry(queue).or_default().push_front(message);
        }
    }

    /// Enqueues a raw body directly, bypassing any session.
    pub fn push(&self, queue: &str, body: impl Into<Vec<u8>>) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Message {
                body: body.into(),
                redelivered: false,
            });
    }

    /// Bodies waiting in `queue`, front first.
    pub fn ready(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }

    pub fn acked(&self) -> Vec<Vec<u8>> {
        self.lock().acked.clone()
    }

    pub fn discarded(&self) -> Vec<Vec<u8>> {
        self.lock().discarded.clone()
    }

    pub fn connects(&self) -> u64 {
        self.lock().connects
    }

    pub fn published(&self) -> u64 {
        self.lock().published
    }

    pub fn deliveries(&self) -> u64 {
        self.lock().deliveries
    }

    /// Prefetch requested by the most recent subscription.
    pub fn last_prefetch(&self) -> Option<u16> {
        self.lock().last_prefetch
    }

    fn settle(&self, tag: u64, outcome: Settle) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let (queue, mut message) = state
            .unacked
            .remove(&tag)
            .ok_or_else(|| BrokerError::ConnectionLost(format!("unknown delivery tag {tag}")))?;
        match outcome {
            Settle::Ack => state.acked.push(message.body),
            Settle::Requeue => {
                message.redelivered = true;
                state.queues.entry(queue).or_default().push_front(message);
            }
            Settle::Discard => state.discarded.push(message.body),
        }
        Ok(())
    }
}

enum Settle {
    Ack,
    Requeue,
    Discard,
}

#[async_trait]
impl Connector for MemoryBroker {
    type Session = MemorySession;

    async fn open(&self) -> Result<MemorySession, BrokerError> {
        let mut state = self.lock();
        if state.connect_faults > 0 {
            state.connect_faults -= 1;
            return Err(BrokerError::ConnectionLost("connection refused".to_string()));
        }
        state.connects += 1;
        Ok(MemorySession {
            broker: self.clone(),
            generation: state.generation,
        })
    }

    fn endpoint(&self) -> String {
        "memory://".to_string()
    }
}

pub struct MemorySession {
    broker: MemoryBroker,
    generation: u64,
}

impl MemorySession {
    fn check_open(&self, state: &BrokerState) -> Result<(), BrokerError> {
        if state.generation == self.generation {
            Ok(())
        } else {
            Err(BrokerError::ConnectionLost("connection closed".to_string()))
        }
    }
}

#[async_trait]
impl BrokerSession for MemorySession {
    fn is_open(&self) -> bool {
        self.broker.lock().generation == self.generation
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        self.check_open(&state)?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        self.check_open(&state)?;
        if let Some(fault) = state.publish_faults.pop_front() {
            if fault.is_connection_level() {
                state.generation += 1;
            }
            return Err(fault);
        }
        state.published += 1;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Message {
                body: body.to_vec(),
                redelivered: false,
            });
        Ok(())
    }

    /// Yields what is queued and ends once the queue runs dry or the session dies.
    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError> {
        {
            let mut state = self.broker.lock();
            self.check_open(&state)?;
            state.last_prefetch = Some(prefetch);
        }

        let broker = self.broker.clone();
        let generation = self.generation;
        let queue = queue.to_string();

        let deliveries = stream::unfold(false, move |finished| {
            let broker = broker.clone();
            let queue = queue.clone();
            async move {
                if finished {
                    return None;
                }
                let mut state = broker.lock();
                if state.generation != generation {
                    return Some((
                        Err(BrokerError::ConnectionLost("consumer cancelled".to_string())),
                        true,
                    ));
                }
                let message = state.queues.get_mut(&queue)?.pop_front()?;
                state.next_tag += 1;
                state.deliveries += 1;
                let tag = state.next_tag;
                state.unacked.insert(tag, (queue.clone(), message.clone()));
                drop(state);

                let acker = MemoryAcker {
                    broker: broker.clone(),
                    tag,
                };
                Some((
                    Ok(Delivery::new(message.body, message.redelivered, Box::new(acker))),
                    false,
                ))
            }
        });
        Ok(deliveries.boxed())
    }

    async fn close(&self) {}
}

struct MemoryAcker {
    broker: MemoryBroker,
    tag: u64,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.broker.settle(self.tag, Settle::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let outcome = if requeue {
            Settle::Requeue
        } else {
            Settle::Discard
        };
        self.broker.settle(self.tag, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_consume_then_ack() {
        let broker = MemoryBroker::new();
        let session = broker.open().await.unwrap();
        session.declare_queue("q").await.unwrap();
        session.publish("q", b"one").await.unwrap();

        let mut stream = session.subscribe("q", 10).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"one");
        assert_eq!(broker.unacked_count(), 1);

        delivery.ack().await.unwrap();
        assert_eq!(broker.acked(), vec![b"one".to_vec()]);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn requeued_message_comes_back_marked_redelivered() {
        let broker = MemoryBroker::new();
        broker.push("q", "payload");
        let session = broker.open().await.unwrap();
        let mut stream = session.subscribe("q", 10).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.redelivered);
        first.nack(true).await.unwrap();

        let second = stream.next().await.unwrap().unwrap();
        assert!(second.redelivered);
        second.nack(false).await.unwrap();
        assert_eq!(broker.discarded(), vec![b"payload".to_vec()]);
    }

    #[tokio::test]
    async fn sever_closes_sessions_and_returns_unacked() {
        let broker = MemoryBroker::new();
        broker.push("q", "a");
        let session = broker.open().await.unwrap();
        let mut stream = session.subscribe("q", 10).await.unwrap();
        let _held = stream.next().await.unwrap().unwrap();

        broker.sever();
        assert!(!session.is_open());
        assert_eq!(broker.ready("q"), vec![b"a".to_vec()]);
        assert!(stream.next().await.unwrap().is_err());
        assert!(session.publish("q", b"b").await.is_err());
    }
}
