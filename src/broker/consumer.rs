use super::{BrokerError, BrokerSession, ConnectionManager, Connector, Delivery};
use crate::config::{CONSUMER_PREFETCH, CONSUMER_RESTART_DELAY_SECS};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What to tell the broker once a message has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done, remove it.
    Ack,
    /// Will never succeed, drop it without redelivery.
    Discard,
    /// Failed for a reason that may go away; deliver it again.
    Requeue,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Disposition;
}

/// Why a subscription stopped.
#[derive(Debug)]
pub enum SubscriptionEnd {
    Shutdown,
    /// The broker ended the stream (consumer cancelled, or nothing left in memory).
    Drained,
    Lost(BrokerError),
}

/// Pulls messages one at a time and settles each before taking the next.
pub struct ReliableConsumer<C: Connector, H: MessageHandler> {
    conn: ConnectionManager<C>,
    handler: H,
    prefetch: u16,
    restart_delay: Duration,
}

impl<C: Connector, H: MessageHandler> ReliableConsumer<C, H> {
    pub fn new(conn: ConnectionManager<C>, handler: H) -> Self {
        Self {
            conn,
            handler,
            prefetch: CONSUMER_PREFETCH,
            restart_delay: Duration::from_secs(CONSUMER_RESTART_DELAY_SECS),
        }
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_restart_delay(mut self, restart_delay: Duration) -> Self {
        self.restart_delay = restart_delay;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn connection(&mut self) -> &mut ConnectionManager<C> {
        &mut self.conn
    }

    /// Consumes until shutdown, re-subscribing after every lost connection.
    pub async fn run(&mut self, mut shutdown: Shutdown) {
        while !shutdown.is_triggered() {
            match self.run_subscription(&mut shutdown).await {
                SubscriptionEnd::Shutdown => break,
                SubscriptionEnd::Drained => {
                    debug!("Subscription ended by the broker");
                }
                SubscriptionEnd::Lost(e) => {
                    warn!(error = %e, "Consumer lost its connection, restarting in {:?}", self.restart_delay);
                    self.conn.disconnect().await;
                }
            }
            if !shutdown.sleep(self.restart_delay).await {
                break;
            }
        }
        self.conn.disconnect().await;
        info!("Consumer stopped");
    }

    /// One subscription: connect, subscribe, then handle deliveries until the
    /// stream ends, the connection drops, or shutdown is requested.
    pub async fn run_subscription(&mut self, shutdown: &mut Shutdown) -> SubscriptionEnd {
        let queue = self.conn.queue().to_string();
        let mut deliveries = match self.conn.ensure_connected().await {
            Ok(session) => match session.subscribe(&queue, self.prefetch).await {
                Ok(stream) => stream,
                Err(e) => return SubscriptionEnd::Lost(e),
            },
            Err(e) => return SubscriptionEnd::Lost(e),
        };
        info!(queue = %queue, prefetch = self.prefetch, "Waiting for messages");

        loop {
            if shutdown.is_triggered() {
                return SubscriptionEnd::Shutdown;
            }
            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => return SubscriptionEnd::Shutdown,
                next = deliveries.next() => next,
            };
            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return SubscriptionEnd::Lost(e),
                None => return SubscriptionEnd::Drained,
            };

            let disposition = self.handler.handle(&delivery.body).await;
            if let Err(e) = settle(&delivery, disposition).await {
                if e.is_connection_level() {
                    return SubscriptionEnd::Lost(e);
                }
                warn!(error = %e, ?disposition, "Could not settle delivery");
            }
        }
    }
}

async fn settle(delivery: &Delivery, disposition: Disposition) -> Result<(), BrokerError> {
    debug!(?disposition, redelivered = delivery.redelivered, "Settling delivery");
    match disposition {
        Disposition::Ack => delivery.ack().await,
        Disposition::Discard => delivery.nack(false).await,
        Disposition::Requeue => delivery.nack(true).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::shutdown;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Acks "ok", discards "bad", requeues "retry" the first time it sees it.
    #[derive(Default)]
    struct Scripted {
        seen: Mutex<Vec<String>>,
        retries: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Scripted {
        async fn handle(&self, body: &[u8]) -> Disposition {
            let body = String::from_utf8_lossy(body).to_string();
            self.seen.lock().unwrap().push(body.clone());
            match body.as_str() {
                "bad" => Disposition::Discard,
                "retry" if self.retries.fetch_add(1, Ordering::SeqCst) == 0 => {
                    Disposition::Requeue
                }
                _ => Disposition::Ack,
            }
        }
    }

    fn consumer(broker: &MemoryBroker) -> ReliableConsumer<MemoryBroker, Scripted> {
        ReliableConsumer::new(
            ConnectionManager::new(broker.clone(), "q", "test"),
            Scripted::default(),
        )
        .with_restart_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn applies_each_disposition() {
        let broker = MemoryBroker::new();
        broker.push("q", "ok");
        broker.push("q", "bad");
        broker.push("q", "retry");

        let mut consumer = consumer(&broker);
        let end = consumer.run_subscription(&mut Shutdown::never()).await;
        assert!(matches!(end, SubscriptionEnd::Drained));

        assert_eq!(broker.acked(), vec![b"ok".to_vec(), b"retry".to_vec()]);
        assert_eq!(broker.discarded(), vec![b"bad".to_vec()]);
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(
            *consumer.handler().seen.lock().unwrap(),
            vec!["ok", "bad", "retry", "retry"]
        );
    }

    #[tokio::test]
    async fn subscribes_with_configured_prefetch() {
        let broker = MemoryBroker::new();
        consumer(&broker).run_subscription(&mut Shutdown::never()).await;
        assert_eq!(broker.last_prefetch(), Some(CONSUMER_PREFETCH));

        consumer(&broker)
            .with_prefetch(0)
            .run_subscription(&mut Shutdown::never())
            .await;
        assert_eq!(broker.last_prefetch(), Some(1));
    }

    #[tokio::test]
    async fn shutdown_stops_before_next_message() {
        let broker = MemoryBroker::new();
        broker.push("q", "ok");
        let (trigger, mut shutdown) = shutdown::channel();
        trigger.trigger();

        let mut consumer = consumer(&broker);
        let end = consumer.run_subscription(&mut shutdown).await;
        assert!(matches!(end, SubscriptionEnd::Shutdown));
        assert_eq!(broker.ready("q").len(), 1);
    }

    #[tokio::test]
    async fn run_resubscribes_after_connection_loss() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(2);
        broker.push("q", "ok");
        broker.push("q", "ok");

        let (trigger, shutdown) = shutdown::channel();
        let watcher = {
            let broker = broker.clone();
            tokio::spawn(async move {
                while broker.acked().len() < 2 {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                trigger.trigger();
            })
        };

        let mut consumer = consumer(&broker);
        tokio::time::timeout(Duration::from_secs(5), consumer.run(shutdown))
            .await
            .expect("consumer did not stop");
        watcher.await.unwrap();

        assert_eq!(broker.acked().len(), 2);
        assert_eq!(broker.connects(), 1);
    }

    #[tokio::test]
    async fn severed_connection_redelivers_unsettled_message() {
        struct SeverOnFirst {
            broker: MemoryBroker,
            calls: AtomicUsize,
        }

        #[async_trait]
        impl MessageHandler for SeverOnFirst {
            async fn handle(&self, _body: &[u8]) -> Disposition {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    self.broker.sever();
                }
                Disposition::Ack
            }
        }

        let broker = MemoryBroker::new();
        broker.push("q", "payload");
        let handler = SeverOnFirst {
            broker: broker.clone(),
            calls: AtomicUsize::new(0),
        };
        let mut consumer = ReliableConsumer::new(
            ConnectionManager::new(broker.clone(), "q", "test"),
            handler,
        );

        let mut never = Shutdown::never();
        let end = consumer.run_subscription(&mut never).await;
        assert!(matches!(end, SubscriptionEnd::Lost(_)));
        assert_eq!(broker.ready("q"), vec![b"payload".to_vec()]);

        consumer.connection().disconnect().await;
        let end = consumer.run_subscription(&mut never).await;
        assert!(matches!(end, SubscriptionEnd::Drained));
        assert_eq!(broker.acked(), vec![b"payload".to_vec()]);
        assert_eq!(consumer.handler().calls.load(Ordering::SeqCst), 2);
    }
}
