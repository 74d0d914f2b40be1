use dragnet::blob::MemoryBlobStore;
use dragnet::broker::consumer::{ReliableConsumer, SubscriptionEnd};
use dragnet::broker::memory::MemoryBroker;
use dragnet::broker::ConnectionManager;
use dragnet::http::ApiClient;
use dragnet::images::ImageMirror;
use dragnet::models::NoticeRecord;
use dragnet::organizer::NoticeProcessor;
use dragnet::shutdown::{self, Shutdown};
use dragnet::store::{MemoryNoticeStore, RecordUpserter};
use reqwest::header::HeaderMap;
use std::time::Duration;

const QUEUE: &str = "notices_meta";

type Processor = NoticeProcessor<MemoryNoticeStore, MemoryBlobStore>;

fn consumer(broker: &MemoryBroker, store: &MemoryNoticeStore) -> ReliableConsumer<MemoryBroker, Processor> {
    let api = ApiClient::new("http://127.0.0.1:9/notices", HeaderMap::new(), 1000).unwrap();
    let processor = NoticeProcessor::new(
        RecordUpserter::new(store.clone()),
        ImageMirror::new(api, MemoryBlobStore::new()),
    );
    ReliableConsumer::new(ConnectionManager::new(broker.clone(), QUEUE, "consumer"), processor)
        .with_restart_delay(Duration::from_millis(5))
}

fn message(id: &str) -> Vec<u8> {
    let mut record = NoticeRecord::new(id);
    record.name = Some("DOE".into());
    serde_json::to_vec(&record).unwrap()
}

#[tokio::test]
async fn malformed_message_is_dropped_without_requeue() {
    let broker = MemoryBroker::new();
    let store = MemoryNoticeStore::new();
    broker.push(QUEUE, "{\"entity_id\": ");
    broker.push(QUEUE, message("A1"));

    let mut consumer = consumer(&broker, &store);
    let end = consumer.run_subscription(&mut Shutdown::never()).await;

    assert!(matches!(end, SubscriptionEnd::Drained));
    assert_eq!(broker.discarded(), vec![b"{\"entity_id\": ".to_vec()]);
    assert_eq!(broker.acked(), vec![message("A1")]);
    assert!(broker.ready(QUEUE).is_empty());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn storage_failure_requeues_and_redelivers() {
    let broker = MemoryBroker::new();
    let store = MemoryNoticeStore::new();
    store.fail_next(1);
    broker.push(QUEUE, message("A1"));

    let mut consumer = consumer(&broker, &store);
    consumer.run_subscription(&mut Shutdown::never()).await;

    // first delivery requeued, redelivery committed
    assert_eq!(broker.deliveries(), 2);
    assert_eq!(broker.acked(), vec![message("A1")]);
    assert!(broker.discarded().is_empty());
    assert_eq!(store.inserts(), 1);
    assert_eq!(consumer.handler().stats().requeues(), 1);
}

#[tokio::test]
async fn duplicate_delivery_converges() {
    let broker = MemoryBroker::new();
    let store = MemoryNoticeStore::new();
    broker.push(QUEUE, message("A1"));
    broker.push(QUEUE, message("A1"));

    let mut consumer = consumer(&broker, &store);
    consumer.run_subscription(&mut Shutdown::never()).await;

    assert_eq!(consumer.handler().upserter().store().len(), 1);
    assert_eq!(store.inserts(), 1);
    assert_eq!(store.updates(), 0);
    assert_eq!(consumer.handler().stats().unchanged_count(), 1);
}

#[tokio::test]
async fn consumer_outlives_broker_restart() {
    let broker = MemoryBroker::new();
    let store = MemoryNoticeStore::new();
    broker.push(QUEUE, message("A1"));

    let (trigger, shutdown) = shutdown::channel();
    let feeder = {
        let broker = broker.clone();
        tokio::spawn(async move {
            while broker.acked().is_empty() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            broker.sever();
            broker.fail_next_connects(2);
            broker.push(QUEUE, message("B2"));
            while broker.acked().len() < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            trigger.trigger();
        })
    };

    let mut consumer = consumer(&broker, &store);
    tokio::time::timeout(Duration::from_secs(10), consumer.run(shutdown))
        .await
        .expect("consumer did not stop");
    feeder.await.unwrap();

    assert_eq!(store.len(), 2);
    assert!(broker.connects() >= 2);
}
