mod common;

use common::{api, listing, mount_default_listing, mount_listing, stub};
use dragnet::blob::{BlobStore, MemoryBlobStore};
use dragnet::broker::consumer::{ReliableConsumer, SubscriptionEnd};
use dragnet::broker::memory::MemoryBroker;
use dragnet::broker::publisher::ReliablePublisher;
use dragnet::broker::ConnectionManager;
use dragnet::harvest::Harvester;
use dragnet::images::ImageMirror;
use dragnet::models::NoticeRecord;
use dragnet::organizer::NoticeProcessor;
use dragnet::shutdown::Shutdown;
use dragnet::store::{MemoryNoticeStore, RecordUpserter};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUEUE: &str = "notices_meta";

fn harvester(server: &MockServer, broker: &MemoryBroker) -> Harvester<MemoryBroker> {
    let publisher = ReliablePublisher::new(ConnectionManager::new(broker.clone(), QUEUE, "publisher"))
        .with_retry_delay(Duration::ZERO);
    Harvester::new(api(server), publisher)
        .with_nationalities(vec!["AA".into()])
        .with_max_age(0)
}

async fn mount_api(server: &MockServer, weight: f64) {
    // X1 shows up under AA and again under every nationality-less filter.
    mount_listing(
        server,
        vec![("nationality", "AA")],
        listing(2, vec![stub("X1", "first"), stub("Y2", "other")], None),
    )
    .await;
    mount_default_listing(server, listing(1, vec![stub("X1", "second")], None)).await;

    Mock::given(method("GET"))
        .and(path("/notices/X1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entity_id": "X1",
            "name": "DOE",
            "forename": "JOHN",
            "weight": weight,
            "_links": { "images": { "href": format!("{}/notices/X1/images", server.uri()) } }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/notices/Y2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/notices/X1/images"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "images": [
                { "_links": { "self": { "href": format!("{}/img/1", server.uri()) } } }
            ] }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNG".to_vec()))
        .mount(server)
        .await;
}

async fn detail_requests(server: &MockServer, id: &str) -> usize {
    let wanted = format!("/notices/{id}");
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == wanted)
        .count()
}

#[tokio::test]
async fn harvest_publishes_each_unique_record_once() {
    let server = MockServer::start().await;
    mount_api(&server, 80.0).await;
    let broker = MemoryBroker::new();

    let stats = harvester(&server, &broker)
        .run_cycle(&Shutdown::never())
        .await;

    // AA + 3 (age, sex) cells + 1 age + 3 sexes + unfiltered
    assert_eq!(stats.filters(), 9);
    assert_eq!(stats.stubs(), 2 + 8);
    assert_eq!(stats.unique(), 2);
    assert_eq!(stats.details(), 1);
    assert_eq!(stats.detail_failed(), 1);
    assert_eq!(stats.publishes(), 1);
    assert_eq!(detail_requests(&server, "X1").await, 1);

    let queued = broker.ready(QUEUE);
    assert_eq!(queued.len(), 1);
    let record: NoticeRecord = serde_json::from_slice(&queued[0]).unwrap();
    assert_eq!(record.entity_id, "X1");
    assert_eq!(record.weight, Some(80.0));
    assert!(record.upload_time.is_some());
}

#[tokio::test]
async fn harvest_survives_broker_drops() {
    let server = MockServer::start().await;
    mount_api(&server, 80.0).await;
    let broker = MemoryBroker::new();
    broker.fail_next_publishes(3);

    let stats = harvester(&server, &broker)
        .run_cycle(&Shutdown::never())
        .await;

    assert_eq!(stats.publishes(), 1);
    assert_eq!(stats.publish_failed(), 0);
    assert_eq!(broker.ready(QUEUE).len(), 1);
}

#[tokio::test]
async fn interrupted_harvest_publishes_nothing() {
    let server = MockServer::start().await;
    mount_api(&server, 80.0).await;
    let broker = MemoryBroker::new();
    let (trigger, shutdown) = dragnet::shutdown::channel();
    trigger.trigger();

    let stats = harvester(&server, &broker).run_cycle(&shutdown).await;
    assert_eq!(stats.publishes(), 0);
    assert!(broker.ready(QUEUE).is_empty());
}

#[tokio::test]
async fn second_sighting_updates_instead_of_inserting() {
    let server = MockServer::start().await;
    let broker = MemoryBroker::new();
    let store = MemoryNoticeStore::new();
    let blobs = MemoryBlobStore::new();

    let processor = NoticeProcessor::new(
        RecordUpserter::new(store.clone()),
        ImageMirror::new(api(&server), blobs.clone()),
    );
    let mut consumer =
        ReliableConsumer::new(ConnectionManager::new(broker.clone(), QUEUE, "consumer"), processor);
    let mut never = Shutdown::never();

    // First pass: new record.
    mount_api(&server, 80.0).await;
    harvester(&server, &broker).run_cycle(&never).await;
    let end = consumer.run_subscription(&mut never).await;
    assert!(matches!(end, SubscriptionEnd::Drained));

    assert_eq!(store.inserts(), 1);
    assert_eq!(store.updates(), 0);
    assert_eq!(store.get("X1").unwrap().weight, Some(80.0));
    assert_eq!(blobs.list("X1/").await.unwrap(), vec!["X1/image_1.png"]);

    // Second pass: same identity, one field changed upstream.
    server.reset().await;
    mount_api(&server, 82.5).await;
    harvester(&server, &broker).run_cycle(&never).await;
    consumer.run_subscription(&mut never).await;

    assert_eq!(store.len(), 1);
    assert_eq!(store.inserts(), 1);
    assert_eq!(store.updates(), 1);
    let stored = store.get("X1").unwrap();
    assert_eq!(stored.weight, Some(82.5));
    assert_eq!(stored.name.as_deref(), Some("DOE"));

    let stats = consumer.handler().stats();
    assert_eq!(stats.inserts(), 1);
    assert_eq!(stats.updates(), 1);
    assert_eq!(broker.acked().len(), 2);
}
