//! Integration tests for the dispatch engine
//!
//! These drive full ticks against in-memory fakes for the queue, the
//! attachment store, the token provider and the transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};

use dispatch::gmail::api::TokenResponse;
use dispatch::{
    AttachmentRef, Credential, CredentialError, CredentialManager, DeliveryStatus, Dispatcher,
    InMemoryAttachmentStore, InMemoryQueueStore, MessageId, QueueStore, QueuedMessage,
    TokenProvider, Transport, TransportError,
};

/// Token provider fake: counts refresh calls, can be made to fail
struct FakeProvider {
    calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl TokenProvider for FakeProvider {
    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CredentialError::Exchange("connection reset".into()));
        }
        Ok(TokenResponse {
            access_token: "fresh-token".into(),
            refresh_token: Some(refresh_token.to_string()),
            expires_in: Some(3600),
            token_type: Some("Bearer".into()),
        })
    }
}

/// Transport fake: records decoded envelopes, fails selected recipients
struct FakeTransport {
    sent: Mutex<Vec<String>>,
    fail_recipients: Vec<String>,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_recipients: Vec::new(),
        }
    }

    fn failing_for(recipients: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_recipients: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn sent_mime(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn send(&self, _access_token: &str, raw_envelope: &str) -> Result<(), TransportError> {
        let mime = decode_envelope(raw_envelope);
        for recipient in &self.fail_recipients {
            if mime.contains(&format!("To: {}", recipient)) {
                return Err(TransportError::Rejected(500));
            }
        }
        self.sent.lock().unwrap().push(mime);
        Ok(())
    }
}

fn decode_envelope(raw: &str) -> String {
    String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap()
}

fn fresh_credential() -> Credential {
    Credential {
        access_token: "cached-token".into(),
        refresh_token: Some("refresh".into()),
        expires_at: Some(Utc::now().timestamp() + 3600),
    }
}

fn expired_credential() -> Credential {
    Credential {
        access_token: "stale-token".into(),
        refresh_token: Some("refresh".into()),
        expires_at: Some(Utc::now().timestamp() - 1),
    }
}

struct Harness {
    queue: Arc<InMemoryQueueStore>,
    attachments: Arc<InMemoryAttachmentStore>,
    transport: Arc<FakeTransport>,
    dispatcher: Dispatcher,
    refresh_calls: Arc<AtomicUsize>,
    refresh_fail: Arc<AtomicBool>,
}

fn harness(credential: Credential, transport: FakeTransport) -> Harness {
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let refresh_fail = Arc::new(AtomicBool::new(false));
    let provider = FakeProvider {
        calls: refresh_calls.clone(),
        fail: refresh_fail.clone(),
    };

    let queue = Arc::new(InMemoryQueueStore::new());
    let attachments = Arc::new(InMemoryAttachmentStore::new());
    let transport = Arc::new(transport);
    let credentials = Arc::new(CredentialManager::new(Box::new(provider), credential));

    let dispatcher = Dispatcher::new(
        queue.clone(),
        attachments.clone(),
        credentials,
        transport.clone(),
    );

    Harness {
        queue,
        attachments,
        transport,
        dispatcher,
        refresh_calls,
        refresh_fail,
    }
}

fn make_message(id: &str, cap: u32, age_secs: i64) -> QueuedMessage {
    QueuedMessage::builder(MessageId::new(id))
        .from("me@example.com")
        .to(format!("{}@example.com", id))
        .subject("Subject")
        .body(format!("Body for {}", id))
        .send_time(Utc::now() - Duration::seconds(age_secs))
        .throttle_limit(cap)
        .owner("me@example.com")
        .build()
}

#[test]
fn test_no_double_send() {
    let h = harness(fresh_credential(), FakeTransport::new());
    for i in 0..3 {
        h.queue.insert(make_message(&format!("m{}", i), 10, 60)).unwrap();
    }

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.sent, 3);

    // Terminal records never come back from the due-query
    assert!(h.queue.query_due(Utc::now()).unwrap().is_empty());

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.due, 0);
    assert_eq!(h.transport.sent_count(), 3);
}

#[test]
fn test_rate_cap_conservation_across_ticks() {
    let h = harness(fresh_credential(), FakeTransport::new());
    // 15 records sharing cap 10, all due, distinct send times
    for i in 0..15 {
        h.queue
            .insert(make_message(&format!("m{:02}", i), 10, 1500 - i * 10))
            .unwrap();
    }

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.sent, 10);
    assert_eq!(stats.deferred, 5);
    assert_eq!(h.queue.count_with_status(DeliveryStatus::Scheduled), 5);

    // The 10 oldest went out first
    let first_batch = h.transport.sent_mime();
    assert!(first_batch[0].contains("To: m00@example.com"));
    assert!(first_batch[9].contains("To: m09@example.com"));

    // The remainder goes out on a later tick, untouched in between
    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.sent, 5);
    assert_eq!(stats.deferred, 0);
    assert_eq!(h.queue.count_with_status(DeliveryStatus::Sent), 15);
}

#[test]
fn test_independent_group_caps() {
    let h = harness(fresh_credential(), FakeTransport::new());
    for i in 0..5 {
        h.queue.insert(make_message(&format!("a{}", i), 3, 500)).unwrap();
        h.queue.insert(make_message(&format!("b{}", i), 5, 500)).unwrap();
    }

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.sent, 8); // 3 + 5
    assert_eq!(stats.deferred, 2);
    assert_eq!(h.queue.count_with_status(DeliveryStatus::Scheduled), 2);
}

#[test]
fn test_expired_token_refreshes_exactly_once_before_sends() {
    let h = harness(expired_credential(), FakeTransport::new());
    for i in 0..4 {
        h.queue.insert(make_message(&format!("m{}", i), 10, 60)).unwrap();
    }

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.sent, 4);
    assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fresh_token_triggers_no_refresh() {
    let h = harness(fresh_credential(), FakeTransport::new());
    h.queue.insert(make_message("m1", 10, 60)).unwrap();

    h.dispatcher.run_tick(Utc::now());
    assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_credential_failure_aborts_tick_and_next_tick_recovers() {
    let h = harness(expired_credential(), FakeTransport::new());
    h.refresh_fail.store(true, Ordering::SeqCst);
    for i in 0..3 {
        h.queue.insert(make_message(&format!("m{}", i), 10, 60)).unwrap();
    }

    let stats = h.dispatcher.run_tick(Utc::now());
    assert!(stats.aborted);
    assert_eq!(stats.sent, 0);
    assert_eq!(h.transport.sent_count(), 0);
    // Nothing was attempted, so everything is still scheduled
    assert_eq!(h.queue.count_with_status(DeliveryStatus::Scheduled), 3);

    // The next tick retries from scratch
    h.refresh_fail.store(false, Ordering::SeqCst);
    let stats = h.dispatcher.run_tick(Utc::now());
    assert!(!stats.aborted);
    assert_eq!(stats.sent, 3);
}

#[test]
fn test_transport_failure_is_isolated_to_one_message() {
    let h = harness(
        fresh_credential(),
        FakeTransport::failing_for(&["m1@example.com"]),
    );
    // Distinct ages keep the send order deterministic: m0, m1, m2
    h.queue.insert(make_message("m0", 10, 300)).unwrap();
    h.queue.insert(make_message("m1", 10, 200)).unwrap();
    h.queue.insert(make_message("m2", 10, 100)).unwrap();

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.failed, 1);

    assert_eq!(
        h.queue.get(&MessageId::new("m1")).unwrap().status,
        DeliveryStatus::Failed
    );
    // The failure did not block the batch-mate after it
    assert_eq!(
        h.queue.get(&MessageId::new("m2")).unwrap().status,
        DeliveryStatus::Sent
    );
}

#[test]
fn test_attachment_travels_in_envelope_and_is_deleted() {
    let h = harness(fresh_credential(), FakeTransport::new());

    let att = AttachmentRef::new("m1/report.pdf", "report.pdf");
    h.attachments.put(&att, b"pdf bytes");
    let mut msg = make_message("m1", 10, 60);
    msg.attachment = Some(att);
    h.queue.insert(msg).unwrap();

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.sent, 1);

    let mime = &h.transport.sent_mime()[0];
    assert!(mime.contains("Content-Type: application/pdf"));
    assert!(mime.contains("Content-Disposition: attachment; filename=\"report.pdf\""));

    // Consumed by the attempt, so the blob is gone
    assert_eq!(h.attachments.deleted_paths(), vec!["m1/report.pdf".to_string()]);
}

#[test]
fn test_attachment_cleanup_is_per_message() {
    let h = harness(fresh_credential(), FakeTransport::new());

    for (id, path) in [("m1", "m1/a.txt"), ("m2", "m2/b.txt")] {
        let att = AttachmentRef::new(path, "file.txt");
        h.attachments.put(&att, b"bytes");
        let mut msg = make_message(id, 10, 60);
        msg.attachment = Some(att);
        h.queue.insert(msg).unwrap();
    }

    h.dispatcher.run_tick(Utc::now());

    let mut deleted = h.attachments.deleted_paths();
    deleted.sort();
    assert_eq!(deleted, vec!["m1/a.txt".to_string(), "m2/b.txt".to_string()]);
}

#[test]
fn test_missing_attachment_degrades_but_message_sends() {
    let h = harness(fresh_credential(), FakeTransport::new());

    // Reference a blob that was never stored
    let mut msg = make_message("m1", 10, 120);
    msg.attachment = Some(AttachmentRef::new("m1/ghost.pdf", "ghost.pdf"));
    h.queue.insert(msg).unwrap();
    h.queue.insert(make_message("m2", 10, 60)).unwrap();

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.failed, 0);

    // Sent without the attachment part
    let mime = &h.transport.sent_mime()[0];
    assert!(mime.contains("To: m1@example.com"));
    assert!(!mime.contains("Content-Disposition"));

    // Both messages reached a terminal status
    assert_eq!(
        h.queue.get(&MessageId::new("m1")).unwrap().status,
        DeliveryStatus::Sent
    );
    assert_eq!(
        h.queue.get(&MessageId::new("m2")).unwrap().status,
        DeliveryStatus::Sent
    );
}

#[test]
fn test_malformed_headers_fail_only_that_message() {
    let h = harness(fresh_credential(), FakeTransport::new());

    let mut bad = make_message("bad", 10, 120);
    bad.subject = "Hi\r\nBcc: sneaky@example.com".into();
    h.queue.insert(bad).unwrap();
    h.queue.insert(make_message("good", 10, 60)).unwrap();

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.sent, 1);
    assert_eq!(
        h.queue.get(&MessageId::new("bad")).unwrap().status,
        DeliveryStatus::Failed
    );
}

#[test]
fn test_empty_due_set_is_a_no_op() {
    let h = harness(expired_credential(), FakeTransport::new());
    // One record exists but is not yet due
    h.queue.insert(make_message("future", 10, -3600)).unwrap();

    let stats = h.dispatcher.run_tick(Utc::now());
    assert_eq!(stats.due, 0);
    assert_eq!(h.transport.sent_count(), 0);
    assert_eq!(h.queue.status_write_count(), 0);
    // No sends, so not even a refresh of the expired token
    assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 0);
}

/// Transport that blocks inside send until released, to hold a tick in flight
struct BlockingTransport {
    started: mpsc::Sender<()>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Transport for BlockingTransport {
    fn send(&self, _access_token: &str, _raw_envelope: &str) -> Result<(), TransportError> {
        self.started.send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        Ok(())
    }
}

#[test]
fn test_overlapping_tick_is_skipped() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();

    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let provider = FakeProvider {
        calls: refresh_calls,
        fail: Arc::new(AtomicBool::new(false)),
    };

    let queue = Arc::new(InMemoryQueueStore::new());
    queue.insert(make_message("m1", 10, 60)).unwrap();

    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        Arc::new(InMemoryAttachmentStore::new()),
        Arc::new(CredentialManager::new(
            Box::new(provider),
            fresh_credential(),
        )),
        Arc::new(BlockingTransport {
            started: started_tx,
            release: Mutex::new(release_rx),
        }),
    ));

    let in_flight = dispatcher.clone();
    let worker = std::thread::spawn(move || in_flight.run_tick(Utc::now()));

    // Wait until the first tick is inside the transport call
    started_rx.recv().unwrap();

    let stats = dispatcher.run_tick(Utc::now());
    assert!(stats.skipped);
    assert_eq!(stats.sent, 0);

    release_tx.send(()).unwrap();
    let first = worker.join().unwrap();
    assert!(!first.skipped);
    assert_eq!(first.sent, 1);
    assert_eq!(queue.count_with_status(DeliveryStatus::Sent), 1);
}

/// Transport whose first send panics; later sends succeed
struct PanicOnceTransport {
    panicked: AtomicBool,
}

impl Transport for PanicOnceTransport {
    fn send(&self, _access_token: &str, _raw_envelope: &str) -> Result<(), TransportError> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("transport blew up");
        }
        Ok(())
    }
}

#[test]
fn test_panicking_tick_does_not_wedge_later_ticks() {
    let provider = FakeProvider {
        calls: Arc::new(AtomicUsize::new(0)),
        fail: Arc::new(AtomicBool::new(false)),
    };

    let queue = Arc::new(InMemoryQueueStore::new());
    queue.insert(make_message("m1", 10, 60)).unwrap();

    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        Arc::new(InMemoryAttachmentStore::new()),
        Arc::new(CredentialManager::new(
            Box::new(provider),
            fresh_credential(),
        )),
        Arc::new(PanicOnceTransport {
            panicked: AtomicBool::new(false),
        }),
    ));

    let unwinding = dispatcher.clone();
    let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        unwinding.run_tick(Utc::now())
    }));
    assert!(first.is_err());

    // The in-flight guard must have been released on unwind; the record was
    // never marked terminal, so the next tick picks it up and delivers it.
    let stats = dispatcher.run_tick(Utc::now());
    assert!(!stats.skipped);
    assert_eq!(stats.sent, 1);
    assert_eq!(queue.count_with_status(DeliveryStatus::Sent), 1);
}
