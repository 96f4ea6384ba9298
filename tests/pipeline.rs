//! End-to-end runs of the enrichment pipeline on the in-memory substrate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use p256::ecdsa::SigningKey;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use dogear::app::{AppContext, Capabilities, DogearError, Result};
use dogear::config::Config;
use dogear::cover::{GeneratedImage, ImageGenerator};
use dogear::domain::{
    DeliveryStatus, DeviceRegistration, JobStatus, Platform, PushEnvironment, ReadinessReason,
    ReadinessStatus,
};
use dogear::fetcher::{FetchedBytes, FetchedPage, Fetcher};
use dogear::jobs::{EnqueueOutcome, ProcessOutcome};
use dogear::mail::{Mailer, OutboundEmail};
use dogear::push::{P256Signer, ProviderTokenSigner, PushRequest, PushResponse, PushTransport, TokenCache};
use dogear::queue::{JobQueue, COVER_QUEUE, EMAIL_SYNC_QUEUE};
use dogear::store::MemoryStore;

const URL: &str = "https://example.com/posts/long-read";

fn article() -> String {
    let body: String = (0..8)
        .map(|i| {
            format!(
                "<p>Section {} walks through the argument in ordinary prose, with enough \
                 words that any reasonable extractor keeps it as the article body.</p>",
                i
            )
        })
        .collect();
    format!(
        "<html><head><title>A Long Read</title></head><body><article>{}</article></body></html>",
        body
    )
}

struct StaticFetcher;

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch_html(&self, url: &str) -> Result<FetchedPage> {
        Ok(FetchedPage {
            body: article(),
            final_url: url.to_string(),
            content_type: Some("text/html".into()),
        })
    }

    async fn fetch_bytes(&self, _url: &str, _max_bytes: usize) -> Result<FetchedBytes> {
        Err(DogearError::Other("no images here".into()))
    }
}

#[derive(Clone, Copy)]
enum ImageStep {
    Image,
    Unavailable,
}

/// Replays steps in order; repeats the last one when exhausted.
struct ScriptedImages {
    steps: Mutex<Vec<ImageStep>>,
    calls: AtomicUsize,
}

impl ScriptedImages {
    fn new(steps: Vec<ImageStep>) -> Self {
        Self {
            steps: Mutex::new(steps),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImageGenerator for ScriptedImages {
    async fn generate(&self, _prompt: &str) -> Result<Option<GeneratedImage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.remove(0)
            } else {
                steps[0]
            }
        };
        match step {
            ImageStep::Image => Ok(Some(GeneratedImage {
                base64: "iVBORw0KGgo=".into(),
                content_type: "image/png".into(),
            })),
            ImageStep::Unavailable => Err(DogearError::Upstream {
                status: 503,
                message: "overloaded".into(),
            }),
        }
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTransport {
    tokens: Mutex<Vec<String>>,
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(&self, request: &PushRequest<'_>) -> Result<PushResponse> {
        self.tokens.lock().unwrap().push(request.device_token.to_string());
        if request.device_token == "dead" {
            return Ok(PushResponse {
                status: 410,
                reason: Some("Unregistered".into()),
            });
        }
        Ok(PushResponse {
            status: 200,
            reason: None,
        })
    }
}

struct Harness {
    ctx: AppContext,
    store: Arc<MemoryStore>,
    images: Arc<ScriptedImages>,
    mailer: Arc<RecordingMailer>,
    transport: Arc<RecordingTransport>,
}

fn harness(steps: Vec<ImageStep>, configure: impl FnOnce(&mut Config)) -> Harness {
    let mut config = Config::default();
    config.reader.render_enabled = false;
    configure(&mut config);

    let store = Arc::new(MemoryStore::new());
    let images = Arc::new(ScriptedImages::new(steps));
    let mailer = Arc::new(RecordingMailer::default());
    let transport = Arc::new(RecordingTransport::default());

    let key = P256Signer::from_key(SigningKey::from_slice(&[5u8; 32]).unwrap());
    let signer = ProviderTokenSigner::new(
        "TEAM",
        "KEY",
        Arc::new(key),
        Arc::new(TokenCache::new(chrono::Duration::minutes(50))),
    );

    let capabilities = Capabilities {
        fetcher: Arc::new(StaticFetcher),
        renderer: None,
        images: images.clone(),
        mailer: mailer.clone(),
        push_transport: transport.clone(),
        push_signer: Some(Arc::new(signer)),
    };
    let ctx = AppContext::assemble(config, store.clone(), store.clone(), capabilities);

    Harness {
        ctx,
        store,
        images,
        mailer,
        transport,
    }
}

impl Harness {
    fn register(&self, device_id: &str, token: &str) {
        self.ctx
            .pipeline
            .push()
            .registry()
            .upsert(DeviceRegistration {
                owner_id: "default".into(),
                device_id: device_id.into(),
                token: token.into(),
                platform: Platform::Ios,
                environment: PushEnvironment::Production,
                bundle_id: Some("com.example.dogear".into()),
                app_version: None,
                build_number: None,
            })
            .unwrap();
    }

    /// Deliver every queued message on `queue`, delays ignored.
    async fn pump(&self, queue: &str) -> Vec<ProcessOutcome> {
        let mut outcomes = Vec::new();
        for message in self.store.drain(queue) {
            outcomes.push(
                self.ctx
                    .pipeline
                    .handle_message(&message.queue, &message.body)
                    .await
                    .unwrap(),
            );
        }
        outcomes
    }
}

#[tokio::test]
async fn test_save_to_notification() {
    let h = harness(vec![ImageStep::Image], |_| {});
    h.register("phone", "live");

    let saved = h.ctx.pipeline.save(URL, None, None).await.unwrap();
    assert!(saved.created);
    assert!(saved.has_document);
    assert_eq!(saved.readiness.reason, Some(ReadinessReason::WaitingForCover));
    assert!(matches!(saved.cover, EnqueueOutcome::Queued { .. }));
    assert!(saved.kindle.is_none());

    let outcomes = h.pump(COVER_QUEUE).await;
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        ProcessOutcome::Succeeded { readiness } => assert!(readiness.became_ready),
        other => panic!("unexpected outcome {:?}", other),
    }

    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert_eq!(item.cover_sync.status, JobStatus::Succeeded);
    assert!(item.cover.updated_at.is_some());
    assert_eq!(item.push_channels.readiness.status, ReadinessStatus::Ready);
    assert_eq!(item.push_channels.ios.status, DeliveryStatus::Sent);
    assert!(item.push_channels.ios.event_id.is_some());
    assert_eq!(*h.transport.tokens.lock().unwrap(), vec!["live".to_string()]);
}

#[tokio::test]
async fn test_redelivered_message_is_a_noop() {
    let h = harness(vec![ImageStep::Image], |_| {});
    h.register("phone", "live");
    h.ctx.pipeline.save(URL, None, None).await.unwrap();

    let message = h.store.drain(COVER_QUEUE).remove(0);
    let first = h
        .ctx
        .pipeline
        .handle_message(&message.queue, &message.body)
        .await
        .unwrap();
    assert!(matches!(first, ProcessOutcome::Succeeded { .. }));

    let again = h
        .ctx
        .pipeline
        .handle_message(&message.queue, &message.body)
        .await
        .unwrap();
    assert_eq!(again, ProcessOutcome::Superseded);
    assert_eq!(h.images.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.tokens.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_transient_failures_retry_then_succeed() {
    let h = harness(
        vec![ImageStep::Unavailable, ImageStep::Unavailable, ImageStep::Image],
        |_| {},
    );
    let saved = h.ctx.pipeline.save(URL, None, None).await.unwrap();

    let first = h.pump(COVER_QUEUE).await;
    assert_eq!(
        first,
        vec![ProcessOutcome::RetryScheduled {
            attempt: 2,
            delay: Duration::from_secs(30)
        }]
    );
    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert_eq!(item.cover_sync.status, JobStatus::Retrying);
    assert_eq!(item.cover_sync.error_code.as_deref(), Some("upstream_timeout_or_5xx"));
    assert_eq!(item.cover_sync.retryable, Some(true));
    assert!(item.cover_sync.next_retry_at.is_some());

    let second = h.pump(COVER_QUEUE).await;
    assert_eq!(
        second,
        vec![ProcessOutcome::RetryScheduled {
            attempt: 3,
            delay: Duration::from_secs(120)
        }]
    );

    let third = h.pump(COVER_QUEUE).await;
    assert!(matches!(third[0], ProcessOutcome::Succeeded { .. }));

    let attempts: Vec<u64> = h
        .store
        .sent(COVER_QUEUE)
        .iter()
        .map(|m| m.body["attempt"].as_u64().unwrap())
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert_eq!(item.cover_sync.status, JobStatus::Succeeded);
    assert_eq!(item.cover_sync.attempt, 3);
    assert!(item.cover_sync.error_code.is_none());
}

#[tokio::test]
async fn test_retries_exhaust_into_failure() {
    let h = harness(vec![ImageStep::Unavailable], |_| {});
    let saved = h.ctx.pipeline.save(URL, None, None).await.unwrap();

    h.pump(COVER_QUEUE).await;
    h.pump(COVER_QUEUE).await;
    let last = h.pump(COVER_QUEUE).await;
    assert_eq!(
        last,
        vec![ProcessOutcome::Failed {
            code: "upstream_timeout_or_5xx".into()
        }]
    );
    assert!(h.store.drain(COVER_QUEUE).is_empty());

    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert_eq!(item.cover_sync.status, JobStatus::Failed);
    assert_eq!(item.cover_sync.attempt, 3);
    assert_eq!(item.push_channels.readiness.status, ReadinessStatus::Pending);
}

#[tokio::test]
async fn test_email_sync_without_address_fails_once() {
    let h = harness(vec![ImageStep::Image], |config| {
        config.kindle.auto_sync = true;
    });
    let saved = h.ctx.pipeline.save(URL, None, None).await.unwrap();
    assert!(saved.kindle.is_none());
    assert!(h.store.sent(EMAIL_SYNC_QUEUE).is_empty());

    h.pump(COVER_QUEUE).await;
    let outcomes = h.pump(EMAIL_SYNC_QUEUE).await;
    assert_eq!(
        outcomes,
        vec![ProcessOutcome::Failed {
            code: "config_missing".into()
        }]
    );
    assert_eq!(h.store.sent(EMAIL_SYNC_QUEUE).len(), 1);

    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert_eq!(item.kindle.job.status, JobStatus::Failed);
    assert_eq!(item.kindle.job.retryable, Some(false));
    assert_eq!(item.push_channels.kindle.status, DeliveryStatus::Failed);
    assert!(h.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_email_sync_sends_document() {
    let h = harness(vec![ImageStep::Image], |config| {
        config.kindle.to_address = Some("me@kindle.com".into());
        config.kindle.from_address = Some("dogear@example.com".into());
    });
    let saved = h.ctx.pipeline.save(URL, Some("Saved Title".into()), None).await.unwrap();
    h.pump(COVER_QUEUE).await;

    let queued = assert_ok!(h.ctx.pipeline.enqueue_kindle(&saved.item.id, false));
    assert!(matches!(queued, EnqueueOutcome::Queued { .. }));
    let outcomes = h.pump(EMAIL_SYNC_QUEUE).await;
    assert!(matches!(outcomes[0], ProcessOutcome::Succeeded { .. }));

    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "me@kindle.com");
    assert_eq!(sent[0].subject, "Saved Title");
    let html = String::from_utf8(sent[0].attachments[0].content.clone()).unwrap();
    assert!(html.contains("data:image/png;base64,"));

    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert!(item.kindle.last_synced_at.is_some());
    assert_eq!(item.push_channels.kindle.status, DeliveryStatus::Sent);

    // The device copy is current, so a non-forced sync is skipped
    let again = h.ctx.pipeline.enqueue_kindle(&saved.item.id, false).unwrap();
    assert_eq!(again, EnqueueOutcome::AlreadySatisfied);
}

fn kindle_config(config: &mut Config) {
    config.kindle.auto_sync = true;
    config.kindle.to_address = Some("me@kindle.com".into());
    config.kindle.from_address = Some("dogear@example.com".into());
}

fn attachment_html(email: &OutboundEmail) -> String {
    String::from_utf8(email.attachments[0].content.clone()).unwrap()
}

#[tokio::test]
async fn test_email_sync_waits_for_retried_cover() {
    let h = harness(vec![ImageStep::Unavailable, ImageStep::Image], kindle_config);
    let saved = h.ctx.pipeline.save(URL, None, None).await.unwrap();
    assert!(saved.kindle.is_none());

    let first = h.pump(COVER_QUEUE).await;
    assert!(matches!(first[0], ProcessOutcome::RetryScheduled { .. }));
    assert!(h.pump(EMAIL_SYNC_QUEUE).await.is_empty());
    assert!(h.mailer.sent.lock().unwrap().is_empty());

    let second = h.pump(COVER_QUEUE).await;
    assert!(matches!(second[0], ProcessOutcome::Succeeded { .. }));
    let synced = h.pump(EMAIL_SYNC_QUEUE).await;
    assert!(matches!(synced[..], [ProcessOutcome::Succeeded { .. }]));
    assert_eq!(h.store.sent(EMAIL_SYNC_QUEUE)[0].body["reason"], "cover_ready");

    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(attachment_html(&sent[0]).contains("data:image/png;base64,"));

    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert_eq!(item.kindle.job.status, JobStatus::Succeeded);
    assert!(item.kindle.last_synced_at >= item.cover.updated_at);
}

#[tokio::test]
async fn test_email_sync_follows_failed_cover() {
    let h = harness(vec![ImageStep::Unavailable], kindle_config);
    h.ctx.pipeline.save(URL, None, None).await.unwrap();

    for _ in 0..3 {
        h.pump(COVER_QUEUE).await;
    }
    let synced = h.pump(EMAIL_SYNC_QUEUE).await;
    assert!(matches!(synced[..], [ProcessOutcome::Succeeded { .. }]));
    assert_eq!(h.store.sent(EMAIL_SYNC_QUEUE)[0].body["reason"], "cover_failed");

    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(!attachment_html(&sent[0]).contains("data:image"));
}

#[tokio::test]
async fn test_email_sync_runs_at_save_when_cover_exists() {
    let h = harness(vec![ImageStep::Image], kindle_config);
    let saved = h.ctx.pipeline.save(URL, None, None).await.unwrap();
    h.pump(COVER_QUEUE).await;
    h.pump(EMAIL_SYNC_QUEUE).await;

    // Saving again finds the cover in place, so the sync is decided right away
    let again = h.ctx.pipeline.save(URL, None, None).await.unwrap();
    assert_eq!(again.cover, EnqueueOutcome::AlreadySatisfied);
    assert_eq!(again.kindle, Some(EnqueueOutcome::AlreadySatisfied));
    assert_eq!(h.mailer.sent.lock().unwrap().len(), 1);
    assert_eq!(saved.item.id, again.item.id);
}

#[tokio::test]
async fn test_failed_notification_is_recorded() {
    let h = harness(vec![ImageStep::Image], |_| {});
    h.register("phone", "live");
    let saved = h.ctx.pipeline.save(URL, None, None).await.unwrap();

    h.store.set_fail_prefix(Some("device:"));
    let outcomes = h.pump(COVER_QUEUE).await;
    match &outcomes[0] {
        ProcessOutcome::Succeeded { readiness } => assert!(readiness.became_ready),
        other => panic!("unexpected outcome {:?}", other),
    }

    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert_eq!(item.push_channels.readiness.status, ReadinessStatus::Ready);
    assert_eq!(item.push_channels.ios.status, DeliveryStatus::Failed);
    assert!(item.push_channels.ios.last_error.is_some());
    assert!(h.transport.tokens.lock().unwrap().is_empty());

    // An explicit notify recovers once the store answers again
    h.store.set_fail_prefix(None);
    let outcome = assert_ok!(h.ctx.pipeline.notify(&saved.item.id, None).await);
    assert_eq!(outcome.success_count, 1);
    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert_eq!(item.push_channels.ios.status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn test_no_devices_marks_push_skipped() {
    let h = harness(vec![ImageStep::Image], |_| {});
    let saved = h.ctx.pipeline.save(URL, None, None).await.unwrap();
    h.pump(COVER_QUEUE).await;

    let item = h.ctx.repo.get_item(&saved.item.id).unwrap().unwrap();
    assert_eq!(item.push_channels.readiness.status, ReadinessStatus::Ready);
    assert_eq!(item.push_channels.ios.status, DeliveryStatus::Skipped);
    assert_eq!(item.push_channels.ios.last_error.as_deref(), Some("no_devices"));
}

#[tokio::test]
async fn test_notify_prunes_dead_device() {
    let h = harness(vec![ImageStep::Image], |_| {});
    h.register("phone", "live");
    h.register("old-phone", "dead");
    let saved = h.ctx.pipeline.save(URL, None, None).await.unwrap();

    let outcome = h.ctx.pipeline.notify(&saved.item.id, None).await.unwrap();
    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.failed_count, 1);
    assert_eq!(outcome.pruned_count, 1);

    let registry = h.ctx.pipeline.push().registry();
    assert!(registry.get("default", "old-phone").unwrap().is_none());
    assert!(registry.resolve_token("dead").unwrap().is_none());
    assert_eq!(registry.list("default").unwrap().len(), 1);
}

#[tokio::test]
async fn test_batch_isolates_bad_messages() {
    let h = harness(vec![ImageStep::Image], |_| {});
    h.ctx.pipeline.save(URL, None, None).await.unwrap();
    h.store
        .send(COVER_QUEUE, &json!({"garbage": true}), None)
        .unwrap();

    let lease = Duration::from_secs(60);
    let messages = assert_ok!(h.store.receive(COVER_QUEUE, 10, lease));
    assert_eq!(messages.len(), 2);
    let report = h.ctx.pipeline.handle_batch(h.store.as_ref(), messages).await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);
    assert!(assert_ok!(h.store.receive(COVER_QUEUE, 10, lease)).is_empty());
}

#[tokio::test]
async fn test_save_rejects_invalid_url() {
    let h = harness(vec![ImageStep::Image], |_| {});
    assert_err!(h.ctx.pipeline.save("not a url", None, None).await);
}

#[tokio::test]
async fn test_save_twice_keeps_one_item() {
    let h = harness(vec![ImageStep::Image], |_| {});
    let first = h.ctx.pipeline.save(URL, None, None).await.unwrap();
    let second = h.ctx.pipeline.save(URL, None, None).await.unwrap();

    assert!(!second.created);
    assert_eq!(first.item.id, second.item.id);
    assert_eq!(second.cover, EnqueueOutcome::AlreadyActive);
    assert_eq!(h.ctx.repo.list_item_ids().unwrap().len(), 1);
}
