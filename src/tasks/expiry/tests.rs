use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use time::{Duration, PrimitiveDateTime};
use tracing::{span, Event, Metadata};

use crate::core::time::primitive_now_utc;
use crate::db::models::{User, VerificationRecord};
use crate::db::types::VerificationStatus;
use crate::services::expiry_mailer::{ExpiryEmail, Mailer, MailerError};
use crate::tasks::expiry::{
    populate_expiry_dates, send_expiry_notifications, ExpiryEmailConfig, PopulateExpiryConfig,
    VerificationStore,
};

struct MemoryStore {
    records: Mutex<Vec<VerificationRecord>>,
    users: Vec<User>,
}

impl MemoryStore {
    fn new(records: Vec<VerificationRecord>, users: Vec<User>) -> Self {
        Self { records: Mutex::new(records), users }
    }

    fn record(&self, id: i64) -> VerificationRecord {
        self.records.lock().unwrap().iter().find(|r| r.id == id).cloned().expect("record")
    }

    fn eligible(record: &VerificationRecord, now: PrimitiveDateTime) -> bool {
        record.status == VerificationStatus::Approved
            && record.expiry_date.map(|expiry| expiry < now).unwrap_or(false)
    }

    fn missing_expiry(record: &VerificationRecord) -> bool {
        record.status == VerificationStatus::Approved && record.expiry_date.is_none()
    }
}

#[async_trait]
impl VerificationStore for MemoryStore {
    async fn expired_user_id_bounds(
        &self,
        now: PrimitiveDateTime,
    ) -> Result<Option<(i64, i64)>> {
        let records = self.records.lock().unwrap();
        let ids: Vec<i64> =
            records.iter().filter(|r| Self::eligible(r, now)).map(|r| r.user_id).collect();
        Ok(ids.iter().min().copied().zip(ids.iter().max().copied()))
    }

    async fn expired_user_ids_in_window(
        &self,
        now: PrimitiveDateTime,
        batch_start: i64,
        batch_stop: i64,
    ) -> Result<Vec<i64>> {
        let records = self.records.lock().unwrap();
        let mut ids: Vec<i64> = records
            .iter()
            .filter(|r| {
                Self::eligible(r, now) && r.user_id >= batch_start && r.user_id < batch_stop
            })
            .map(|r| r.user_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn latest_expired_for_user(
        &self,
        now: PrimitiveDateTime,
        user_id: i64,
    ) -> Result<Option<VerificationRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.user_id == user_id && Self::eligible(r, now))
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn record_notification_sent(
        &self,
        record_id: i64,
        sent_reference: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records.iter_mut().find(|r| r.id == record_id).expect("record");
        record.expiry_notification_sent_at = Some(sent_reference);
        record.updated_at = now;
        Ok(())
    }

    async fn missing_expiry_user_id_bounds(&self) -> Result<Option<(i64, i64)>> {
        let records = self.records.lock().unwrap();
        let ids: Vec<i64> =
            records.iter().filter(|r| Self::missing_expiry(r)).map(|r| r.user_id).collect();
        Ok(ids.iter().min().copied().zip(ids.iter().max().copied()))
    }

    async fn missing_expiry_user_ids_in_window(
        &self,
        batch_start: i64,
        batch_stop: i64,
    ) -> Result<Vec<i64>> {
        let records = self.records.lock().unwrap();
        let mut ids: Vec<i64> = records
            .iter()
            .filter(|r| {
                Self::missing_expiry(r) && r.user_id >= batch_start && r.user_id < batch_stop
            })
            .map(|r| r.user_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn latest_missing_expiry_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<VerificationRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.user_id == user_id && Self::missing_expiry(r))
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn set_expiry_date(
        &self,
        record_id: i64,
        expiry_date: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records.iter_mut().find(|r| r.id == record_id).expect("record");
        record.expiry_date = Some(expiry_date);
        record.updated_at = now;
        Ok(())
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.users.iter().find(|u| u.id == user_id).cloned())
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<ExpiryEmail>>,
    fail_addresses: Vec<String>,
}

impl RecordingMailer {
    fn failing_for(addresses: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_addresses: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn sent_to(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|email| email.to.clone()).collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &ExpiryEmail) -> Result<(), MailerError> {
        if self.fail_addresses.contains(&email.to) {
            return Err(MailerError::Transport("connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Collects event messages so tests can assert on emitted log lines.
#[derive(Default)]
struct LogCapture {
    messages: Mutex<Vec<String>>,
}

impl LogCapture {
    fn occurrences(&self, needle: &str) -> usize {
        self.messages.lock().unwrap().iter().filter(|message| message.contains(needle)).count()
    }
}

struct CaptureSubscriber(Arc<LogCapture>);

struct MessageVisitor(Option<String>);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl tracing::Subscriber for CaptureSubscriber {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _attributes: &span::Attributes<'_>) -> span::Id {
        span::Id::from_u64(1)
    }

    fn record(&self, _id: &span::Id, _values: &span::Record<'_>) {}

    fn record_follows_from(&self, _id: &span::Id, _follows: &span::Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if let Some(message) = visitor.0 {
            self.0.messages.lock().unwrap().push(message);
        }
    }

    fn enter(&self, _id: &span::Id) {}

    fn exit(&self, _id: &span::Id) {}
}

fn user(id: i64, email: &str, full_name: &str) -> User {
    let now = primitive_now_utc();
    User {
        id,
        email: email.to_string(),
        full_name: full_name.to_string(),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn approved_record(
    id: i64,
    user_id: i64,
    expiry_date: Option<PrimitiveDateTime>,
    sent_at: Option<PrimitiveDateTime>,
    updated_at: PrimitiveDateTime,
) -> VerificationRecord {
    VerificationRecord {
        id,
        user_id,
        status: VerificationStatus::Approved,
        expiry_date,
        expiry_notification_sent_at: sent_at,
        created_at: updated_at - Duration::days(30),
        updated_at,
    }
}

fn email_config(resend_days: u32, batch_size: u32) -> ExpiryEmailConfig {
    ExpiryEmailConfig {
        resend_days,
        batch_size,
        sleep_seconds: 0,
        platform_name: "Open LMS".to_string(),
        reverification_link: "http://localhost:8000/verify_student/reverify".to_string(),
        support_link: "http://localhost:8000/support".to_string(),
    }
}

#[tokio::test]
async fn notifies_user_with_unset_timestamp_once() {
    let now = primitive_now_utc();
    let store = MemoryStore::new(
        vec![approved_record(1, 7, Some(now - Duration::days(1)), None, now - Duration::days(2))],
        vec![user(7, "learner@example.com", "Ada Lovelace")],
    );
    let mailer = RecordingMailer::default();

    let report =
        send_expiry_notifications(&store, &mailer, &email_config(15, 1000)).await.expect("run");

    assert_eq!(report.notified, 1);
    assert_eq!(mailer.sent_to(), vec!["learner@example.com".to_string()]);

    // The stored timestamp is the resend reference: roughly now + 15 days.
    let sent_at = store.record(1).expiry_notification_sent_at.expect("stamped");
    let expected = now + Duration::days(15);
    assert!((sent_at - expected).whole_seconds().abs() <= 60);
}

#[tokio::test]
async fn only_latest_updated_record_is_considered() {
    let now = primitive_now_utc();
    let outdated = approved_record(
        1,
        7,
        Some(now - Duration::days(1)),
        None,
        now - Duration::days(400),
    );
    let recent =
        approved_record(2, 7, Some(now - Duration::days(1)), None, now - Duration::days(2));
    let store =
        MemoryStore::new(vec![outdated, recent], vec![user(7, "learner@example.com", "Ada")]);
    let mailer = RecordingMailer::default();

    let report =
        send_expiry_notifications(&store, &mailer, &email_config(15, 1000)).await.expect("run");

    assert_eq!(report.notified, 1);
    assert_eq!(mailer.sent_to().len(), 1);
    assert!(store.record(1).expiry_notification_sent_at.is_none());
    assert!(store.record(2).expiry_notification_sent_at.is_some());
}

#[tokio::test]
async fn skips_user_inside_cooldown_window() {
    let now = primitive_now_utc();
    let store = MemoryStore::new(
        vec![approved_record(
            1,
            7,
            Some(now - Duration::days(20)),
            Some(now - Duration::days(5)),
            now - Duration::days(5),
        )],
        vec![user(7, "learner@example.com", "Ada")],
    );
    let mailer = RecordingMailer::default();

    let report =
        send_expiry_notifications(&store, &mailer, &email_config(15, 1000)).await.expect("run");

    assert_eq!(report.notified, 0);
    assert_eq!(report.resend_skipped, 1);
    assert!(mailer.sent_to().is_empty());
}

#[tokio::test]
async fn renotifies_user_after_cooldown_elapsed() {
    let now = primitive_now_utc();
    let store = MemoryStore::new(
        vec![approved_record(
            1,
            7,
            Some(now - Duration::days(40)),
            Some(now - Duration::days(20)),
            now - Duration::days(20),
        )],
        vec![user(7, "learner@example.com", "Ada")],
    );
    let mailer = RecordingMailer::default();

    let report =
        send_expiry_notifications(&store, &mailer, &email_config(15, 1000)).await.expect("run");

    assert_eq!(report.notified, 1);
    assert_eq!(mailer.sent_to().len(), 1);
}

#[tokio::test]
async fn empty_eligible_set_sends_nothing() {
    let now = primitive_now_utc();
    // A denied record and an approved-but-unexpired record: neither is eligible.
    let mut denied =
        approved_record(1, 3, Some(now - Duration::days(1)), None, now - Duration::days(2));
    denied.status = VerificationStatus::Denied;
    let unexpired =
        approved_record(2, 4, Some(now + Duration::days(30)), None, now - Duration::days(2));

    let store = MemoryStore::new(
        vec![denied, unexpired],
        vec![user(3, "a@example.com", "A"), user(4, "b@example.com", "B")],
    );
    let mailer = RecordingMailer::default();

    let capture = Arc::new(LogCapture::default());
    let _guard = tracing::subscriber::set_default(CaptureSubscriber(capture.clone()));

    let report =
        send_expiry_notifications(&store, &mailer, &email_config(15, 1000)).await.expect("run");

    assert_eq!(report, Default::default());
    assert!(mailer.sent_to().is_empty());
    assert_eq!(capture.occurrences("No approved expired verification records found"), 1);
}

#[tokio::test]
async fn missing_user_row_is_fatal() {
    let now = primitive_now_utc();
    let store = MemoryStore::new(
        vec![approved_record(1, 7, Some(now - Duration::days(1)), None, now - Duration::days(2))],
        Vec::new(),
    );
    let mailer = RecordingMailer::default();

    let result = send_expiry_notifications(&store, &mailer, &email_config(15, 1000)).await;

    let err = result.expect_err("missing user row must abort the run");
    assert!(err.to_string().contains("User 7 missing"));
    assert!(mailer.sent_to().is_empty());
    assert!(store.record(1).expiry_notification_sent_at.is_none());
}

#[tokio::test]
async fn transport_failure_leaves_timestamp_unset_and_continues() {
    let now = primitive_now_utc();
    let store = MemoryStore::new(
        vec![
            approved_record(1, 3, Some(now - Duration::days(1)), None, now - Duration::days(2)),
            approved_record(2, 4, Some(now - Duration::days(1)), None, now - Duration::days(2)),
        ],
        vec![user(3, "broken@example.com", "A"), user(4, "fine@example.com", "B")],
    );
    let mailer = RecordingMailer::failing_for(&["broken@example.com"]);

    let report =
        send_expiry_notifications(&store, &mailer, &email_config(15, 1000)).await.expect("run");

    assert_eq!(report.notified, 1);
    assert_eq!(report.send_failures, 1);
    assert_eq!(mailer.sent_to(), vec!["fine@example.com".to_string()]);
    // The failed user stays eligible for the next run.
    assert!(store.record(1).expiry_notification_sent_at.is_none());
    assert!(store.record(2).expiry_notification_sent_at.is_some());
}

#[tokio::test]
async fn id_windows_cover_every_eligible_user() {
    let now = primitive_now_utc();
    let records: Vec<VerificationRecord> = (1..=5)
        .map(|id| {
            approved_record(id, id, Some(now - Duration::days(1)), None, now - Duration::days(2))
        })
        .collect();
    let users: Vec<User> =
        (1..=5).map(|id| user(id, &format!("u{id}@example.com"), "Learner")).collect();

    let store = MemoryStore::new(records, users);
    let mailer = RecordingMailer::default();

    let report =
        send_expiry_notifications(&store, &mailer, &email_config(15, 2)).await.expect("run");

    assert_eq!(report.batches, 3);
    assert_eq!(report.notified, 5);
    let mut recipients = mailer.sent_to();
    recipients.sort();
    assert_eq!(
        recipients,
        (1..=5).map(|id| format!("u{id}@example.com")).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn backfill_sets_expiry_from_updated_at() {
    let now = primitive_now_utc();
    let updated_at = now - Duration::days(10);
    let store = MemoryStore::new(
        vec![approved_record(1, 7, None, None, updated_at)],
        vec![user(7, "learner@example.com", "Ada")],
    );

    let config = PopulateExpiryConfig { batch_size: 1000, sleep_seconds: 0, days_good_for: 365 };
    let report = populate_expiry_dates(&store, &config).await.expect("run");

    assert_eq!(report.backfilled, 1);
    assert_eq!(store.record(1).expiry_date, Some(updated_at + Duration::days(365)));
}

#[tokio::test]
async fn backfill_touches_only_latest_record_per_user() {
    let now = primitive_now_utc();
    let older = approved_record(1, 7, None, None, now - Duration::days(400));
    let newer = approved_record(2, 7, None, None, now - Duration::days(3));
    let store = MemoryStore::new(vec![older, newer], vec![user(7, "learner@example.com", "Ada")]);

    let config = PopulateExpiryConfig { batch_size: 1000, sleep_seconds: 0, days_good_for: 365 };
    let report = populate_expiry_dates(&store, &config).await.expect("run");

    assert_eq!(report.backfilled, 1);
    assert!(store.record(1).expiry_date.is_none());
    assert_eq!(
        store.record(2).expiry_date,
        Some((now - Duration::days(3)) + Duration::days(365))
    );
}

#[tokio::test]
async fn backfill_with_no_candidates_is_a_noop() {
    let now = primitive_now_utc();
    let store = MemoryStore::new(
        vec![approved_record(1, 7, Some(now + Duration::days(30)), None, now)],
        vec![user(7, "learner@example.com", "Ada")],
    );

    let config = PopulateExpiryConfig { batch_size: 1000, sleep_seconds: 0, days_good_for: 365 };
    let report = populate_expiry_dates(&store, &config).await.expect("run");

    assert_eq!(report, Default::default());
}
