use crate::domain::clock::{format_display, notify_minute_of_day, parse_clock};
use crate::domain::models::{RecurringEvent, TemporaryEvent};
use crate::domain::sound::resolve_sound;
use crate::infrastructure::notifier::{
    NotificationClient, NotificationRequest, NotificationTrigger, CHANNEL_ID,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// First id handed out; the range below is reserved by the platform.
const NOTIFICATION_ID_BASE: u32 = 1000;

/// Strictly increasing source of platform notification ids. Ids are never
/// reused within a process lifetime and never persisted: every rebuild
/// cancels whatever the platform reports as pending, so ids from a previous
/// incarnation are irrelevant.
#[derive(Debug)]
pub struct NotificationIdAllocator {
    next: AtomicU32,
}

impl NotificationIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(NOTIFICATION_ID_BASE),
        }
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for NotificationIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescheduleStatus {
    Success,
    PartialFailure,
    PlatformUnavailable,
}

/// Observable outcome of one full rebuild. Failures are recorded here
/// instead of propagating: the caller's data stays intact and the next
/// state change retries with another full rebuild.
#[derive(Debug, Clone)]
pub struct RescheduleReport {
    pub status: RescheduleStatus,
    pub cancelled: usize,
    pub submitted: usize,
    pub skipped_invalid: usize,
    pub errors: Vec<String>,
}

/// Translates the current event sets into the exact pending-notification
/// set the platform should hold: cancel everything, then submit a complete
/// fresh batch. No diffing against the previous schedule, so stale entries
/// cannot accumulate.
pub struct NotificationScheduler<N>
where
    N: NotificationClient,
{
    client: Arc<N>,
    ids: NotificationIdAllocator,
    now_provider: NowProvider,
    rebuild_guard: tokio::sync::Mutex<()>,
}

impl<N> NotificationScheduler<N>
where
    N: NotificationClient,
{
    pub fn new(client: Arc<N>) -> Self {
        Self {
            client,
            ids: NotificationIdAllocator::new(),
            now_provider: Arc::new(Utc::now),
            rebuild_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Rebuilds the platform queue from the full event state. Holds the
    /// rebuild guard across the whole cancel-then-submit sequence, so
    /// overlapping calls queue up and the newest state always wins.
    pub async fn reschedule(
        &self,
        recurring: &[RecurringEvent],
        temporary: &[TemporaryEvent],
        global_sound_on: bool,
    ) -> RescheduleReport {
        let _guard = self.rebuild_guard.lock().await;
        let now = (self.now_provider)();

        let mut errors = Vec::new();
        let mut cancelled = 0;
        let mut clear_failed = false;
        match self.client.pending().await {
            Ok(ids) if !ids.is_empty() => match self.client.cancel(&ids).await {
                Ok(()) => cancelled = ids.len(),
                Err(error) => {
                    clear_failed = true;
                    errors.push(format!("cancel pending notifications: {error}"));
                }
            },
            Ok(_) => {}
            Err(error) => {
                clear_failed = true;
                errors.push(format!("list pending notifications: {error}"));
            }
        }

        let mut skipped_invalid = 0;
        let mut requests = Vec::new();
        for event in recurring {
            match self.recurring_request(event, global_sound_on) {
                Some(request) => requests.push(request),
                None if event.prefs.notify => skipped_invalid += 1,
                None => {}
            }
        }
        for event in temporary {
            if let Some(request) = self.temporary_request(event, global_sound_on, now) {
                requests.push(request);
            }
        }

        let mut submitted = 0;
        let mut submit_failed = false;
        if !requests.is_empty() {
            match self.client.schedule(&requests).await {
                Ok(()) => submitted = requests.len(),
                Err(error) => {
                    submit_failed = true;
                    errors.push(format!("schedule notifications: {error}"));
                }
            }
        }

        let status = if submit_failed {
            RescheduleStatus::PlatformUnavailable
        } else if clear_failed {
            RescheduleStatus::PartialFailure
        } else {
            RescheduleStatus::Success
        };

        RescheduleReport {
            status,
            cancelled,
            submitted,
            skipped_invalid,
            errors,
        }
    }

    /// Weekly descriptor for a recurring event, or `None` when the event
    /// opted out of notifications or carries an unparseable start time.
    fn recurring_request(
        &self,
        event: &RecurringEvent,
        global_sound_on: bool,
    ) -> Option<NotificationRequest> {
        if !event.prefs.notify {
            return None;
        }
        let start_minutes = parse_clock(&event.start).ok()?;
        let lead = event.prefs.notify_before;
        let fire_minute = notify_minute_of_day(start_minutes, lead);

        let mut body = format!("Starting at {}", format_display(start_minutes));
        if lead > 0 {
            body.push_str(&format!(" (in {lead} min)"));
        }

        Some(NotificationRequest {
            id: self.ids.next_id(),
            title: event.title.clone(),
            body,
            trigger: NotificationTrigger::Weekly {
                weekday: event.day.platform_weekday(),
                hour: fire_minute / 60,
                minute: fire_minute % 60,
            },
            sound: resolve_sound(&event.prefs, global_sound_on)
                .platform_value()
                .map(ToOwned::to_owned),
            channel_id: CHANNEL_ID.to_string(),
        })
    }

    /// Absolute-instant descriptor for a temporary event. Fire instants
    /// already in the past are skipped without error: a reminder for a
    /// moment already gone is meaningless.
    fn temporary_request(
        &self,
        event: &TemporaryEvent,
        global_sound_on: bool,
        now: DateTime<Utc>,
    ) -> Option<NotificationRequest> {
        if !event.prefs.notify {
            return None;
        }
        let fire_at = event.notify_at?;
        if fire_at <= now {
            return None;
        }
        let start_minutes = parse_clock(&event.start).ok()?;

        Some(NotificationRequest {
            id: self.ids.next_id(),
            title: event.title.clone(),
            body: format!("Starting at {}", format_display(start_minutes)),
            trigger: NotificationTrigger::At(fire_at),
            sound: resolve_sound(&event.prefs, global_sound_on)
                .platform_value()
                .map(ToOwned::to_owned),
            channel_id: CHANNEL_ID.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::DayOfWeek;
    use crate::domain::models::{ReminderPrefs, TemporaryEventDraft};
    use crate::infrastructure::error::InfraError;
    use crate::infrastructure::notifier::InMemoryNotificationClient;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn fixed_now() -> DateTime<Utc> {
        // Wednesday 10:00 UTC.
        fixed_time("2026-08-05T10:00:00Z")
    }

    fn scheduler(client: Arc<InMemoryNotificationClient>) -> NotificationScheduler<InMemoryNotificationClient> {
        NotificationScheduler::new(client).with_now_provider(Arc::new(fixed_now))
    }

    fn recurring(id: &str, day: DayOfWeek, start: &str, notify: bool, lead: u32) -> RecurringEvent {
        RecurringEvent {
            id: id.to_string(),
            day,
            start: start.to_string(),
            end: "23:59".to_string(),
            title: format!("Event {id}"),
            color: None,
            prefs: ReminderPrefs {
                notify,
                notify_before: lead,
                ..ReminderPrefs::default()
            },
        }
    }

    fn temporary(id: &str, start: &str, lead: u32) -> TemporaryEvent {
        TemporaryEventDraft {
            day: DayOfWeek::Friday,
            start: start.to_string(),
            end: "23:59".to_string(),
            title: format!("Temp {id}"),
            color: None,
            prefs: ReminderPrefs {
                notify: true,
                notify_before: lead,
                ..ReminderPrefs::default()
            },
        }
        .freeze(id.to_string(), fixed_now())
        .expect("freeze draft")
    }

    #[tokio::test]
    async fn submits_exactly_the_implied_notifications() {
        let client = Arc::new(InMemoryNotificationClient::default());
        let scheduler = scheduler(Arc::clone(&client));

        let recurring_events = vec![
            recurring("a", DayOfWeek::Monday, "09:00", true, 10),
            recurring("b", DayOfWeek::Tuesday, "14:00", true, 0),
            recurring("c", DayOfWeek::Sunday, "18:00", false, 0),
        ];
        let mut passed = temporary("t-passed", "11:00", 0);
        passed.notify_at = Some(fixed_now() - chrono::Duration::minutes(5));
        let mut silent = temporary("t-silent", "12:00", 0);
        silent.prefs.notify = false;
        silent.notify_at = None;
        let temporary_events = vec![temporary("t-live", "15:00", 30), passed, silent];

        let report = scheduler
            .reschedule(&recurring_events, &temporary_events, true)
            .await;

        assert_eq!(report.status, RescheduleStatus::Success);
        assert_eq!(report.submitted, 3);
        assert_eq!(report.skipped_invalid, 0);

        let snapshot = client.snapshot().expect("snapshot queue");
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|request| request.id >= 1000));
        assert!(snapshot.iter().all(|request| request.channel_id == "timetable"));

        let monday = snapshot
            .iter()
            .find(|request| request.title == "Event a")
            .expect("monday request");
        assert_eq!(
            monday.trigger,
            NotificationTrigger::Weekly {
                weekday: 2,
                hour: 8,
                minute: 50,
            }
        );
        assert_eq!(monday.body, "Starting at 9:00 AM (in 10 min)");

        let tuesday = snapshot
            .iter()
            .find(|request| request.title == "Event b")
            .expect("tuesday request");
        assert_eq!(tuesday.body, "Starting at 2:00 PM");

        let temp = snapshot
            .iter()
            .find(|request| request.title == "Temp t-live")
            .expect("temporary request");
        assert_eq!(
            temp.trigger,
            NotificationTrigger::At(fixed_time("2026-08-07T14:30:00Z"))
        );
    }

    #[tokio::test]
    async fn lead_time_wraps_past_midnight() {
        let client = Arc::new(InMemoryNotificationClient::default());
        let scheduler = scheduler(Arc::clone(&client));

        let events = vec![recurring("wrap", DayOfWeek::Thursday, "00:10", true, 30)];
        scheduler.reschedule(&events, &[], true).await;

        let snapshot = client.snapshot().expect("snapshot queue");
        assert_eq!(
            snapshot[0].trigger,
            NotificationTrigger::Weekly {
                weekday: 5,
                hour: 23,
                minute: 40,
            }
        );
    }

    #[tokio::test]
    async fn rebuild_is_idempotent_for_unchanged_inputs() {
        let client = Arc::new(InMemoryNotificationClient::default());
        let scheduler = scheduler(Arc::clone(&client));
        let events = vec![
            recurring("a", DayOfWeek::Monday, "09:00", true, 0),
            recurring("b", DayOfWeek::Friday, "17:00", true, 5),
        ];

        let first = scheduler.reschedule(&events, &[], true).await;
        let second = scheduler.reschedule(&events, &[], true).await;

        assert_eq!(first.submitted, 2);
        assert_eq!(second.cancelled, 2);
        assert_eq!(second.submitted, 2);
        assert_eq!(client.pending().await.expect("pending").len(), 2);
    }

    #[tokio::test]
    async fn concurrent_rebuilds_serialize_without_duplicates() {
        let client = Arc::new(InMemoryNotificationClient::default());
        let scheduler = scheduler(Arc::clone(&client));
        let events = vec![recurring("a", DayOfWeek::Monday, "09:00", true, 0)];

        let (first, second) = tokio::join!(
            scheduler.reschedule(&events, &[], true),
            scheduler.reschedule(&events, &[], true),
        );

        assert_eq!(first.submitted, 1);
        assert_eq!(second.submitted, 1);
        assert_eq!(client.pending().await.expect("pending").len(), 1);
    }

    #[tokio::test]
    async fn global_mute_silences_every_descriptor() {
        let client = Arc::new(InMemoryNotificationClient::default());
        let scheduler = scheduler(Arc::clone(&client));
        let mut event = recurring("a", DayOfWeek::Monday, "09:00", true, 0);
        event.prefs.sound = "chime".to_string();

        scheduler
            .reschedule(&[event], &[temporary("t", "15:00", 0)], false)
            .await;

        let snapshot = client.snapshot().expect("snapshot queue");
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|request| request.sound.is_none()));
    }

    #[tokio::test]
    async fn named_sound_reaches_descriptor() {
        let client = Arc::new(InMemoryNotificationClient::default());
        let scheduler = scheduler(Arc::clone(&client));
        let mut event = recurring("a", DayOfWeek::Monday, "09:00", true, 0);
        event.prefs.sound = "chime".to_string();

        scheduler.reschedule(&[event], &[], true).await;

        let snapshot = client.snapshot().expect("snapshot queue");
        assert_eq!(snapshot[0].sound.as_deref(), Some("chime"));
    }

    #[tokio::test]
    async fn empty_state_clears_queue_and_reports_success() {
        let client = Arc::new(InMemoryNotificationClient::default());
        let scheduler = scheduler(Arc::clone(&client));
        scheduler
            .reschedule(&[recurring("a", DayOfWeek::Monday, "09:00", true, 0)], &[], true)
            .await;

        let report = scheduler.reschedule(&[], &[], true).await;

        assert_eq!(report.status, RescheduleStatus::Success);
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.submitted, 0);
        assert!(client.pending().await.expect("pending").is_empty());
    }

    #[tokio::test]
    async fn unparseable_stored_start_is_skipped_and_counted() {
        let client = Arc::new(InMemoryNotificationClient::default());
        let scheduler = scheduler(Arc::clone(&client));
        let mut broken = recurring("a", DayOfWeek::Monday, "09:00", true, 0);
        broken.start = "9am".to_string();
        let good = recurring("b", DayOfWeek::Tuesday, "10:00", true, 0);

        let report = scheduler.reschedule(&[broken, good], &[], true).await;

        assert_eq!(report.status, RescheduleStatus::Success);
        assert_eq!(report.submitted, 1);
        assert_eq!(report.skipped_invalid, 1);
    }

    /// Wraps the in-memory queue with scripted failures per operation.
    struct FlakyClient {
        inner: InMemoryNotificationClient,
        fail_pending: AtomicBool,
        fail_cancel: AtomicBool,
        fail_schedule: AtomicBool,
        schedule_calls: AtomicUsize,
    }

    impl FlakyClient {
        fn new() -> Self {
            Self {
                inner: InMemoryNotificationClient::default(),
                fail_pending: AtomicBool::new(false),
                fail_cancel: AtomicBool::new(false),
                fail_schedule: AtomicBool::new(false),
                schedule_calls: AtomicUsize::new(0),
            }
        }

        fn unavailable(operation: &str) -> InfraError {
            InfraError::PlatformUnavailable(format!("{operation} rejected by platform"))
        }
    }

    #[async_trait]
    impl NotificationClient for FlakyClient {
        async fn request_permission(&self) -> Result<bool, InfraError> {
            self.inner.request_permission().await
        }

        async fn pending(&self) -> Result<Vec<u32>, InfraError> {
            if self.fail_pending.load(Ordering::SeqCst) {
                return Err(Self::unavailable("pending"));
            }
            self.inner.pending().await
        }

        async fn cancel(&self, ids: &[u32]) -> Result<(), InfraError> {
            if self.fail_cancel.load(Ordering::SeqCst) {
                return Err(Self::unavailable("cancel"));
            }
            self.inner.cancel(ids).await
        }

        async fn schedule(&self, requests: &[NotificationRequest]) -> Result<(), InfraError> {
            self.schedule_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_schedule.load(Ordering::SeqCst) {
                return Err(Self::unavailable("schedule"));
            }
            self.inner.schedule(requests).await
        }
    }

    #[tokio::test]
    async fn cancel_failure_is_swallowed_and_submit_still_runs() {
        let client = Arc::new(FlakyClient::new());
        let scheduler =
            NotificationScheduler::new(Arc::clone(&client)).with_now_provider(Arc::new(fixed_now));
        let events = vec![recurring("a", DayOfWeek::Monday, "09:00", true, 0)];

        scheduler.reschedule(&events, &[], true).await;
        client.fail_cancel.store(true, Ordering::SeqCst);
        let report = scheduler.reschedule(&events, &[], true).await;

        assert_eq!(report.status, RescheduleStatus::PartialFailure);
        assert_eq!(report.cancelled, 0);
        assert_eq!(report.submitted, 1);
        assert_eq!(client.schedule_calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn listing_failure_is_swallowed_and_submit_still_runs() {
        let client = Arc::new(FlakyClient::new());
        let scheduler =
            NotificationScheduler::new(Arc::clone(&client)).with_now_provider(Arc::new(fixed_now));
        client.fail_pending.store(true, Ordering::SeqCst);

        let report = scheduler
            .reschedule(&[recurring("a", DayOfWeek::Monday, "09:00", true, 0)], &[], true)
            .await;

        assert_eq!(report.status, RescheduleStatus::PartialFailure);
        assert_eq!(report.submitted, 1);
    }

    #[tokio::test]
    async fn submit_failure_reports_platform_unavailable() {
        let client = Arc::new(FlakyClient::new());
        let scheduler =
            NotificationScheduler::new(Arc::clone(&client)).with_now_provider(Arc::new(fixed_now));
        client.fail_schedule.store(true, Ordering::SeqCst);

        let report = scheduler
            .reschedule(&[recurring("a", DayOfWeek::Monday, "09:00", true, 0)], &[], true)
            .await;

        assert_eq!(report.status, RescheduleStatus::PlatformUnavailable);
        assert_eq!(report.submitted, 0);
        assert!(client.inner.pending().await.expect("pending").is_empty());
    }

    #[test]
    fn allocator_is_monotonic_from_its_base() {
        let allocator = NotificationIdAllocator::new();
        let first = allocator.next_id();
        let second = allocator.next_id();
        assert_eq!(first, 1000);
        assert_eq!(second, 1001);
    }
}
