use crate::application::scheduler::{NotificationScheduler, RescheduleReport, RescheduleStatus};
use crate::domain::clock::DayOfWeek;
use crate::domain::models::{
    retain_live, RecurringEvent, ReminderPrefs, Template, TemporaryEvent, TemporaryEventDraft,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::NotificationClient;
use crate::infrastructure::preferences::{keys, PreferencesRepository};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Caller-supplied fields of a recurring event; the service assigns ids and
/// fans the draft out across the selected weekdays.
#[derive(Debug, Clone)]
pub struct RecurringEventDraft {
    pub start: String,
    pub end: String,
    pub title: String,
    pub color: Option<String>,
    pub prefs: ReminderPrefs,
}

#[derive(Debug, Default)]
struct RuntimeState {
    recurring: Vec<RecurringEvent>,
    temporary: Vec<TemporaryEvent>,
    global_sound_on: bool,
    onboarded: bool,
    custom_templates: Vec<Template>,
}

/// Application service over the persistent store and the platform
/// notification service. Every mutation persists first, then triggers a
/// full notification rebuild; rebuild failures are logged and swallowed so
/// event data stays intact regardless of platform availability.
pub struct TimetableService<P, N>
where
    P: PreferencesRepository,
    N: NotificationClient,
{
    preferences: Arc<P>,
    notifier: Arc<N>,
    scheduler: NotificationScheduler<N>,
    runtime: Mutex<RuntimeState>,
    now_provider: NowProvider,
    logs_dir: Option<PathBuf>,
    log_guard: Mutex<()>,
}

impl<P, N> TimetableService<P, N>
where
    P: PreferencesRepository,
    N: NotificationClient,
{
    pub fn new(preferences: Arc<P>, notifier: Arc<N>) -> Self {
        Self {
            preferences,
            notifier: Arc::clone(&notifier),
            scheduler: NotificationScheduler::new(notifier),
            runtime: Mutex::new(RuntimeState {
                global_sound_on: true,
                ..RuntimeState::default()
            }),
            now_provider: Arc::new(Utc::now),
            logs_dir: None,
            log_guard: Mutex::new(()),
        }
    }

    pub fn with_workspace(mut self, workspace_root: &Path) -> Self {
        self.logs_dir = Some(workspace_root.join("logs"));
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.scheduler = self.scheduler.with_now_provider(Arc::clone(&now_provider));
        self.now_provider = now_provider;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn runtime(&self) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
        self.runtime
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("runtime lock poisoned: {error}")))
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Some(logs_dir) = &self.logs_dir else {
            return;
        };
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    // ── Boot ──

    /// Loads every persisted collection, garbage-collects expired temporary
    /// events, and performs the initial notification rebuild. Absent or
    /// malformed data degrades to empty collections and default flags;
    /// startup never blocks on the store.
    pub async fn load(&self) -> Result<(), InfraError> {
        let now = self.now();
        let recurring: Vec<RecurringEvent> = self.read_collection(keys::EVENTS);
        let temporary: Vec<TemporaryEvent> = self.read_collection(keys::TEMP_EVENTS);
        let custom_templates: Vec<Template> = self.read_collection(keys::CUSTOM_TEMPLATES);
        let global_sound_on = self.read_flag(keys::GLOBAL_SOUND, true);
        let onboarded = self.read_flag(keys::ONBOARDED, false);

        let loaded = temporary.len();
        let live = retain_live(temporary, now);
        if live.len() != loaded {
            self.log_info(
                "load",
                &format!("expired {} temporary event(s)", loaded - live.len()),
            );
            // Best-effort prune persistence; the next mutation saves again.
            if let Err(error) = self.write_json(keys::TEMP_EVENTS, &live) {
                self.log_error("load", &format!("persist pruned temp events: {error}"));
            }
        }

        {
            let mut runtime = self.runtime()?;
            runtime.recurring = recurring;
            runtime.temporary = live;
            runtime.custom_templates = custom_templates;
            runtime.global_sound_on = global_sound_on;
            runtime.onboarded = onboarded;
        }

        self.resync_notifications().await?;
        Ok(())
    }

    // ── Recurring events ──

    pub fn list_events(&self) -> Result<Vec<RecurringEvent>, InfraError> {
        Ok(self.runtime()?.recurring.clone())
    }

    /// Creates one event per selected weekday from a single draft.
    pub async fn add_events(
        &self,
        draft: RecurringEventDraft,
        days: &[DayOfWeek],
    ) -> Result<Vec<RecurringEvent>, InfraError> {
        if days.is_empty() {
            return Err(InfraError::InvalidConfig(
                "at least one day must be selected".to_string(),
            ));
        }

        let mut created = Vec::with_capacity(days.len());
        for day in days {
            let event = RecurringEvent {
                id: next_id("ev"),
                day: *day,
                start: draft.start.clone(),
                end: draft.end.clone(),
                title: draft.title.clone(),
                color: draft.color.clone(),
                prefs: draft.prefs.clone(),
            };
            event.validate()?;
            created.push(event);
        }

        {
            let mut runtime = self.runtime()?;
            runtime.recurring.extend(created.iter().cloned());
            self.write_json(keys::EVENTS, &runtime.recurring)?;
        }
        self.resync_notifications().await?;
        Ok(created)
    }

    pub async fn update_event(&self, event: RecurringEvent) -> Result<RecurringEvent, InfraError> {
        event.validate()?;
        {
            let mut runtime = self.runtime()?;
            let slot = runtime
                .recurring
                .iter_mut()
                .find(|candidate| candidate.id == event.id)
                .ok_or_else(|| {
                    InfraError::InvalidConfig(format!("unknown event id '{}'", event.id))
                })?;
            *slot = event.clone();
            self.write_json(keys::EVENTS, &runtime.recurring)?;
        }
        self.resync_notifications().await?;
        Ok(event)
    }

    pub async fn delete_event(&self, event_id: &str) -> Result<bool, InfraError> {
        let removed = {
            let mut runtime = self.runtime()?;
            let before = runtime.recurring.len();
            runtime.recurring.retain(|event| event.id != event_id);
            let removed = runtime.recurring.len() != before;
            if removed {
                self.write_json(keys::EVENTS, &runtime.recurring)?;
            }
            removed
        };
        if removed {
            self.resync_notifications().await?;
        }
        Ok(removed)
    }

    // ── Temporary events ──

    pub fn list_temporary_events(&self) -> Result<Vec<TemporaryEvent>, InfraError> {
        Ok(self.runtime()?.temporary.clone())
    }

    /// Freezes the draft's absolute instants at the current clock and
    /// stores the event. The instants never change afterwards.
    pub async fn add_temporary_event(
        &self,
        draft: TemporaryEventDraft,
    ) -> Result<TemporaryEvent, InfraError> {
        let event = draft.freeze(next_id("ev"), self.now())?;
        {
            let mut runtime = self.runtime()?;
            runtime.temporary.push(event.clone());
            self.write_json(keys::TEMP_EVENTS, &runtime.temporary)?;
        }
        self.resync_notifications().await?;
        Ok(event)
    }

    pub async fn delete_temporary_event(&self, event_id: &str) -> Result<bool, InfraError> {
        let removed = {
            let mut runtime = self.runtime()?;
            let before = runtime.temporary.len();
            runtime.temporary.retain(|event| event.id != event_id);
            let removed = runtime.temporary.len() != before;
            if removed {
                self.write_json(keys::TEMP_EVENTS, &runtime.temporary)?;
            }
            removed
        };
        if removed {
            self.resync_notifications().await?;
        }
        Ok(removed)
    }

    // ── Global sound ──

    pub fn global_sound_on(&self) -> Result<bool, InfraError> {
        Ok(self.runtime()?.global_sound_on)
    }

    pub async fn set_global_sound(&self, on: bool) -> Result<(), InfraError> {
        {
            let mut runtime = self.runtime()?;
            runtime.global_sound_on = on;
        }
        self.preferences
            .set(keys::GLOBAL_SOUND, if on { "true" } else { "false" })?;
        self.resync_notifications().await?;
        Ok(())
    }

    // ── Onboarding ──

    pub fn is_onboarded(&self) -> Result<bool, InfraError> {
        Ok(self.runtime()?.onboarded)
    }

    pub fn set_onboarded(&self, onboarded: bool) -> Result<(), InfraError> {
        {
            let mut runtime = self.runtime()?;
            runtime.onboarded = onboarded;
        }
        self.preferences
            .set(keys::ONBOARDED, if onboarded { "true" } else { "false" })?;
        Ok(())
    }

    // ── Templates ──

    pub fn custom_templates(&self) -> Result<Vec<Template>, InfraError> {
        Ok(self.runtime()?.custom_templates.clone())
    }

    /// Saves or overwrites a custom template. A template with the same id
    /// is replaced in place; otherwise the new one is appended.
    pub fn save_custom_template(&self, template: Template) -> Result<Vec<Template>, InfraError> {
        template.validate()?;
        let mut runtime = self.runtime()?;
        match runtime
            .custom_templates
            .iter()
            .position(|candidate| candidate.id == template.id)
        {
            Some(index) => runtime.custom_templates[index] = template,
            None => runtime.custom_templates.push(template),
        }
        self.write_json(keys::CUSTOM_TEMPLATES, &runtime.custom_templates)?;
        Ok(runtime.custom_templates.clone())
    }

    /// Snapshots the current recurring schedule as a reusable template.
    pub fn save_current_as_template(
        &self,
        template_id: Option<String>,
        name: &str,
        description: &str,
    ) -> Result<Template, InfraError> {
        let events = {
            let runtime = self.runtime()?;
            runtime
                .recurring
                .iter()
                .cloned()
                .map(|mut event| {
                    event.id = String::new();
                    event
                })
                .collect()
        };
        let template = Template {
            id: template_id.unwrap_or_else(|| next_id("tmpl")),
            name: name.to_string(),
            description: description.to_string(),
            icon: None,
            color: None,
            is_default: false,
            events,
        };
        self.save_custom_template(template.clone())?;
        Ok(template)
    }

    /// No-op when the id is unknown.
    pub fn delete_custom_template(&self, template_id: &str) -> Result<Vec<Template>, InfraError> {
        let mut runtime = self.runtime()?;
        let before = runtime.custom_templates.len();
        runtime
            .custom_templates
            .retain(|template| template.id != template_id);
        if runtime.custom_templates.len() != before {
            self.write_json(keys::CUSTOM_TEMPLATES, &runtime.custom_templates)?;
        }
        Ok(runtime.custom_templates.clone())
    }

    /// Replaces the recurring schedule with the template's events, each
    /// carrying a fresh id, and marks onboarding complete.
    pub async fn apply_template(
        &self,
        template: &Template,
    ) -> Result<Vec<RecurringEvent>, InfraError> {
        template.validate()?;
        let hydrated: Vec<RecurringEvent> = template
            .events
            .iter()
            .cloned()
            .map(|mut event| {
                event.id = next_id("ev");
                event
            })
            .collect();

        {
            let mut runtime = self.runtime()?;
            runtime.recurring = hydrated.clone();
            runtime.onboarded = true;
            self.write_json(keys::EVENTS, &runtime.recurring)?;
        }
        self.preferences.set(keys::ONBOARDED, "true")?;
        self.resync_notifications().await?;
        Ok(hydrated)
    }

    // ── Reset ──

    /// Clears events, temporary events and the onboarding/sound flags.
    /// Custom templates deliberately survive; use `clear_custom_templates`
    /// to wipe those too.
    pub async fn clear_all_data(&self) -> Result<(), InfraError> {
        {
            let mut runtime = self.runtime()?;
            runtime.recurring.clear();
            runtime.temporary.clear();
            runtime.global_sound_on = true;
            runtime.onboarded = false;
        }
        self.preferences.remove(keys::EVENTS)?;
        self.preferences.remove(keys::TEMP_EVENTS)?;
        self.preferences.remove(keys::ONBOARDED)?;
        self.preferences.remove(keys::GLOBAL_SOUND)?;
        self.resync_notifications().await?;
        Ok(())
    }

    pub fn clear_custom_templates(&self) -> Result<(), InfraError> {
        {
            let mut runtime = self.runtime()?;
            runtime.custom_templates.clear();
        }
        self.preferences.remove(keys::CUSTOM_TEMPLATES)?;
        Ok(())
    }

    // ── Platform ──

    pub async fn request_permission(&self) -> Result<bool, InfraError> {
        self.notifier.request_permission().await
    }

    /// Explicit full rebuild, exposing the outcome to the caller.
    pub async fn reschedule_now(&self) -> Result<RescheduleReport, InfraError> {
        let (recurring, temporary, global_sound_on) = {
            let runtime = self.runtime()?;
            (
                runtime.recurring.clone(),
                runtime.temporary.clone(),
                runtime.global_sound_on,
            )
        };
        Ok(self
            .scheduler
            .reschedule(&recurring, &temporary, global_sound_on)
            .await)
    }

    async fn resync_notifications(&self) -> Result<(), InfraError> {
        let report = self.reschedule_now().await?;
        if report.status != RescheduleStatus::Success {
            self.log_error(
                "reschedule",
                &format!(
                    "status={:?} cancelled={} submitted={} errors={}",
                    report.status,
                    report.cancelled,
                    report.submitted,
                    report.errors.join("; ")
                ),
            );
        }
        Ok(())
    }

    // ── Persistence helpers ──

    fn read_collection<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.preferences.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(error) => {
                self.log_error("load", &format!("read {key}: {error}"));
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(values) => values,
            Err(error) => {
                self.log_error("load", &format!("malformed {key}: {error}"));
                Vec::new()
            }
        }
    }

    fn read_flag(&self, key: &str, default: bool) -> bool {
        match self.preferences.get(key) {
            Ok(Some(raw)) => raw == "true" || (default && raw != "false"),
            Ok(None) => default,
            Err(error) => {
                self.log_error("load", &format!("read {key}: {error}"));
                default
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), InfraError> {
        let encoded = serde_json::to_string(value)?;
        self.preferences.set(key, &encoded)
    }
}
