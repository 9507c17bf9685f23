pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{bootstrap_workspace, BootstrapResult};
pub use application::commands::{RecurringEventDraft, TimetableService};
pub use application::scheduler::{
    NotificationIdAllocator, NotificationScheduler, RescheduleReport, RescheduleStatus,
};
pub use domain::clock::DayOfWeek;
pub use domain::models::{
    RecurringEvent, ReminderPrefs, Template, TemporaryEvent, TemporaryEventDraft,
};
pub use domain::sound::{resolve_sound, SoundDirective};
pub use infrastructure::error::InfraError;
pub use infrastructure::notifier::{
    InMemoryNotificationClient, NotificationClient, NotificationRequest, NotificationTrigger,
};
pub use infrastructure::preferences::{
    InMemoryPreferencesRepository, PreferencesRepository, SqlitePreferencesRepository,
};
