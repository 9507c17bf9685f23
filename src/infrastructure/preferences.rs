use crate::infrastructure::error::InfraError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub mod keys {
    pub const EVENTS: &str = "timetable_events";
    pub const TEMP_EVENTS: &str = "timetable_temp_events";
    pub const ONBOARDED: &str = "timetable_onboarded";
    pub const GLOBAL_SOUND: &str = "timetable_global_sound";
    pub const CUSTOM_TEMPLATES: &str = "timetable_custom_templates";
}

/// Durable key-value store for event collections and flags. Values are
/// opaque strings; collection encoding is the caller's concern.
pub trait PreferencesRepository: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError>;
    fn set(&self, key: &str, value: &str) -> Result<(), InfraError>;
    fn remove(&self, key: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqlitePreferencesRepository {
    db_path: PathBuf,
}

impl SqlitePreferencesRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl PreferencesRepository for SqlitePreferencesRepository {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO preferences (key, value)
             VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPreferencesRepository {
    values: Mutex<HashMap<String, String>>,
}

impl PreferencesRepository for InMemoryPreferencesRepository {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let values = self
            .values
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("preferences lock poisoned: {error}")))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let mut values = self
            .values
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("preferences lock poisoned: {error}")))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let mut values = self
            .values
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("preferences lock poisoned: {error}")))?;
        values.remove(key);
        Ok(())
    }
}
