use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::supervision::{AnalyzerConfig, SupervisionConfig, VerifierThresholds};
use crate::violations::TerminationPolicy;

/// Tunables for one proctoring deployment. Every section falls back to its
/// defaults when missing from the settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProctorSettings {
    pub supervision: SupervisionConfig,
    pub analyzer: AnalyzerConfig,
    pub thresholds: VerifierThresholds,
    pub policy: TerminationPolicy,
}

/// `PROCTOR_DEBUG=1` (or `true`) turns on per-tick countdown heartbeats.
pub fn debug_mode() -> bool {
    std::env::var("PROCTOR_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ProctorSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    log::warn!(
                        "Ignoring unreadable settings at {} ({err}); using defaults",
                        path.display()
                    );
                    ProctorSettings::default()
                }
            }
        } else {
            ProctorSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> ProctorSettings {
        self.read().clone()
    }

    pub fn policy(&self) -> TerminationPolicy {
        self.read().policy.clone()
    }

    pub fn update(&self, settings: ProctorSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    pub fn update_policy(&self, policy: TerminationPolicy) -> Result<()> {
        let mut guard = self.write();
        guard.policy = policy;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: ProctorSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &ProctorSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, ProctorSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProctorSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path() -> PathBuf {
        std::env::temp_dir().join(format!("proctor-settings-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(temp_settings_path()).unwrap();
        let settings = store.current();
        assert_eq!(settings.policy.max_wrong_person, 2);
        assert_eq!(settings.supervision.capture_interval_ms, 25_000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = temp_settings_path();
        fs::write(&path, r#"{ "policy": { "maxWrongPerson": 4 } }"#).unwrap();

        let store = SettingsStore::new(path.clone()).unwrap();
        let policy = store.policy();
        assert_eq!(policy.max_wrong_person, 4);
        assert_eq!(policy.max_multiple_faces, 1);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn update_persists_and_reloads() {
        let path = temp_settings_path();
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut policy = store.policy();
        policy.min_face_detection_rate = 0.6;
        store.update_policy(policy).unwrap();

        let reopened = SettingsStore::new(path.clone()).unwrap();
        assert!((reopened.policy().min_face_detection_rate - 0.6).abs() < f64::EPSILON);
        reopened.reload().unwrap();

        let _ = fs::remove_file(path);
    }
}
