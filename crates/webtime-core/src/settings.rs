//! User settings singleton.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::reminder::DEFAULT_THRESHOLDS;

/// Persisted user preferences.
///
/// Credential fields are opaque hashes produced by the presentation layer;
/// the engine stores them but never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub password_hash: Option<String>,
    pub security_question: Option<String>,
    pub security_answer_hash: Option<String>,
    pub reminder_enabled: bool,
    pub reminder_thresholds: Option<Vec<u64>>,
}

impl Settings {
    /// Thresholds in effect, ascending and without duplicates.
    pub fn effective_thresholds(&self) -> Vec<u64> {
        let mut thresholds = match &self.reminder_thresholds {
            Some(configured) if !configured.is_empty() => configured.clone(),
            _ => DEFAULT_THRESHOLDS.to_vec(),
        };
        thresholds.sort_unstable();
        thresholds.dedup();
        thresholds
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub password_hash: Option<String>,
    pub security_question: Option<String>,
    pub security_answer_hash: Option<String>,
    pub reminder_enabled: Option<bool>,
    pub reminder_thresholds: Option<Vec<u64>>,
}

/// What an applied patch changed that the engine has to react to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    /// Reminders went from disabled to enabled.
    pub reminders_enabled: bool,
}

impl SettingsPatch {
    /// Validates the patch and produces the merged settings.
    pub fn apply(&self, current: &Settings) -> DomainResult<(Settings, SettingsChange)> {
        if let Some(thresholds) = &self.reminder_thresholds {
            if let Some(bad) = thresholds.iter().find(|t| **t == 0) {
                return Err(DomainError::InvalidFieldValue {
                    field: "reminder_thresholds".to_string(),
                    value: bad.to_string(),
                    expected: "positive number of seconds".to_string(),
                });
            }
        }

        let mut next = current.clone();
        if let Some(value) = &self.password_hash {
            next.password_hash = Some(value.clone());
        }
        if let Some(value) = &self.security_question {
            next.security_question = Some(value.clone());
        }
        if let Some(value) = &self.security_answer_hash {
            next.security_answer_hash = Some(value.clone());
        }
        if let Some(enabled) = self.reminder_enabled {
            next.reminder_enabled = enabled;
        }
        if let Some(thresholds) = &self.reminder_thresholds {
            next.reminder_thresholds = Some(thresholds.clone());
        }

        let change = SettingsChange {
            reminders_enabled: !current.reminder_enabled && next.reminder_enabled,
        };
        Ok((next, change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let settings = Settings::default();
        assert!(!settings.reminder_enabled);
        assert_eq!(settings.effective_thresholds(), vec![1800, 3600, 7200]);
    }

    #[test]
    fn test_configured_thresholds_sorted() {
        let settings = Settings {
            reminder_thresholds: Some(vec![3600, 1800, 3600]),
            ..Settings::default()
        };
        assert_eq!(settings.effective_thresholds(), vec![1800, 3600]);
    }

    #[test]
    fn test_patch_keeps_absent_fields() {
        let current = Settings {
            password_hash: Some("abc".to_string()),
            ..Settings::default()
        };
        let patch = SettingsPatch {
            reminder_enabled: Some(true),
            ..SettingsPatch::default()
        };

        let (next, change) = patch.apply(&current).unwrap();
        assert_eq!(next.password_hash.as_deref(), Some("abc"));
        assert!(next.reminder_enabled);
        assert!(change.reminders_enabled);

        // Enabling again is not a fresh enable.
        let (_, change) = patch.apply(&next).unwrap();
        assert!(!change.reminders_enabled);
    }

    #[test]
    fn test_patch_rejects_zero_threshold() {
        let patch = SettingsPatch {
            reminder_thresholds: Some(vec![1800, 0]),
            ..SettingsPatch::default()
        };
        assert!(matches!(
            patch.apply(&Settings::default()),
            Err(DomainError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn test_patch_deserializes_partial_json() {
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"reminder_thresholds":[1800,3600]}"#).unwrap();
        assert_eq!(patch.reminder_thresholds, Some(vec![1800, 3600]));
        assert_eq!(patch.reminder_enabled, None);
    }
}
