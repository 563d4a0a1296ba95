//! Replication configuration.
//!
//! Configuration values are provided by the host at startup and passed
//! explicitly into the replication handlers, so several simulated instances can
//! live in one process.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default |
//! |---|---|---|
//! | `USERBRIDGE_APPLICATION` | yes | |
//! | `USERBRIDGE_SYSTEM` | yes | |
//! | `USERBRIDGE_TOPIC_ACTIVITY` | no | `activity` |
//! | `USERBRIDGE_TOPIC_ARBITRATION` | no | `arbitration` |
//! | `USERBRIDGE_TOPIC_MODIFICATION` | no | `modification` |
//! | `USERBRIDGE_TOPIC_STATE` | no | `state` |

use crate::event::Category;
use std::env;
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Topic suffix per category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNames {
    /// Suffix for activity events
    pub activity: String,
    /// Suffix for arbitration events
    pub arbitration: String,
    /// Suffix for modification events
    pub modification: String,
    /// Suffix for state events
    pub state: String,
}

impl TopicNames {
    /// Suffix configured for `category`.
    #[must_use]
    pub fn get(&self, category: Category) -> &str {
        match category {
            Category::Activity => &self.activity,
            Category::Arbitration => &self.arbitration,
            Category::Modification => &self.modification,
            Category::State => &self.state,
        }
    }

    fn set(&mut self, category: Category, name: String) {
        match category {
            Category::Activity => self.activity = name,
            Category::Arbitration => self.arbitration = name,
            Category::Modification => self.modification = name,
            Category::State => self.state = name,
        }
    }
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            activity: Category::Activity.as_str().to_string(),
            arbitration: Category::Arbitration.as_str().to_string(),
            modification: Category::Modification.as_str().to_string(),
            state: Category::State.as_str().to_string(),
        }
    }
}

/// Identity of this instance and the topic layout it replicates through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// This instance's application identifier.
    ///
    /// Stamped on every locally originated event and compared against the
    /// origin of every event the replication handlers see.
    pub application: String,

    /// Prefix namespacing topic names (`{system}.{topic}`).
    pub system: String,

    /// Topic suffix per category.
    pub topics: TopicNames,
}

impl ReplicationConfig {
    /// Create a configuration with the default topic names.
    #[must_use]
    pub fn new(application: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            system: system.into(),
            topics: TopicNames::default(),
        }
    }

    /// Override the topic suffix for one category.
    #[must_use]
    pub fn with_topic(mut self, category: Category, name: impl Into<String>) -> Self {
        self.topics.set(category, name.into());
        self
    }

    /// Full topic name for `category`.
    #[must_use]
    pub fn topic(&self, category: Category) -> String {
        format!("{}.{}", self.system, self.topics.get(category))
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required key is missing or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| ConfigError::EnvVarNotSet(key.to_string()));

        let mut config = Self::new(
            required("USERBRIDGE_APPLICATION")?,
            required("USERBRIDGE_SYSTEM")?,
        );
        for (category, key) in [
            (Category::Activity, "USERBRIDGE_TOPIC_ACTIVITY"),
            (Category::Arbitration, "USERBRIDGE_TOPIC_ARBITRATION"),
            (Category::Modification, "USERBRIDGE_TOPIC_MODIFICATION"),
            (Category::State, "USERBRIDGE_TOPIC_STATE"),
        ] {
            if let Some(name) = lookup(key) {
                config.topics.set(category, name);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if a value is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "application identifier must not be empty".to_string(),
            ));
        }
        if self.system.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "system prefix must not be empty".to_string(),
            ));
        }
        for category in Category::SPECIFICITY {
            if self.topics.get(category).trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "topic name for {category} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_topics_use_category_names() {
        let config = ReplicationConfig::new("accounts-eu", "accounts");
        assert_eq!(config.topic(Category::Activity), "accounts.activity");
        assert_eq!(config.topic(Category::Arbitration), "accounts.arbitration");
        assert_eq!(config.topic(Category::Modification), "accounts.modification");
        assert_eq!(config.topic(Category::State), "accounts.state");
    }

    #[test]
    fn topic_override() {
        let config =
            ReplicationConfig::new("accounts-eu", "accounts").with_topic(Category::State, "lifecycle");
        assert_eq!(config.topic(Category::State), "accounts.lifecycle");
        assert_eq!(config.topic(Category::Activity), "accounts.activity");
    }

    #[test]
    fn loads_from_lookup() {
        let config = ReplicationConfig::from_lookup(lookup(&[
            ("USERBRIDGE_APPLICATION", "accounts-eu"),
            ("USERBRIDGE_SYSTEM", "accounts"),
            ("USERBRIDGE_TOPIC_ARBITRATION", "penalties"),
        ]));

        assert_eq!(
            config,
            Ok(ReplicationConfig::new("accounts-eu", "accounts")
                .with_topic(Category::Arbitration, "penalties"))
        );
    }

    #[test]
    fn missing_application_is_reported() {
        let result = ReplicationConfig::from_lookup(lookup(&[("USERBRIDGE_SYSTEM", "accounts")]));
        assert_eq!(
            result,
            Err(ConfigError::EnvVarNotSet("USERBRIDGE_APPLICATION".to_string()))
        );
    }

    #[test]
    fn blank_values_fail_validation() {
        let result = ReplicationConfig::from_lookup(lookup(&[
            ("USERBRIDGE_APPLICATION", "accounts-eu"),
            ("USERBRIDGE_SYSTEM", " "),
        ]));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let config = ReplicationConfig::new("accounts-eu", "accounts").with_topic(Category::State, "");
        assert!(config.validate().is_err());
    }
}
