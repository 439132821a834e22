use crate::storage::UserSeed;
use kidbiz_shared::domain::{AchievementRule, SubscriptionStatus};
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    #[serde(default)]
    pub users: Vec<UserSeed>,
    #[serde(default)]
    pub achievements: Vec<AchievementRule>,
    #[serde(default = "default_xp_per_level")]
    pub xp_per_level: i64,
    /// Days a soft-deleted child can still be restored.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Trial length stamped on parents created as `trialing` without an end.
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,
    #[serde(default = "default_metrics_refresh_secs")]
    pub metrics_refresh_secs: u64,
    #[serde(default)]
    pub report: ReportConfig,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_title")]
    pub title: String,
    /// PNG/JPEG/SVG inlined into HTML reports.
    pub logo_path: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: default_report_title(),
            logo_path: None,
        }
    }
}

fn default_xp_per_level() -> i64 {
    100
}

fn default_retention_days() -> i64 {
    30
}

fn default_trial_days() -> i64 {
    14
}

fn default_metrics_refresh_secs() -> u64 {
    30
}

fn default_report_title() -> String {
    "KidBiz progress report".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        let cfg: AppConfig = serde_yaml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "jwt_secret must be at least 16 characters".into(),
            ));
        }
        if self.xp_per_level <= 0 {
            return Err(ConfigError::Invalid("xp_per_level must be positive".into()));
        }
        if self.retention_days < 0 {
            return Err(ConfigError::Invalid(
                "retention_days must not be negative".into(),
            ));
        }
        if self.trial_days <= 0 {
            return Err(ConfigError::Invalid("trial_days must be positive".into()));
        }
        for user in &self.users {
            if let Some(sub) = &user.subscription
                && sub.status == SubscriptionStatus::Trialing
                && sub.trial_ends_at.is_none()
            {
                return Err(ConfigError::Invalid(format!(
                    "{}: a trialing subscription needs trial_ends_at",
                    user.email
                )));
            }
        }
        if self.metrics_refresh_secs == 0 {
            return Err(ConfigError::Invalid(
                "metrics_refresh_secs must be positive".into(),
            ));
        }
        let mut ids = std::collections::HashSet::new();
        for rule in &self.achievements {
            if !ids.insert(rule.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate achievement id: {}",
                    rule.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_fields() {
        let yaml = r#"
jwt_secret: "0123456789abcdef0123"
users:
  - email: admin@example.com
    display_name: Admin
    password_hash: "$2b$04$abcdefghijklmnopqrstuv"
    role: admin
achievements:
  - id: first-lesson
    name: First steps
    kind: lessons_completed
    threshold: 1
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.xp_per_level, 100);
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.trial_days, 14);
        assert_eq!(cfg.metrics_refresh_secs, 30);
        assert_eq!(cfg.report.title, "KidBiz progress report");
        assert_eq!(cfg.achievements.len(), 1);
        assert!(cfg.users[0].subscription.is_none());
    }

    #[test]
    fn duplicate_achievements_are_rejected() {
        let yaml = r#"
jwt_secret: "0123456789abcdef0123"
achievements:
  - { id: a, name: A, kind: total_xp, threshold: 10 }
  - { id: a, name: B, kind: total_xp, threshold: 20 }
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn open_ended_trials_are_rejected() {
        let yaml = r#"
jwt_secret: "0123456789abcdef0123"
users:
  - email: parent@example.com
    display_name: Parent
    password_hash: "$2b$04$abcdefghijklmnopqrstuv"
    role: parent
    subscription:
      status: trialing
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
