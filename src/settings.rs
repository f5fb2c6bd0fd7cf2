use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

/// Where the bedside device streams telemetry from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub host: String,
    pub port: u16,
    pub reconnect_delay_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8081,
            reconnect_delay_secs: 5,
            read_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferSettings {
    pub max_batch: usize,
    pub flush_interval_secs: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_batch: 50,
            flush_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisSettings {
    pub fast_interval_secs: u64,
    pub full_interval_secs: u64,
    pub fast_min_samples: usize,
    pub full_min_samples: usize,
    /// Optional fitted classifier artifact; the rule estimator is used when absent.
    pub model_path: Option<PathBuf>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            fast_interval_secs: 10,
            full_interval_secs: 120,
            fast_min_samples: 30,
            full_min_samples: 600,
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutboxSettings {
    pub retry_interval_secs: u64,
    pub send_timeout_secs: u64,
    pub send_pause_secs: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            retry_interval_secs: 300,
            send_timeout_secs: 30,
            send_pause_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServiceSettings {
    pub device: DeviceSettings,
    pub buffer: BufferSettings,
    pub analysis: AnalysisSettings,
    pub outbox: OutboxSettings,
}

impl DeviceSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl OutboxSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn send_pause(&self) -> Duration {
        Duration::from_secs(self.send_pause_secs)
    }
}

impl ServiceSettings {
    /// Applies `CTG_*` environment overrides on top of the file values.
    fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CTG_DEVICE_HOST") {
            self.device.host = host;
        }
        if let Some(port) = lookup("CTG_DEVICE_PORT") {
            match port.parse() {
                Ok(port) => self.device.port = port,
                Err(err) => warn!("ignoring CTG_DEVICE_PORT='{port}': {err}"),
            }
        }
        if let Some(path) = lookup("CTG_MODEL_PATH") {
            self.analysis.model_path = Some(PathBuf::from(path));
        }
    }
}

/// File-backed settings, read once at startup.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ServiceSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("settings file {} is invalid ({err}); using defaults", path.display());
                ServiceSettings::default()
            })
        } else {
            let defaults = ServiceSettings::default();
            persist(&path, &defaults)?;
            defaults
        };
        data.apply_env();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> ServiceSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn persist(path: &Path, data: &ServiceSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(data)?;
    fs::write(path, serialized)
        .with_context(|| format!("Failed to write settings to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guardian.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        let settings = store.snapshot();

        assert!(path.exists());
        assert_eq!(settings.buffer.max_batch, 50);
        assert_eq!(settings.outbox.retry_interval_secs, 300);
        assert_eq!(settings.analysis.full_min_samples, 600);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guardian.json");
        fs::write(&path, r#"{"outbox": {"send_timeout_secs": 12}}"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().snapshot();

        assert_eq!(settings.outbox.send_timeout_secs, 12);
        assert_eq!(settings.outbox.send_pause_secs, 2);
        assert_eq!(settings.device.reconnect_delay_secs, 5);
    }

    #[test]
    fn overrides_replace_device_fields() {
        let mut settings = ServiceSettings::default();
        settings.apply_overrides(|key| match key {
            "CTG_DEVICE_HOST" => Some("10.0.0.7".into()),
            "CTG_DEVICE_PORT" => Some("not-a-port".into()),
            "CTG_MODEL_PATH" => Some("/models/ctg.json".into()),
            _ => None,
        });

        assert_eq!(settings.device.host, "10.0.0.7");
        assert_eq!(settings.device.port, 8081);
        assert_eq!(
            settings.analysis.model_path,
            Some(PathBuf::from("/models/ctg.json"))
        );
    }
}
