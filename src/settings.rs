use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::assistants::AssistantKind;

/// Downscale/compression bounds applied to every captured frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub max_dimension: u32,
    pub max_bytes: usize,
    pub jpeg_quality: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1280,
            max_bytes: 400_000,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub model: String,
    pub endpoint: String,
    pub request_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".into(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    pub enabled: bool,
    /// Minimum time between two analyses by the same assistant.
    pub min_interval_secs: u64,
    /// Results scoring below this are logged and dropped.
    pub confidence_threshold: f64,
    /// How many previously emitted items are fed back as negative context.
    pub recent_window: usize,
    /// Drop frames that look the same as the last analysed one.
    pub skip_unchanged_frames: bool,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_secs: 30,
            confidence_threshold: 0.5,
            recent_window: 20,
            skip_unchanged_frames: true,
        }
    }
}

impl AssistantSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantsConfig {
    pub focus: AssistantSettings,
    pub task: AssistantSettings,
    pub advice: AssistantSettings,
    pub memory: AssistantSettings,
    /// Minimum gap between two "you look distracted" alerts.
    pub distraction_alert_cooldown_secs: u64,
}

impl Default for AssistantsConfig {
    fn default() -> Self {
        Self {
            focus: AssistantSettings {
                min_interval_secs: 3,
                confidence_threshold: 0.6,
                skip_unchanged_frames: false,
                ..AssistantSettings::default()
            },
            task: AssistantSettings {
                min_interval_secs: 30,
                confidence_threshold: 0.7,
                ..AssistantSettings::default()
            },
            advice: AssistantSettings {
                min_interval_secs: 60,
                confidence_threshold: 0.75,
                ..AssistantSettings::default()
            },
            memory: AssistantSettings {
                min_interval_secs: 60,
                confidence_threshold: 0.7,
                ..AssistantSettings::default()
            },
            distraction_alert_cooldown_secs: 60,
        }
    }
}

impl AssistantsConfig {
    pub fn for_kind(&self, kind: AssistantKind) -> &AssistantSettings {
        match kind {
            AssistantKind::Focus => &self.focus,
            AssistantKind::Task => &self.task,
            AssistantKind::Advice => &self.advice,
            AssistantKind::Memory => &self.memory,
        }
    }
}

/// Everything the scheduler, recovery manager and assistants are built from.
///
/// Passed by value into the monitor at construction; replaced wholesale via
/// `Monitor::update_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub capture_interval_ms: u64,
    /// Debounce after an app or window switch. Zero captures immediately.
    pub analysis_delay_ms: u64,
    pub failure_threshold: u32,
    pub capture_timeout_ms: u64,
    pub observer_poll_ms: u64,
    pub worker_poll_ms: u64,
    pub analysis_timeout_secs: u64,
    pub stop_grace_ms: u64,
    /// Events buffered per subscriber before the slowest one starts lagging.
    /// Read once when the monitor is built.
    pub event_buffer: usize,
    pub image: ImageConfig,
    pub analysis: AnalysisConfig,
    pub assistants: AssistantsConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capture_interval_ms: 1_000,
            analysis_delay_ms: 3_000,
            failure_threshold: 5,
            capture_timeout_ms: 1_000,
            observer_poll_ms: 500,
            worker_poll_ms: 500,
            analysis_timeout_secs: 60,
            stop_grace_ms: 2_000,
            event_buffer: 256,
            image: ImageConfig::default(),
            analysis: AnalysisConfig::default(),
            assistants: AssistantsConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn analysis_delay(&self) -> Duration {
        Duration::from_millis(self.analysis_delay_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn observer_poll(&self) -> Duration {
        Duration::from_millis(self.observer_poll_ms)
    }

    pub fn worker_poll(&self) -> Duration {
        Duration::from_millis(self.worker_poll_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture_interval_ms == 0 {
            bail!("capture_interval_ms must be greater than zero");
        }
        if self.failure_threshold == 0 {
            bail!("failure_threshold must be at least 1");
        }
        if self.observer_poll_ms == 0 || self.worker_poll_ms == 0 {
            bail!("poll intervals must be greater than zero");
        }
        if self.event_buffer == 0 {
            bail!("event_buffer must be greater than zero");
        }
        if self.image.max_dimension == 0 || self.image.max_bytes == 0 {
            bail!("image bounds must be greater than zero");
        }
        if !(1..=100).contains(&self.image.jpeg_quality) {
            bail!("jpeg_quality must be within 1..=100");
        }
        for kind in AssistantKind::ALL {
            let threshold = self.assistants.for_kind(kind).confidence_threshold;
            if !(0.0..=1.0).contains(&threshold) {
                bail!("{} confidence_threshold {threshold} is outside 0..=1", kind.as_str());
            }
        }
        Ok(())
    }
}

/// JSON file holding the user's `MonitorConfig`.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<MonitorConfig>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Settings at {} are unreadable ({err}); using defaults",
                    path.display()
                );
                MonitorConfig::default()
            })
        } else {
            MonitorConfig::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn config(&self) -> MonitorConfig {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, config: MonitorConfig) -> Result<()> {
        config.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&config)?;
        *guard = config;
        Ok(())
    }

    pub fn reload(&self) -> Result<MonitorConfig> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: MonitorConfig = serde_json::from_str(&contents)?;
        data.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = data.clone();
        Ok(data)
    }

    fn persist(&self, data: &MonitorConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
