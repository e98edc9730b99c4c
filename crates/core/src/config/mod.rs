use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tone: ToneConfig,
    pub visuals: VisualConfig,
    pub lighting: LightingConfig,
    pub accessory: AccessoryConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing sections and fields take their defaults.
    ///
    /// The flat layout of older configs is understood too: a top-level
    /// `keyToneVolume` sets the key tone volume.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let doc: serde_json::Value = serde_json::from_str(raw)?;
        let flat_volume = doc.get("keyToneVolume").and_then(serde_json::Value::as_f64);
        let mut config: Self = serde_json::from_value(doc)?;
        if let Some(db) = flat_volume {
            config.tone.key_tone_volume_db = db as f32;
        }
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Like [`AppConfig::load`], but any failure yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "using default configuration");
                Self::default()
            }
        }
    }
}

/// Key tone settings handed to the tone sink at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    #[serde(alias = "keyToneVolume")]
    pub key_tone_volume_db: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            key_tone_volume_db: -6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub fps: u32,
    pub max_particles: usize,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            max_particles: 500,
        }
    }
}

impl VisualConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)))
    }
}

/// Lighting endpoint location and the timers of the grid engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub enabled: bool,
    pub endpoint_url: String,
    pub heartbeat_ms: u64,
    pub flush_ms: u64,
    pub ripple_interval_ms: u64,
    pub ripple_steps: u32,
    pub ripple_decay: f64,
    pub request_timeout_ms: u64,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint_url: "http://localhost:54235".to_string(),
            heartbeat_ms: 8_000,
            flush_ms: 33,
            ripple_interval_ms: 50,
            ripple_steps: 5,
            ripple_decay: 0.7,
            request_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessoryConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_name: String,
    /// Per-call limit; a call running longer disables the accessory.
    pub call_timeout_ms: u64,
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 6742,
            client_name: "KeySmash".to_string(),
            call_timeout_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config = AppConfig::from_json_str(
            r#"{ "tone": { "key_tone_volume_db": -12.0 }, "lighting": { "flush_ms": 20 } }"#,
        )
        .unwrap();

        assert_eq!(config.tone.key_tone_volume_db, -12.0);
        assert_eq!(config.lighting.flush_ms, 20);
        assert_eq!(config.lighting.heartbeat_ms, 8_000);
        assert_eq!(config.visuals, VisualConfig::default());
    }

    #[test]
    fn flat_legacy_config_sets_key_tone_volume() {
        let config = AppConfig::from_json_str(
            r#"{"musicFolder":"./music","musicVolume":-18,"keyToneVolume":-10,"musicEnabled":true}"#,
        )
        .unwrap();

        assert_eq!(config.tone.key_tone_volume_db, -10.0);
        assert_eq!(config.lighting, LightingConfig::default());

        let nested =
            AppConfig::from_json_str(r#"{ "tone": { "keyToneVolume": -3 } }"#).unwrap();
        assert_eq!(nested.tone.key_tone_volume_db, -3.0);
    }

    #[test]
    fn accessory_calls_time_out_after_half_a_second_by_default() {
        let config = AppConfig::from_json_str(r#"{ "accessory": { "port": 7000 } }"#).unwrap();
        assert_eq!(config.accessory.call_timeout_ms, 500);
        assert_eq!(config.accessory.port, 7000);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("keysmash-config-malformed.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let config = AppConfig::load_or_default(&path);
        assert_eq!(config, AppConfig::default());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn frame_interval_never_divides_by_zero() {
        let visuals = VisualConfig {
            fps: 0,
            ..Default::default()
        };
        assert_eq!(visuals.frame_interval(), Duration::from_secs(1));
    }
}
