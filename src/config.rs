use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::renderer::DEFAULT_SLOPE_USECS;
use crate::audio::SlopeShape;
use crate::error::Result;
use crate::generator::Generator;
use crate::morse::timing::{
    FREQUENCY_INITIAL, GAP_INITIAL, NOISE_SPIKE_THRESHOLD_INITIAL, SPEED_INITIAL,
    TOLERANCE_INITIAL, VOLUME_INITIAL, WEIGHTING_INITIAL,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub sending: SendingSettings,
    #[serde(default)]
    pub receiving: ReceivingSettings,
    #[serde(default)]
    pub keyer: KeyerSettings,
    #[serde(default)]
    pub audio: AudioSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendingSettings {
    /// Words per minute
    pub send_speed: i32,
    /// Tone frequency in Hz
    pub frequency: i32,
    /// Percent
    pub volume: i32,
    /// Extra Farnsworth spacing, in dot units
    pub gap: i32,
    /// Percent; 50 is standard weighting
    pub weighting: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivingSettings {
    pub receive_speed: i32,
    /// Percent of a dot accepted either side of the ideal length
    pub tolerance: i32,
    pub adaptive: bool,
    /// Microseconds; 0 turns the noise filter off
    pub noise_spike_threshold: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyerSettings {
    pub curtis_mode_b: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Output device name; the system default when unset
    pub device: Option<String>,
    pub slope_shape: SlopeShape,
    pub slope_usecs: u32,
}

impl Default for SendingSettings {
    fn default() -> Self {
        Self {
            send_speed: SPEED_INITIAL,
            frequency: FREQUENCY_INITIAL,
            volume: VOLUME_INITIAL,
            gap: GAP_INITIAL,
            weighting: WEIGHTING_INITIAL,
        }
    }
}

impl Default for ReceivingSettings {
    fn default() -> Self {
        Self {
            receive_speed: SPEED_INITIAL,
            tolerance: TOLERANCE_INITIAL,
            adaptive: false,
            noise_spike_threshold: NOISE_SPIKE_THRESHOLD_INITIAL,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            device: None,
            slope_shape: SlopeShape::default(),
            slope_usecs: DEFAULT_SLOPE_USECS,
        }
    }
}

/// Result of loading settings, with an optional notice for the user
pub struct SettingsLoadResult {
    pub settings: EngineSettings,
    pub notice: Option<String>,
}

impl EngineSettings {
    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("cw_engine").join("settings.toml")
        } else {
            PathBuf::from("settings.toml")
        }
    }

    /// Load from the default path, or fall back to defaults
    pub fn load_or_default() -> SettingsLoadResult {
        Self::load_or_default_from(&Self::config_path())
    }

    /// Load from `path`. A file that exists but cannot be parsed is moved
    /// aside so the next save does not destroy it.
    pub fn load_or_default_from(path: &Path) -> SettingsLoadResult {
        match Self::load(path) {
            Ok(settings) => {
                log::debug!("Loaded settings from {}", path.display());
                SettingsLoadResult {
                    settings,
                    notice: None,
                }
            }
            Err(e) => {
                let mut notice = None;
                if path.exists() {
                    log::warn!("Unable to load settings from {}: {}", path.display(), e);
                    notice = Some(match backup_settings_file(path) {
                        Some(backup_path) => format!(
                            "Settings file was reset due to an incompatible format. Backup saved to {}",
                            backup_path.display()
                        ),
                        None => "Settings file was reset due to an incompatible format.".to_string(),
                    });
                } else {
                    log::debug!("No settings at {}, using defaults", path.display());
                }
                SettingsLoadResult {
                    settings: Self::default(),
                    notice,
                }
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        log::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Push every value into `generator`. Stops at the first value out of range.
    pub fn apply(&self, generator: &Generator) -> Result<()> {
        let sending = &self.sending;
        generator.set_send_speed(sending.send_speed)?;
        generator.set_frequency(sending.frequency)?;
        generator.set_volume(sending.volume)?;
        generator.set_gap(sending.gap)?;
        generator.set_weighting(sending.weighting)?;

        let receiving = &self.receiving;
        let mut receiver = generator.receiver();
        // Receive speed cannot be set while tracking
        receiver.disable_adaptive();
        receiver.set_receive_speed(receiving.receive_speed)?;
        receiver.set_tolerance(receiving.tolerance)?;
        receiver.set_noise_spike_threshold(receiving.noise_spike_threshold)?;
        if receiving.adaptive {
            receiver.enable_adaptive();
        }
        drop(receiver);

        if self.keyer.curtis_mode_b {
            generator.enable_curtis_mode_b();
        } else {
            generator.disable_curtis_mode_b();
        }
        Ok(())
    }
}

fn backup_settings_file(path: &Path) -> Option<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let file_name = path.file_name()?.to_string_lossy();
    let backup_name = format!("{}.bak.{}", file_name, timestamp);
    let backup_path = path.with_file_name(backup_name);
    if std::fs::rename(path, &backup_path).is_ok() {
        Some(backup_path)
    } else {
        None
    }
}
