//! Configuration file support for hdsched.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/hdsched/config.toml`.

use crate::allocator::MAX_BEDS_PER_SLOT;
use crate::generator::MAX_HORIZON_DAYS;
use crate::{Error, Result, Slot};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    #[serde(default)]
    pub equipment: EquipmentConfig,

    #[serde(default = "default_slots")]
    pub slots: Vec<Slot>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            scheduling: SchedulingConfig::default(),
            equipment: EquipmentConfig::default(),
            slots: default_slots(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Recurring generation defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "default_horizon_days")]
    pub default_horizon_days: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            default_horizon_days: default_horizon_days(),
        }
    }
}

/// Reuse limits for dialysers and blood tubing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EquipmentConfig {
    #[serde(default = "default_dialyser_max_reuse")]
    pub dialyser_max_reuse: u32,

    #[serde(default = "default_blood_tubing_max_reuse")]
    pub blood_tubing_max_reuse: u32,
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        Self {
            dialyser_max_reuse: default_dialyser_max_reuse(),
            blood_tubing_max_reuse: default_blood_tubing_max_reuse(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local/share")
    });
    base.join("hdsched")
}

fn default_horizon_days() -> u32 {
    28
}

fn default_dialyser_max_reuse() -> u32 {
    10
}

fn default_blood_tubing_max_reuse() -> u32 {
    5
}

fn shift(id: &str, name: &str, start: u32, end: u32) -> Slot {
    Slot {
        id: id.into(),
        name: name.into(),
        start: NaiveTime::from_hms_opt(start, 0, 0).unwrap_or_default(),
        end: NaiveTime::from_hms_opt(end, 0, 0).unwrap_or_default(),
        max_beds: 10,
        active: true,
    }
}

fn default_slots() -> Vec<Slot> {
    vec![
        shift("morning", "Morning", 7, 11),
        shift("afternoon", "Afternoon", 12, 16),
        shift("evening", "Evening", 17, 21),
    ]
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".config")
        });
        base.join("hdsched").join("config.toml")
    }

    /// Reject slot tables the allocator cannot work with
    pub fn validate(&self) -> Result<()> {
        let horizon = self.scheduling.default_horizon_days;
        if horizon == 0 || horizon > MAX_HORIZON_DAYS {
            return Err(Error::Config(format!(
                "scheduling.default_horizon_days must be between 1 and {} (got {})",
                MAX_HORIZON_DAYS, horizon
            )));
        }

        let mut seen = HashSet::new();
        for slot in &self.slots {
            if slot.id.trim().is_empty() {
                return Err(Error::Config("slot id must not be empty".into()));
            }
            if !seen.insert(slot.id.as_str()) {
                return Err(Error::Config(format!("duplicate slot id '{}'", slot.id)));
            }
            if slot.max_beds == 0 || slot.max_beds > MAX_BEDS_PER_SLOT {
                return Err(Error::Config(format!(
                    "slot '{}' must have between 1 and {} beds (got {})",
                    slot.id, MAX_BEDS_PER_SLOT, slot.max_beds
                )));
            }
            if slot.start >= slot.end {
                return Err(Error::Config(format!(
                    "slot '{}' starts at {} but ends at {}",
                    slot.id, slot.start, slot.end
                )));
            }
        }
        Ok(())
    }

    /// Session book location
    pub fn sessions_path(&self) -> PathBuf {
        self.data.data_dir.join("sessions.json")
    }

    /// Activity log location
    pub fn activity_path(&self) -> PathBuf {
        self.data.data_dir.join("activity.log")
    }

    /// Prescription file location
    pub fn patients_path(&self) -> PathBuf {
        self.data.data_dir.join("patients.json")
    }

    /// Archived session export location
    pub fn history_path(&self) -> PathBuf {
        self.data.data_dir.join("history.csv")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.slots.len(), 3);
        assert!(config.slots.iter().all(|s| s.max_beds == 10));
        assert_eq!(config.equipment.dialyser_max_reuse, 10);
        assert_eq!(config.scheduling.default_horizon_days, 28);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.slots, parsed.slots);
        assert_eq!(
            config.equipment.blood_tubing_max_reuse,
            parsed.equipment.blood_tubing_max_reuse
        );
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[equipment]
dialyser_max_reuse = 12

[[slots]]
id = "night"
name = "Night"
start = "22:00:00"
end = "23:30:00"
max_beds = 4
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.equipment.dialyser_max_reuse, 12);
        assert_eq!(config.equipment.blood_tubing_max_reuse, 5); // default
        assert_eq!(config.slots.len(), 1);
        assert!(config.slots[0].active);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_slots() {
        let mut config = Config::default();
        config.slots[1].id = "morning".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.slots[0].max_beds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.slots[2].end = config.slots[2].start;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_horizon_and_beds() {
        let mut config = Config::default();
        config.scheduling.default_horizon_days = MAX_HORIZON_DAYS;
        config.validate().unwrap();
        config.scheduling.default_horizon_days = MAX_HORIZON_DAYS + 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.slots[0].max_beds = MAX_BEDS_PER_SLOT + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("morning"));
    }

    #[test]
    fn test_load_from_rejects_out_of_range_horizon() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[scheduling]\ndefault_horizon_days = 400\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("default_horizon_days"));
    }

    #[test]
    fn test_save_and_load_from() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.data.data_dir = temp_dir.path().to_path_buf();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.data.data_dir, temp_dir.path());
        assert_eq!(loaded.sessions_path(), temp_dir.path().join("sessions.json"));
    }
}
