//! Persisted settings
//!
//! Settings live in `$XDG_CONFIG_HOME/datacalld/settings.json` (falling back
//! to `~/.config/datacalld/settings.json`). APN entries use the loose
//! carrier-database shape: strings for most fields, numbers or strings for
//! ports and MTU, and a `types` list that may name purposes this build does
//! not know. Such entries are converted leniently; unknown types are
//! skipped and unusable entries are dropped with a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dcm_protocol::{ApnProfile, AuthType, BearerBitmask, PdpType, ProfileError, Purpose, SlotId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::manager::{
    ManagerConfig, RoamingSetting, DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_SWITCH_TIMEOUT_MS,
};
use crate::retry::RetryPolicy;

/// Errors reading or writing settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No home or XDG config directory
    #[error("could not determine settings path")]
    NoConfigDir,

    /// File could not be read or written
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid settings JSON
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One APN entry as stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ApnEntry {
    pub apn: String,
    pub user: Option<String>,
    #[serde(alias = "passwd")]
    pub password: Option<String>,
    pub authtype: Option<String>,
    pub protocol: Option<String>,
    pub roaming_protocol: Option<String>,
    /// Bearer bitmask, 0 or absent for unrestricted
    pub bearer: Option<u32>,
    pub types: Vec<String>,
    pub mtu: Option<Value>,
    pub proxy: Option<String>,
    pub port: Option<Value>,
    pub mmsc: Option<String>,
    pub mmsproxy: Option<String>,
    pub mmsport: Option<Value>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number<T: TryFrom<u64>>(value: &Option<Value>) -> Option<T> {
    let raw = match value.as_ref()? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    T::try_from(raw).ok()
}

impl ApnEntry {
    /// Convert to a profile, skipping unknown types and bad optional values
    pub fn to_profile(&self) -> Result<ApnProfile, ProfileError> {
        let purposes: Vec<Purpose> = self
            .types
            .iter()
            .filter_map(|t| match t.parse::<Purpose>() {
                Ok(purpose) => Some(purpose),
                Err(e) => {
                    debug!("apn {}: {}", self.apn, e);
                    None
                }
            })
            .collect();

        let auth_type = non_empty(&self.authtype).and_then(|s| match s.parse::<AuthType>() {
            Ok(auth) => Some(auth),
            Err(e) => {
                debug!("apn {}: {}, using default", self.apn, e);
                None
            }
        });
        let pdp = |field: &Option<String>| {
            non_empty(field).and_then(|s| match s.parse::<PdpType>() {
                Ok(pdp) => Some(pdp),
                Err(e) => {
                    debug!("apn {}: {}, using default", self.apn, e);
                    None
                }
            })
        };

        let mut profile = ApnProfile::new(self.apn.trim()).with_purposes(purposes);
        profile.user = non_empty(&self.user).unwrap_or_default();
        profile.password = non_empty(&self.password).unwrap_or_default();
        profile.auth_type = auth_type;
        profile.protocol = pdp(&self.protocol);
        profile.roaming_protocol = pdp(&self.roaming_protocol);
        profile.bearer = BearerBitmask(self.bearer.unwrap_or(0));
        profile.mtu = number::<u32>(&self.mtu).filter(|mtu| *mtu > 0);
        profile.proxy = non_empty(&self.proxy);
        profile.port = number(&self.port);
        profile.mmsc = non_empty(&self.mmsc);
        profile.mms_proxy = non_empty(&self.mmsproxy);
        profile.mms_port = number(&self.mmsport);
        profile.validate()?;
        Ok(profile)
    }
}

/// Settings of one SIM slot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SlotConfig {
    /// Stored APN list
    pub apns: Vec<ApnEntry>,
    /// Purposes allowed while mobile data is off
    pub mobile_whitelist: Vec<String>,
    /// ICCID of the card seen in the previous run
    pub previous_iccid: Option<String>,
}

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Mobile data enabled
    pub data_enabled: bool,
    /// Data roaming, one flag or one per slot
    pub roaming_enabled: RoamingSetting,
    /// Slot designated for default data
    pub default_slot: usize,
    /// Per-slot settings
    pub slots: Vec<SlotConfig>,
    /// Setup retry policy
    pub retry: RetryPolicy,
    /// Deadline for the old slot's teardown during a default slot switch
    pub switch_timeout_ms: u64,
    /// Deadline for every slot's teardown during shutdown
    pub shutdown_timeout_ms: u64,
    /// Detach the old slot from packet service on a default slot switch
    pub data_registration_on_demand: bool,
    /// TCP buffer sizes keyed by technology group
    pub tcp_buffer_overrides: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_enabled: false,
            roaming_enabled: RoamingSetting::default(),
            default_slot: 0,
            slots: vec![SlotConfig::default()],
            retry: RetryPolicy::default(),
            switch_timeout_ms: DEFAULT_SWITCH_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            data_registration_on_demand: false,
            tcp_buffer_overrides: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for datacalld
    /// Uses $XDG_CONFIG_HOME/datacalld, falls back to ~/.config/datacalld
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("datacalld"));
            }
        }
        dirs::home_dir().map(|h| h.join(".config").join("datacalld"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from the default path, falling back to defaults
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("{}, using defaults", e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Load settings from a file
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Save settings to the default path
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save settings to a file, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let io_error = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(io_error)?;
        Ok(())
    }

    /// Manager configuration for the given number of slots
    ///
    /// At least as many slots as configured in the file are used.
    pub fn manager_config(&self, slot_count: usize) -> ManagerConfig {
        ManagerConfig {
            slot_count: slot_count.max(self.slots.len()).max(1),
            retry: self.retry,
            switch_timeout: Duration::from_millis(self.switch_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            data_registration_on_demand: self.data_registration_on_demand,
            tcp_buffer_overrides: self.tcp_buffer_overrides.clone(),
        }
    }

    /// Usable profiles of a slot; None when the slot has no stored list
    pub fn slot_profiles(&self, slot: SlotId) -> Option<Vec<ApnProfile>> {
        let config = self.slots.get(slot.index())?;
        let profiles = config
            .apns
            .iter()
            .filter_map(|entry| match entry.to_profile() {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!("{}: dropping APN entry: {}", slot, e);
                    None
                }
            })
            .collect();
        Some(profiles)
    }

    /// Whitelisted purposes of a slot
    pub fn mobile_whitelist(&self, slot: SlotId) -> Vec<Purpose> {
        self.slots
            .get(slot.index())
            .map(|config| {
                config
                    .mobile_whitelist
                    .iter()
                    .filter_map(|t| t.parse().ok())
                    .filter(|p: &Purpose| !p.is_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stored ICCIDs indexed by slot
    pub fn previous_iccids(&self) -> Vec<Option<String>> {
        self.slots.iter().map(|s| s.previous_iccid.clone()).collect()
    }

    /// Problems that would make entries be dropped, for reporting
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            for entry in &slot.apns {
                if let Err(e) = entry.to_profile() {
                    problems.push(format!("slot {index}: {e}"));
                }
                for t in &entry.types {
                    if t.parse::<Purpose>().is_err() {
                        problems.push(format!("slot {index}: apn {}: unknown type {t:?}", entry.apn));
                    }
                }
            }
        }
        if self.default_slot >= self.slots.len().max(1) {
            problems.push(format!(
                "default_slot {} but only {} slots configured",
                self.default_slot,
                self.slots.len()
            ));
        }
        problems
    }

    /// Settings with a typical two-profile slot, used as a starting point
    pub fn example() -> Self {
        let entry = |apn: &str, types: &[&str]| ApnEntry {
            apn: apn.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
            protocol: Some("IPV4V6".to_string()),
            roaming_protocol: Some("IP".to_string()),
            ..Default::default()
        };
        let mut mms = entry("mms", &["mms"]);
        mms.mmsc = Some("http://mms.example.net".to_string());
        mms.mmsproxy = Some("10.0.0.10".to_string());
        mms.mmsport = Some(Value::from(8080));
        Self {
            data_enabled: true,
            slots: vec![SlotConfig {
                apns: vec![entry("internet", &["default", "supl"]), mms, entry("ims", &["ims"])],
                mobile_whitelist: vec!["mms".to_string()],
                previous_iccid: None,
            }],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_entry_conversion() {
        let entry: ApnEntry = serde_json::from_value(json!({
            "apn": "internet",
            "types": ["default", "supl", "wap"],
            "authtype": "chap",
            "protocol": "IPV4V6",
            "roaming_protocol": "bogus",
            "mtu": "1400",
            "port": 8080,
            "bearer": 8192
        }))
        .unwrap();
        let profile = entry.to_profile().unwrap();
        assert_eq!(profile.purposes, vec![Purpose::Default, Purpose::Supl]);
        assert_eq!(profile.auth_type, Some(AuthType::Chap));
        assert_eq!(profile.protocol, Some(PdpType::Ipv4v6));
        assert_eq!(profile.roaming_protocol, None);
        assert_eq!(profile.mtu, Some(1400));
        assert_eq!(profile.port, Some(8080));
        assert_eq!(profile.bearer, BearerBitmask(8192));
    }

    #[test]
    fn test_entry_without_known_types_dropped() {
        let entry = ApnEntry {
            apn: "wap".into(),
            types: vec!["wap".into()],
            ..Default::default()
        };
        assert!(matches!(
            entry.to_profile(),
            Err(ProfileError::NoKnownPurpose { .. })
        ));
    }

    #[test]
    fn test_roaming_accepts_bool_or_list() {
        let settings: Settings = serde_json::from_value(json!({ "roaming_enabled": true })).unwrap();
        assert_eq!(settings.roaming_enabled, RoamingSetting::All(true));
        let settings: Settings =
            serde_json::from_value(json!({ "roaming_enabled": [false, true] })).unwrap();
        assert_eq!(
            settings.roaming_enabled,
            RoamingSetting::PerSlot(vec![false, true])
        );
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("datacalld-test-{}", std::process::id()));
        let path = dir.join("nested").join("settings.json");
        let settings = Settings::example();
        settings.save_to(&path).unwrap();
        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_example_is_valid() {
        let settings = Settings::example();
        assert!(settings.validate().is_empty());
        let profiles = settings.slot_profiles(SlotId(0)).unwrap();
        assert_eq!(profiles.len(), 3);
        assert_eq!(profiles[1].mms_port, Some(8080));
        assert_eq!(settings.mobile_whitelist(SlotId(0)), vec![Purpose::Mms]);
        assert!(settings.slot_profiles(SlotId(3)).is_none());
    }

    #[test]
    fn test_manager_config_slot_count() {
        let settings = Settings::default();
        assert_eq!(settings.manager_config(2).slot_count, 2);
        assert_eq!(settings.manager_config(0).slot_count, 1);
        assert_eq!(
            settings.manager_config(1).switch_timeout,
            Duration::from_millis(DEFAULT_SWITCH_TIMEOUT_MS)
        );

        let settings = Settings {
            shutdown_timeout_ms: 250,
            ..Default::default()
        };
        assert_eq!(
            settings.manager_config(1).shutdown_timeout,
            Duration::from_millis(250)
        );
    }
}
