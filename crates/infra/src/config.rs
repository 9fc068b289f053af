//! Engine configuration.
//!
//! Layered the usual way:
//! 1. Defaults in code
//! 2. Optional `config/pharmledger.{toml,yaml,json}` file
//! 3. `PHARMLEDGER__` environment overrides, `__` as the section separator
//!    (e.g. `PHARMLEDGER__LEDGER__MAX_ATTEMPTS=8`)

use config::{ConfigError, Environment, File};
use serde::Deserialize;

use pharmledger_inventory::LedgerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ledger: LedgerConfig,
    pub prescriptions: PrescriptionConfig,
    pub dispensing: DispensingConfig,
    pub inventory: InventoryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrescriptionConfig {
    /// Controlled and high-alert orders need two distinct pharmacists.
    pub dual_verification_for_controlled: bool,
    /// Attempts for bookkeeping writes the engine issues on a prescription.
    pub write_retry_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispensingConfig {
    /// Controlled and high-alert items force patient counseling.
    pub counseling_for_controlled: bool,
    /// Whether dispensings may be prepared short of the prescribed quantity.
    pub allow_partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Window for near-expiry alerts.
    pub near_expiry_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            prescriptions: PrescriptionConfig::default(),
            dispensing: DispensingConfig::default(),
            inventory: InventoryConfig::default(),
        }
    }
}

impl Default for PrescriptionConfig {
    fn default() -> Self {
        Self {
            dual_verification_for_controlled: true,
            write_retry_attempts: 5,
        }
    }
}

impl Default for DispensingConfig {
    fn default() -> Self {
        Self {
            counseling_for_controlled: true,
            allow_partial: false,
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self { near_expiry_days: 90 }
    }
}

impl EngineConfig {
    /// Load from `config/pharmledger.*` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/pharmledger")
    }

    /// Load from a config file base name (extension optional) and the environment.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = config::Config::builder()
            .set_default("ledger.max_attempts", i64::from(defaults.ledger.max_attempts))?
            .set_default(
                "prescriptions.dual_verification_for_controlled",
                defaults.prescriptions.dual_verification_for_controlled,
            )?
            .set_default(
                "prescriptions.write_retry_attempts",
                i64::from(defaults.prescriptions.write_retry_attempts),
            )?
            .set_default(
                "dispensing.counseling_for_controlled",
                defaults.dispensing.counseling_for_controlled,
            )?
            .set_default("dispensing.allow_partial", defaults.dispensing.allow_partial)?
            .set_default("inventory.near_expiry_days", defaults.inventory.near_expiry_days)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("PHARMLEDGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.max_attempts == 0 {
            return Err(ConfigError::Message("ledger.max_attempts must be at least 1".into()));
        }
        if self.prescriptions.write_retry_attempts == 0 {
            return Err(ConfigError::Message(
                "prescriptions.write_retry_attempts must be at least 1".into(),
            ));
        }
        if self.inventory.near_expiry_days < 0 {
            return Err(ConfigError::Message("inventory.near_expiry_days cannot be negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = EngineConfig::load_from("config/does-not-exist").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = std::env::temp_dir().join(format!("pharmledger-config-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[ledger]\nmax_attempts = 9\n\n[dispensing]\nallow_partial = true").unwrap();

        let base = dir.join("engine");
        let config = EngineConfig::load_from(base.to_str().unwrap()).unwrap();
        assert_eq!(config.ledger.max_attempts, 9);
        assert!(config.dispensing.allow_partial);
        assert!(config.prescriptions.dual_verification_for_controlled);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let mut config = EngineConfig::default();
        config.ledger.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
