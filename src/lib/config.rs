use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_primitives::B256;
use serde::Deserialize;

use crate::domain::params::ProtocolParams;

/// Top-level recovery configuration loaded from TOML.
#[derive(Debug, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub protocol: ProtocolParams,
    pub prover: ProverConfig,
    pub scenario: ScenarioConfig,
}

/// Proving backend settings.
#[derive(Debug, Deserialize)]
pub struct ProverConfig {
    /// Seed shared by prover and verifier; proofs do not verify across seeds.
    pub setup_seed: B256,
    /// Upper bound on a single proving call (e.g. "30s"). Parsed via humantime.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Accounts and values of one recovery run. Accounts are positions in the key store.
#[derive(Debug, Deserialize)]
pub struct ScenarioConfig {
    pub keystore: PathBuf,
    pub friends: Vec<usize>,
    pub old_account: usize,
    pub new_account: usize,
    pub passphrase: String,
    pub threshold: u64,
    /// Maximum amount the transfer may move.
    pub limit: u64,
    /// Balance credited to the old account before the run.
    #[serde(default)]
    pub funding: u64,
    /// Decoy preparations submitted against null slots.
    #[serde(default)]
    pub decoys: usize,
    /// Note shown to every friend in their invitation.
    #[serde(default)]
    pub note: String,
}

/// Errors from config loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl RecoveryConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let scenario = &self.scenario;
        if scenario.old_account == scenario.new_account {
            return Err(ConfigError::Validation(
                "scenario.old_account and scenario.new_account must be different".into(),
            ));
        }
        if scenario
            .friends
            .iter()
            .any(|f| *f == scenario.old_account || *f == scenario.new_account)
        {
            return Err(ConfigError::Validation(
                "scenario.friends must not include the old or new account".into(),
            ));
        }
        if scenario.threshold > scenario.friends.len() as u64 {
            return Err(ConfigError::Validation(format!(
                "scenario.threshold {} exceeds {} friends",
                scenario.threshold,
                scenario.friends.len()
            )));
        }
        let null_slots = self.protocol.max_friends_len.saturating_sub(scenario.friends.len());
        if scenario.decoys > null_slots {
            return Err(ConfigError::Validation(format!(
                "scenario.decoys {} exceeds {null_slots} null slots",
                scenario.decoys
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::DEFAULT_MAX_FRIENDS_LEN;

    const MINIMAL: &str = r#"
[prover]
setup_seed = "0x0101010101010101010101010101010101010101010101010101010101010101"

[scenario]
keystore = "allkeys.json"
friends = [2, 3, 4]
old_account = 0
new_account = 1
passphrase = "correct horse"
threshold = 2
limit = 1000
"#;

    #[test]
    fn test_parse_minimal_config() {
        let config: RecoveryConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.protocol.max_friends_len, DEFAULT_MAX_FRIENDS_LEN);
        assert_eq!(config.prover.setup_seed, B256::repeat_byte(1));
        assert!(config.prover.timeout.is_none());
        assert_eq!(config.scenario.decoys, 0);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = format!(
            "{MINIMAL}decoys = 2\nfunding = 5000\n\n[protocol]\nmax_friends_len = 8\nmax_note_len = 64\n"
        );
        let toml = toml.replace("[prover]\n", "[prover]\ntimeout = \"30s\"\n");
        let config: RecoveryConfig = toml::from_str(&toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.protocol.max_friends_len, 8);
        assert_eq!(config.prover.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.scenario.decoys, 2);
        assert_eq!(config.scenario.funding, 5000);
    }

    #[test]
    fn test_threshold_above_friends_rejected() {
        let toml = MINIMAL.replace("threshold = 2", "threshold = 4");
        let config: RecoveryConfig = toml::from_str(&toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds 3 friends"));
    }

    #[test]
    fn test_same_account_rejected() {
        let toml = MINIMAL.replace("new_account = 1", "new_account = 0");
        let config: RecoveryConfig = toml::from_str(&toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must be different"));
    }

    #[test]
    fn test_invalid_protocol_params_rejected() {
        let toml = format!("{MINIMAL}\n[protocol]\nmax_friends_len = 12\n");
        let config: RecoveryConfig = toml::from_str(&toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = RecoveryConfig::load(&path).unwrap();
        assert_eq!(config.scenario.friends, vec![2, 3, 4]);

        assert!(matches!(
            RecoveryConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
