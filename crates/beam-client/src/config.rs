//! Node configuration loaded from environment variables.
//!
//! Every setting has a default so a node can start with zero configuration
//! on a LAN.

use std::path::PathBuf;

use beam_shared::constants::DEFAULT_QUIC_PORT;
use beam_store::Database;

const DEFAULT_DISPLAY_NAME: &str = "Beam User";
const FALLBACK_DATA_DIR: &str = ".beam";

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Holds `beam.db` and the `secrets/` directory.
    /// Env: `BEAM_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: PathBuf,

    /// Name put on this device's contact card until the user sets one.
    /// Env: `BEAM_DISPLAY_NAME`
    pub display_name: String,

    /// UDP port for QUIC.
    /// Env: `BEAM_LISTEN_PORT`
    /// Default: `4011`
    pub listen_port: u16,

    /// Passphrase protecting the file secret store.
    /// Env: `BEAM_SECRET_PASSPHRASE`
    pub secret_passphrase: String,

    /// Accept and allow sending unencrypted `plaintext_message` packets.
    /// Env: `BEAM_ALLOW_PLAINTEXT` (true/false)
    /// Default: `false`
    pub allow_plaintext: bool,

    /// Accept and allow sending stateless (non-ratcheted) messages.
    /// Env: `BEAM_ALLOW_STATELESS` (true/false)
    /// Default: `false`
    pub allow_stateless: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: Database::default_data_dir()
                .unwrap_or_else(|_| PathBuf::from(FALLBACK_DATA_DIR)),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            listen_port: DEFAULT_QUIC_PORT,
            secret_passphrase: String::new(),
            allow_plaintext: false,
            allow_stateless: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("BEAM_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(name) = lookup("BEAM_DISPLAY_NAME") {
            let name = name.trim();
            if name.is_empty() {
                tracing::warn!("Empty BEAM_DISPLAY_NAME, using default");
            } else {
                config.display_name = name.to_string();
            }
        }

        if let Some(port) = lookup("BEAM_LISTEN_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) => config.listen_port = parsed,
                Err(_) => tracing::warn!(value = %port, "Invalid BEAM_LISTEN_PORT, using default"),
            }
        }

        if let Some(passphrase) = lookup("BEAM_SECRET_PASSPHRASE") {
            config.secret_passphrase = passphrase;
        }

        if let Some(val) = lookup("BEAM_ALLOW_PLAINTEXT") {
            config.allow_plaintext = parse_flag("BEAM_ALLOW_PLAINTEXT", &val, config.allow_plaintext);
        }

        if let Some(val) = lookup("BEAM_ALLOW_STATELESS") {
            config.allow_stateless = parse_flag("BEAM_ALLOW_STATELESS", &val, config.allow_stateless);
        }

        config
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.data_dir.join("secrets")
    }
}

fn parse_flag(name: &str, value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            tracing::warn!(var = name, value, "Invalid boolean, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> NodeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.listen_port, 4011);
        assert_eq!(config.display_name, "Beam User");
        assert!(!config.allow_plaintext);
        assert!(!config.allow_stateless);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("BEAM_DATA_DIR", "/tmp/beam-test"),
            ("BEAM_DISPLAY_NAME", "Alice"),
            ("BEAM_LISTEN_PORT", "5000"),
            ("BEAM_ALLOW_PLAINTEXT", "true"),
            ("BEAM_ALLOW_STATELESS", "1"),
        ]);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/beam-test"));
        assert_eq!(config.secrets_dir(), PathBuf::from("/tmp/beam-test/secrets"));
        assert_eq!(config.display_name, "Alice");
        assert_eq!(config.listen_port, 5000);
        assert!(config.allow_plaintext);
        assert!(config.allow_stateless);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("BEAM_LISTEN_PORT", "seventy"),
            ("BEAM_ALLOW_PLAINTEXT", "maybe"),
            ("BEAM_DISPLAY_NAME", "   "),
        ]);
        assert_eq!(config.listen_port, 4011);
        assert!(!config.allow_plaintext);
        assert_eq!(config.display_name, "Beam User");
    }
}
