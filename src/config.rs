//! Runtime configuration
//!
//! Defaults are suitable for local use; everything can be overridden via
//! `BRANCHBOARD_*` environment variables.

use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Control server port; 0 means pick an ephemeral port
    pub port: u16,
    /// Directory holding persisted brainstorm state files
    pub state_dir: PathBuf,
    /// Skip launching the platform browser (testing only)
    pub skip_browser: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 0,
            state_dir: default_state_dir(),
            skip_browser: false,
        }
    }
}

/// Default state directory: `~/.branchboard/state`
fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".branchboard")
        .join("state")
}

/// Validate a port value coming from config or the tool surface
pub fn validate_port(port: i64) -> Result<u16, String> {
    if !(0..=65535).contains(&port) {
        return Err(format!("Port {} out of range (0-65535)", port));
    }
    Ok(port as u16)
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("BRANCHBOARD_PORT") {
            let parsed: i64 = raw
                .parse()
                .map_err(|e| format!("Invalid BRANCHBOARD_PORT '{}': {}", raw, e))?;
            config.port = validate_port(parsed)?;
        }

        if let Ok(dir) = std::env::var("BRANCHBOARD_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }

        if let Ok(raw) = std::env::var("BRANCHBOARD_SKIP_BROWSER") {
            config.skip_browser = matches!(raw.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}
