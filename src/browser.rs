//! Cross-platform browser launcher
//!
//! Opens the session URL in the user's default browser. Callers decide
//! whether a failure is fatal (`start_session`) or best-effort
//! (`push_question` reconnect attempts).

use std::process::Command;

/// Open `url` in the platform's default browser
pub fn open_url(url: &str) -> Result<(), String> {
    let result = if cfg!(target_os = "macos") {
        Command::new("open").arg(url).spawn()
    } else if cfg!(target_os = "windows") {
        Command::new("cmd").args(["/C", "start", "", url]).spawn()
    } else {
        Command::new("xdg-open").arg(url).spawn()
    };

    match result {
        Ok(_) => {
            log::info!("Opened browser at {}", url);
            Ok(())
        }
        Err(e) => Err(format!("Failed to open browser at {}: {}", url, e)),
    }
}
