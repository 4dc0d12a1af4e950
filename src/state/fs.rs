//! File helpers for the durable state store
//!
//! State files are small JSON documents rewritten on every mutation. Each
//! write lands in a hidden swap file beside the target and is renamed over
//! it, so a crash mid-write never leaves a partial document where a reader
//! could find one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

fn describe(action: &str, path: &Path, err: io::Error) -> String {
    format!("{} {}: {}", action, path.display(), err)
}

/// Create a directory and any missing parents; fine if it already exists
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    fs::create_dir_all(path).map_err(|e| describe("Could not create directory", path, e))
}

/// Swap-file sibling used while atomically replacing `target`.
///
/// Dot-prefixed and with a non-json suffix, so a leaked swap file is never
/// picked up by `list_json_stems`.
fn swap_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    target.with_file_name(format!(".{}.swap", name))
}

/// Replace the contents of `path` without exposing a partial file
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }

    let swap = swap_path(path);
    fs::write(&swap, content).map_err(|e| describe("Could not write swap file", &swap, e))?;
    fs::rename(&swap, path).map_err(|e| describe("Could not move swap file over", path, e))
}

/// Parse a JSON file
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let raw = fs::read_to_string(path).map_err(|e| describe("Could not read", path, e))?;
    serde_json::from_str(&raw).map_err(|e| format!("Bad JSON in {}: {}", path.display(), e))
}

/// Serialize as pretty JSON and atomically replace `path`
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Could not serialize {}: {}", path.display(), e))?;
    atomic_write(path, &content)
}

/// Stems of the `.json` files in `dir`, sorted; a missing dir reads as empty
pub fn list_json_stems(dir: &Path) -> FileResult<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).map_err(|e| describe("Could not list", dir, e))?;

    let mut stems = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| describe("Could not list", dir, e))?
            .path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        atomic_write(&path, "first").unwrap();
        atomic_write(&path, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        // No swap file left behind
        assert!(!swap_path(&path).exists());
    }

    #[test]
    fn test_atomic_write_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("deep").join("nested").join("state.json");

        atomic_write(&path, "{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_json_roundtrip() {
        use serde::{Deserialize, Serialize};

        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Blob {
            name: String,
            count: u32,
        }

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blob.json");

        let blob = Blob {
            name: "x".to_string(),
            count: 3,
        };
        write_json(&path, &blob).unwrap();
        let back: Blob = read_json(&path).unwrap();
        assert_eq!(back, blob);
    }

    #[test]
    fn test_read_json_reports_bad_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        fs::write(&path, "not json").unwrap();

        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert!(err.contains("Bad JSON"));
    }

    #[test]
    fn test_list_json_stems() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_json_stems(&temp_dir.path().join("missing"))
            .unwrap()
            .is_empty());

        atomic_write(&temp_dir.path().join("ses_b.json"), "{}").unwrap();
        atomic_write(&temp_dir.path().join("ses_a.json"), "{}").unwrap();
        atomic_write(&temp_dir.path().join("notes.txt"), "x").unwrap();
        // A stray swap file must not show up either
        fs::write(temp_dir.path().join(".ses_c.json.swap"), "{}").unwrap();

        let stems = list_json_stems(temp_dir.path()).unwrap();
        assert_eq!(stems, vec!["ses_a", "ses_b"]);
    }
}
