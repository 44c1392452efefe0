use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

pub const HOME_ENV: &str = "APKPIPE_HOME";
pub const TOOLS_DIR_ENV: &str = "APKPIPE_TOOLS_DIR";

pub fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Base install directory. Holds the SDK tools, the shared debug keystore and
/// persisted state.
pub fn data_dir() -> PathBuf {
    if let Some(home) = env_trimmed(HOME_ENV) {
        return expand_user(&home);
    }
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share/apkpipe")
    } else {
        PathBuf::from("/tmp/apkpipe")
    }
}

pub fn tools_dir() -> PathBuf {
    match env_trimmed(TOOLS_DIR_ENV) {
        Some(dir) => expand_user(&dir),
        None => data_dir().join("bin"),
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn state_file_path(file_name: &str) -> PathBuf {
    state_dir().join(file_name)
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a JSON document, falling back to `T::default()` when the file is
/// missing or unreadable.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str::<T>(&data) {
            Ok(value) => value,
            Err(err) => {
                warn!("Failed to parse {}: {}", path.display(), err);
                T::default()
            }
        },
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), err);
            }
            T::default()
        }
    }
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .with_target(false)
        .init();
    Ok(())
}
