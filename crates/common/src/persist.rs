//! Atomic JSON file persistence
//!
//! Both the credential store and the profile store keep their whole state in
//! a single JSON document. Writes go to a temp file in the same directory and
//! are renamed over the target so a crash mid-write never leaves a truncated
//! file behind.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Load a JSON document, creating it from `T::default()` on cold start.
pub async fn load_or_init<T>(path: &Path) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    if path.exists() {
        let contents = tokio::fs::read_to_string(path).await?;
        let value = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), "loaded json store");
        Ok(value)
    } else {
        info!(path = %path.display(), "store file not found, starting empty");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let value = T::default();
        write_atomic(path, &value).await?;
        Ok(value)
    }
}

/// Serialize `data` and atomically replace the file at `path`.
///
/// File permissions are set to 0600 on unix since stores may hold tokens.
pub async fn write_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Config(format!("{} has no parent directory", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("store");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;

    debug!(path = %path.display(), "persisted json store");
    Ok(())
}
