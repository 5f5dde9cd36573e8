use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::models::ScrobbleKey;

/// The last scrobble ListenBrainz accepted, kept in a small JSON file next to
/// (not inside) the store so it survives a rebuilt database.
#[derive(Debug, Clone)]
pub struct CursorFile {
    path: PathBuf,
}

impl CursorFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when nothing has been submitted yet (file absent or blank).
    pub async fn load(&self) -> Result<Option<ScrobbleKey>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };

        let contents = contents.trim_end();
        if contents.is_empty() {
            return Ok(None);
        }

        let key = serde_json::from_str(contents)
            .with_context(|| format!("{} is not a valid cursor", self.path.display()))?;
        Ok(Some(key))
    }

    /// Replace the stored cursor. Written to a sibling file first and renamed
    /// over the old one, so a crash leaves either the old or the new cursor.
    pub async fn save(&self, key: &ScrobbleKey) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(key)?)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
