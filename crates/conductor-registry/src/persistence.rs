//! One JSON file per resumable session, under `<sessions_dir>/<id>.json`.

use crate::error::Result;
use conductor_types::SessionMetadata;
use std::path::{Path, PathBuf};
use tracing::warn;

pub fn metadata_path(sessions_dir: &Path, session_id: &str) -> PathBuf {
    sessions_dir.join(format!("{session_id}.json"))
}

pub fn save(sessions_dir: &Path, meta: &SessionMetadata) -> Result<()> {
    std::fs::create_dir_all(sessions_dir)?;
    let path = metadata_path(sessions_dir, &meta.id);
    let json = serde_json::to_string_pretty(meta)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn delete(sessions_dir: &Path, session_id: &str) {
    let path = metadata_path(sessions_dir, session_id);
    let _ = std::fs::remove_file(path);
}

/// Loads every `resumable` entry from disk, skipping (and logging)
/// any file that fails to parse or whose projection doesn't actually
/// qualify as resumable — a corrupt or stale entry should never stop
/// the rest of the registry from coming up.
pub fn load_all(sessions_dir: &Path) -> Vec<SessionMetadata> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(sessions_dir) {
        Ok(entries) => entries,
        Err(_) => return out,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<SessionMetadata>(&text) {
                Ok(meta) if meta.is_resumable() => out.push(meta),
                Ok(_) => {
                    warn!(path = %path.display(), "skipping non-resumable session metadata on disk");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt session metadata");
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read session metadata");
            }
        }
    }
    out
}
