//! Read cursors: per conversation, how many messages the user has seen.
//!
//! The cursor map is local state only. It is never a source of truth for
//! unread totals beyond the local session, so a missing or corrupt file just
//! starts from zero.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::warn;

use murmur_shared::types::RoomId;

use crate::error::{ClientError, Result};

/// Injected read-cursor storage.
pub trait ReadCursorStore: Send {
    /// Last acknowledged message count for `room`, zero if never set.
    fn get(&self, room: &RoomId) -> u64;

    fn set(&mut self, room: &RoomId, acknowledged: u64) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryCursorStore {
    cursors: HashMap<RoomId, u64>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadCursorStore for MemoryCursorStore {
    fn get(&self, room: &RoomId) -> u64 {
        self.cursors.get(room).copied().unwrap_or(0)
    }

    fn set(&mut self, room: &RoomId, acknowledged: u64) -> Result<()> {
        self.cursors.insert(room.clone(), acknowledged);
        Ok(())
    }
}

/// Cursor map persisted as a JSON object `{ room_id: count }`.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    cursors: HashMap<RoomId, u64>,
}

impl FileCursorStore {
    /// Open the store at the platform data directory.
    pub fn open_default() -> Result<Self> {
        Self::open(&default_path()?)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let cursors = match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Corrupt read-cursor file, starting fresh");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            cursors,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.cursors)?;
        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ReadCursorStore for FileCursorStore {
    fn get(&self, room: &RoomId) -> u64 {
        self.cursors.get(room).copied().unwrap_or(0)
    }

    fn set(&mut self, room: &RoomId, acknowledged: u64) -> Result<()> {
        if self.cursors.get(room) == Some(&acknowledged) {
            return Ok(());
        }
        self.cursors.insert(room.clone(), acknowledged);
        self.save()
    }
}

/// `<data dir>/read_cursors.json`
pub fn default_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("org", "murmur", "murmur").ok_or_else(|| {
        ClientError::InvalidConfig("cannot determine the platform data directory".into())
    })?;
    Ok(dirs.data_dir().join("read_cursors.json"))
}
