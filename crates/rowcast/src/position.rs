//! Checkpoint storage.
//!
//! The producer only ever asks a store to move to a new position; it never
//! reads positions back while running.

use crate::error::ProducerResult;
use crate::event::Position;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Where the pipeline's checkpoint lives.
pub trait PositionStore: Send + Sync {
    /// Advance the checkpoint to `position`.
    fn set_position(&self, position: &Position) -> ProducerResult<()>;

    /// The last position stored, if any.
    fn position(&self) -> Option<Position>;
}

/// In-memory store that remembers every advancement.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    history: Mutex<Vec<Position>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every position stored, oldest first.
    pub fn history(&self) -> Vec<Position> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl PositionStore for MemoryPositionStore {
    fn set_position(&self, position: &Position) -> ProducerResult<()> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(position.clone());
        Ok(())
    }

    fn position(&self) -> Option<Position> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }
}

/// Store that keeps the latest position in a JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash leaves either the old or the new position on disk.
#[derive(Debug)]
pub struct FilePositionStore {
    path: PathBuf,
    current: Mutex<Option<Position>>,
}

impl FilePositionStore {
    /// Open the store, loading the existing position if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> ProducerResult<Self> {
        let path = path.into();
        let current = match fs::read_to_string(&path) {
            Ok(contents) => Some(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            current: Mutex::new(current),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl PositionStore for FilePositionStore {
    fn set_position(&self, position: &Position) -> ProducerResult<()> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = current.as_ref() {
            if position < previous {
                warn!(
                    previous = %previous,
                    next = %position,
                    "Position moved backwards"
                );
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        fs::write(&temp, serde_json::to_vec(position)?)?;
        fs::rename(&temp, &self.path)?;

        debug!(position = %position, path = %self.path.display(), "Stored position");
        *current = Some(position.clone());
        Ok(())
    }

    fn position(&self) -> Option<Position> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
