//! Persisted selection and last good rate table.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stayfx_fx::RateTable;
use tracing::debug;

use crate::error::ContextResult;

/// The single persisted record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Last explicitly selected currency code, unvalidated.
    #[serde(default)]
    pub selected_code: Option<String>,
    /// Last committed table; absent while only the bootstrap table exists.
    #[serde(default)]
    pub last_good_table: Option<RateTable>,
}

/// Storage for the persisted record.
pub trait StateStore: Send + Sync {
    /// Read the record, `None` if nothing was saved yet.
    fn load(&self) -> ContextResult<Option<PersistedState>>;

    /// Replace the record.
    fn save(&self, state: &PersistedState) -> ContextResult<()>;
}

/// JSON file store. Writes go to a sibling temp file and are renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> ContextResult<Option<PersistedState>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, state: &PersistedState) -> ContextResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            serde_json::to_writer(&mut file, state)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        debug!(path = %self.path.display(), "Persisted currency state");
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `state`.
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// The last saved record.
    pub fn snapshot(&self) -> Option<PersistedState> {
        self.state.lock().clone()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> ContextResult<Option<PersistedState>> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &PersistedState) -> ContextResult<()> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }
}
