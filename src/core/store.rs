//! Versioned state store.
//!
//! The governance state is one JSON document. Loading runs migrations and
//! reference validation; saving stamps `updated_at` and atomically replaces
//! the document so a reader never sees a partial write.
//!
//! Two store kinds are supported:
//! - `File`: the canonical on-disk document under `.gantry/`
//! - `Memory`: an in-process document for tests and embedding

use crate::core::error::GantryError;
use crate::core::migration;
use crate::core::state::{GovernanceState, LogIntegrityMode};
use crate::core::time::{Clock, SystemClock, format_ts};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    File,
    Memory,
}

/// Exclusive cross-process write lock, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: Option<File>,
}

impl StoreLock {
    pub fn noop() -> Self {
        Self { file: None }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

pub trait StateStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Current document, migrated and validated. Absent → fresh default state.
    fn load(&self) -> Result<GovernanceState, GantryError>;

    /// Stamp `updated_at` and replace the document atomically.
    fn save(&self, state: &mut GovernanceState) -> Result<(), GantryError>;

    /// Serialise writers across processes. In-process stores need nothing.
    fn lock(&self) -> Result<StoreLock, GantryError> {
        Ok(StoreLock::noop())
    }

    fn describe(&self) -> String;
}

/// Parse, migrate, type, and validate a raw document.
pub fn decode_document(raw: &str, now: &str) -> Result<GovernanceState, GantryError> {
    let doc: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| GantryError::ValidationError(format!("corrupt state document: {}", e)))?;
    let doc = migration::migrate_document(doc, now)?;
    let state: GovernanceState = serde_json::from_value(doc)
        .map_err(|e| GantryError::ValidationError(format!("corrupt state document: {}", e)))?;
    state.validate_references()?;
    Ok(state)
}

pub fn encode_document(state: &GovernanceState) -> Result<String, GantryError> {
    let mut out = serde_json::to_string_pretty(state)?;
    out.push('\n');
    Ok(out)
}

/// JSON document on disk, replaced via write-to-temp then rename.
pub struct JsonFileStore {
    path: PathBuf,
    lock_enabled: bool,
    default_mode: LogIntegrityMode,
    clock: Arc<dyn Clock>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_enabled: true,
            default_mode: LogIntegrityMode::Plain,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_lock(mut self, enabled: bool) -> Self {
        self.lock_enabled = enabled;
        self
    }

    pub fn with_default_mode(mut self, mode: LogIntegrityMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "state.json".to_string());
        self.path.with_file_name(format!("{}{}", name, suffix))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn ensure_parent(&self) -> Result<(), GantryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(GantryError::IoError)?;
        }
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn kind(&self) -> StoreKind {
        StoreKind::File
    }

    fn load(&self) -> Result<GovernanceState, GantryError> {
        let now = format_ts(self.clock.now());
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "no state document; starting fresh");
            return Ok(GovernanceState::new(&now, self.default_mode));
        }
        let raw = fs::read_to_string(&self.path).map_err(GantryError::IoError)?;
        let state = decode_document(&raw, &now)?;
        tracing::debug!(
            path = %self.path.display(),
            packets = state.packets.len(),
            events = state.log.len(),
            "loaded state"
        );
        Ok(state)
    }

    fn save(&self, state: &mut GovernanceState) -> Result<(), GantryError> {
        state.updated_at = format_ts(self.clock.now());
        let body = encode_document(state)?;
        self.ensure_parent()?;

        let tmp = self.sibling(".tmp");
        {
            let mut f = File::create(&tmp).map_err(GantryError::IoError)?;
            f.write_all(body.as_bytes()).map_err(GantryError::IoError)?;
            f.sync_all().map_err(GantryError::IoError)?;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(GantryError::IoError(e));
        }
        tracing::debug!(path = %self.path.display(), bytes = body.len(), "saved state");
        Ok(())
    }

    fn lock(&self) -> Result<StoreLock, GantryError> {
        if !self.lock_enabled {
            return Ok(StoreLock::noop());
        }
        self.ensure_parent()?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                GantryError::LockError(format!("cannot open {}: {}", lock_path.display(), e))
            })?;
        // Blocks until the current writer finishes its transaction.
        file.lock_exclusive().map_err(|e| {
            GantryError::LockError(format!("cannot lock {}: {}", lock_path.display(), e))
        })?;
        Ok(StoreLock { file: Some(file) })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process store holding the encoded document, so reads go through the
/// same decode and migration path as the file store.
pub struct MemoryStore {
    document: Mutex<Option<String>>,
    default_mode: LogIntegrityMode,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            document: Mutex::new(None),
            default_mode: LogIntegrityMode::Plain,
            clock: Arc::new(SystemClock),
        }
    }

    /// Seed with a raw (possibly legacy) document.
    pub fn with_document(self, doc: serde_json::Value) -> Self {
        let raw = doc.to_string();
        Self {
            document: Mutex::new(Some(raw)),
            ..self
        }
    }

    pub fn with_default_mode(mut self, mode: LogIntegrityMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Last saved document, exactly as encoded.
    pub fn raw(&self) -> Result<Option<String>, GantryError> {
        self.document
            .lock()
            .map(|doc| doc.clone())
            .map_err(|_| GantryError::LockError("memory store poisoned".to_string()))
    }
}

impl StateStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }

    fn load(&self) -> Result<GovernanceState, GantryError> {
        let now = format_ts(self.clock.now());
        match self.raw()? {
            Some(raw) => decode_document(&raw, &now),
            None => Ok(GovernanceState::new(&now, self.default_mode)),
        }
    }

    fn save(&self, state: &mut GovernanceState) -> Result<(), GantryError> {
        state.updated_at = format_ts(self.clock.now());
        let body = encode_document(state)?;
        let mut doc = self
            .document
            .lock()
            .map_err(|_| GantryError::LockError("memory store poisoned".to_string()))?;
        *doc = Some(body);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
