use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    #[serde(rename = "ph")]
    Header,
    #[serde(rename = "pk")]
    Content,
}

/// Completed header levels and content pages.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    #[serde(default)]
    pub ph: BTreeSet<u32>,
    #[serde(default)]
    pub pk: BTreeSet<u32>,
}

impl ProgressRecord {
    fn set(&self, kind: ChunkKind) -> &BTreeSet<u32> {
        match kind {
            ChunkKind::Header => &self.ph,
            ChunkKind::Content => &self.pk,
        }
    }

    fn set_mut(&mut self, kind: ChunkKind) -> &mut BTreeSet<u32> {
        match kind {
            ChunkKind::Header => &mut self.ph,
            ChunkKind::Content => &mut self.pk,
        }
    }
}

/// Durable record of which chunks are on disk. Every change rewrites the whole file.
pub struct ProgressStore {
    path: PathBuf,
    record: Mutex<ProgressRecord>,
}

impl ProgressStore {
    pub fn load<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();

        let record = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(record) => record,
                Err(e) => {
                    warn!("progress {} unreadable, starting over: {}", path.display(), e);
                    ProgressRecord::default()
                }
            },
            Err(_) => ProgressRecord::default(),
        };
        debug!("progress: {:?}", record);

        ProgressStore {
            path,
            record: Mutex::new(record),
        }
    }

    pub fn is_done(&self, kind: ChunkKind, index: u32) -> bool {
        self.lock().set(kind).contains(&index)
    }

    pub fn mark_done(&self, kind: ChunkKind, index: u32) -> Result<(), Error> {
        let mut record = self.lock();
        if record.set_mut(kind).insert(index) {
            persist(&self.path, &record)?;
        }
        Ok(())
    }

    /// Forget every entry of one kind.
    pub fn reset(&self, kind: ChunkKind) -> Result<(), Error> {
        let mut record = self.lock();
        if !record.set(kind).is_empty() {
            record.set_mut(kind).clear();
            persist(&self.path, &record)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), Error> {
        let mut record = self.lock();
        *record = ProgressRecord::default();
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn snapshot(&self) -> ProgressRecord {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// Write to a sibling temp file then rename over, a reader sees the old or the new record
fn persist(path: &Path, record: &ProgressRecord) -> Result<(), Error> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, record)?;
    tmp.flush()?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
