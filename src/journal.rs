use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Append only log of the things that went wrong, one file per day.
pub struct Journal {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl Journal {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Journal {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    // Never fails the caller, a broken journal only gets a warning
    pub fn record(&self, msg: &str) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = append(&self.dir, OffsetDateTime::now_utc(), msg) {
            warn!("could not write journal in {}: {}", self.dir.display(), e);
        }
    }
}

fn append(dir: &Path, now: OffsetDateTime, msg: &str) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;

    let stamp = now
        .format(&Rfc3339)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{}.log", now.date())))?;
    writeln!(file, "[{}]: {}", stamp, msg)
}
