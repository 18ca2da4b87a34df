use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use remote::Remote;

use crate::cli::Config;
use crate::journal::Journal;

/// Shared stop flag, once set no new work gets started.
#[derive(Debug, Default)]
pub struct Cancel(AtomicBool);

impl Cancel {
    pub fn new() -> Self {
        Cancel(AtomicBool::new(false))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a run needs besides the document itself.
pub struct Context<'a> {
    pub config: &'a Config,
    pub remote: &'a dyn Remote,
    pub journal: &'a Journal,
    pub cancel: &'a Cancel,
}

/// On disk layout of one document.
///
/// ```text
/// <root>/<code>/index.json
/// <root>/<code>/progress.json
/// <root>/<code>/getebt-*.ebt
/// <root>/<code>/swf/<page>.swf
/// <root>/<code>/pdf/<page>.pdf
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    pub dir: PathBuf,
}

impl Layout {
    pub fn new(root: &Path, code: &str) -> Self {
        Layout {
            dir: root.join(code),
        }
    }

    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(self.swf_dir())?;
        fs::create_dir_all(self.pdf_dir())
    }

    pub fn swf_dir(&self) -> PathBuf {
        self.dir.join("swf")
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.dir.join("pdf")
    }

    pub fn fragment(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn container(&self, page: u32) -> PathBuf {
        self.swf_dir().join(format!("{}.swf", page))
    }

    pub fn progress(&self) -> PathBuf {
        self.dir.join("progress.json")
    }

    pub fn index(&self) -> PathBuf {
        self.dir.join("index.json")
    }
}
