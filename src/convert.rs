use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Mutex;

use log::{debug, info, warn};
use rayon::ThreadPoolBuilder;
use thiserror::Error;

use crate::cli::ConverterConfig;
use crate::context::{Context, Layout};
use crate::error::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("could not run {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("java is not working: {0}")]
    Java(String),
    #[error("converter jar {0} not found")]
    MissingJar(PathBuf),
    #[error("converter produced nothing for {0}")]
    NoOutput(PathBuf),
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// Turns one page container into a viewable page.
pub trait Converter: Sync {
    fn check(&self) -> Result<(), ConvertError>;

    // Returns the path of the converted page inside `out_dir`
    fn convert(&self, container: &Path, out_dir: &Path) -> Result<PathBuf, ConvertError>;
}

/// JPEXS ffdec run through the java cli.
pub struct Ffdec {
    java: String,
    jar: PathBuf,
}

impl From<&ConverterConfig> for Ffdec {
    fn from(config: &ConverterConfig) -> Self {
        Ffdec {
            java: config.java.clone(),
            jar: config.jar.clone(),
        }
    }
}

impl Ffdec {
    fn run(&self, args: &[&OsStr]) -> Result<Output, ConvertError> {
        let out = Command::new(&self.java)
            .arg("-jar")
            .arg(&self.jar)
            .args(args)
            .output()
            .map_err(|e| ConvertError::Spawn(self.java.clone(), e))?;

        debug!(
            "ffdec {:?}: {}\n{}",
            out.status,
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
        Ok(out)
    }

    fn export(&self, container: &Path, work: &Path) -> Result<Option<PathBuf>, ConvertError> {
        self.run(&[
            OsStr::new("-format"),
            OsStr::new("frame:pdf"),
            OsStr::new("-select"),
            OsStr::new("1"),
            OsStr::new("-export"),
            OsStr::new("frame"),
            work.as_os_str(),
            container.as_os_str(),
        ])?;

        let frames = work.join("frames.pdf");
        Ok(if frames.exists() { Some(frames) } else { None })
    }
}

impl Converter for Ffdec {
    fn check(&self) -> Result<(), ConvertError> {
        let out = Command::new(&self.java)
            .arg("-version")
            .output()
            .map_err(|e| ConvertError::Spawn(self.java.clone(), e))?;
        if !out.status.success() {
            return Err(ConvertError::Java(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }

        if !self.jar.is_file() {
            return Err(ConvertError::MissingJar(self.jar.clone()));
        }
        Ok(())
    }

    fn convert(&self, container: &Path, out_dir: &Path) -> Result<PathBuf, ConvertError> {
        let stem = container
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string());
        let work = tempfile::Builder::new()
            .prefix(&format!("{}-", stem))
            .tempdir_in(out_dir)?;

        let frames = match self.export(container, work.path())? {
            Some(frames) => frames,
            None => {
                // Some containers declare zero frames, pin it to one and retry
                debug!("{}: no frames, patching frame count", container.display());
                self.run(&[
                    OsStr::new("-header"),
                    OsStr::new("-set"),
                    OsStr::new("frameCount"),
                    OsStr::new("1"),
                    container.as_os_str(),
                    container.as_os_str(),
                ])?;
                self.export(container, work.path())?
                    .ok_or_else(|| ConvertError::NoOutput(container.to_path_buf()))?
            }
        };

        let target = out_dir.join(format!("{}.pdf", stem));
        fs::rename(frames, &target)?;
        Ok(target)
    }
}

/// Converted pages in page order plus the ones that did not convert.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub converted: Vec<(u32, PathBuf)>,
    pub failed: Vec<u32>,
}

pub fn convert_all(
    ctx: &Context,
    converter: &dyn Converter,
    layout: &Layout,
    pages: &[u32],
) -> Result<ConversionReport, Error> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(ctx.config.reassembly_workers.max(1))
        .thread_name(|i| format!("convert-{}", i))
        .build()?;

    let report = Mutex::new(ConversionReport::default());
    let out_dir = layout.pdf_dir();

    pool.scope(|s| {
        for &page in pages {
            let (report, out_dir) = (&report, &out_dir);
            s.spawn(move |_| {
                let res = converter.convert(&layout.container(page), out_dir);
                let mut report = report.lock().unwrap_or_else(|e| e.into_inner());
                match res {
                    Ok(path) => {
                        info!("Converted page {}", page);
                        report.converted.push((page, path));
                    }
                    Err(e) => {
                        warn!("Can't convert page {}: {}", page, e);
                        ctx.journal
                            .record(&format!("converting page {} failed: {}", page, e));
                        report.failed.push(page);
                    }
                }
            });
        }
    });

    let mut report = report.into_inner().unwrap_or_else(|e| e.into_inner());
    report.converted.sort();
    report.failed.sort_unstable();
    Ok(report)
}
