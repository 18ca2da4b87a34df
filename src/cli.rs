use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgGroup, Parser, Subcommand};
use serde::Deserialize;

use remote::Retry;

use crate::error::Error;

#[derive(Parser)]
#[command(name = "ebtrip")]
#[command(about = "Rebuild paged documents out of the viewer's chunk server")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch and rebuild one document
    #[command(group(ArgGroup::new("input").required(true).args(["data", "file"])))]
    Extract {
        /// The obfuscated descriptor blob
        #[arg(short, long)]
        data: Option<String>,

        /// Read the descriptor blob from a file
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Probe levels for pages the descriptor does not list
        #[arg(long)]
        scan: bool,

        /// Stop after the per page containers
        #[arg(long)]
        no_convert: bool,
    },

    /// Remove the cached chunks and intermediate files of a document
    Clean {
        /// The document code
        code: String,
    },

    /// Rebuild the code to name index of every cached document
    Index,
}

// Configuration
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub output_root: PathBuf,
    pub log_dir: PathBuf,

    pub download_workers: usize,
    pub reassembly_workers: usize,

    pub retries: u32,
    pub retry_delay_ms: u64,

    pub scan_undeclared: bool,
    pub clean: bool,

    pub user_agent: String,
    pub referer: Option<String>,

    pub converter: Option<ConverterConfig>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ConverterConfig {
    pub java: String,
    pub jar: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            output_root: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            download_workers: 10,
            reassembly_workers: 5,
            retries: 3,
            retry_delay_ms: 500,
            scan_undeclared: false,
            clean: false,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string(),
            referer: None,
            converter: None,
        }
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            java: "java".to_string(),
            jar: PathBuf::from("ffdec/ffdec.jar"),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            None => Ok(Config::default()),
            Some(path) => Ok(toml::from_str(&fs::read_to_string(path)?)?),
        }
    }

    pub fn retry(&self) -> Retry {
        Retry {
            attempts: self.retries.max(1),
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}
