use thiserror::Error;

use earc::container::ArcError;
use ecore::descriptor::DescriptorError;
use remote::RemoteError;

use crate::convert::ConvertError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Arc(#[from] ArcError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("level {level} header does not decompress: {source}")]
    ProbeHeader { level: u32, source: ArcError },

    #[error("download incomplete, {failed} chunks failed")]
    Incomplete { failed: usize },

    #[error("interrupted")]
    Cancelled,

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
