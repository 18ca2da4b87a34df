use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codec::{self, CodecError};

/// Length requested when probing a level for undeclared pages. The server clamps it to
/// whatever the level actually holds.
pub const PROBE_LENGTH: u64 = 10_240_000;

// Cache only key, set once a scan reached the end of every level
const SCANNED: &str = "scanned";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor does not decode, wrong key or corrupted data: {0}")]
    Decode(#[from] CodecError),
    #[error("descriptor decoded but its schema is not understood: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("malformed page id {0:?}")]
    PageId(String),
    #[error("malformed header size list {0:?}")]
    HeaderSize(String),
    #[error("no such level {0}")]
    UnknownLevel(u32),
    #[error("no such page {0}")]
    UnknownPage(u32),
}

/// The decoded payload as the viewer hands it out. This is also what gets cached on disk
/// as `index.json`, so fields we don't model are carried along untouched.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Payload {
    #[serde(rename = "p_code", deserialize_with = "lenient::string")]
    pub code: String,
    #[serde(rename = "p_name")]
    pub name: String,
    #[serde(rename = "p_upload_date", default)]
    pub upload_date: String,
    pub ebt_host: String,
    #[serde(rename = "p_swf", deserialize_with = "lenient::string")]
    pub swf: String,
    #[serde(rename = "p_pagecount", deserialize_with = "lenient::u32")]
    pub declared_pages: u32,
    #[serde(
        rename = "pageCount",
        default,
        deserialize_with = "lenient::opt_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub preview_pages: Option<u32>,
    #[serde(rename = "p_download", default, deserialize_with = "lenient::string")]
    pub download: String,
    #[serde(rename = "p_doc_format", default)]
    pub doc_format: String,
    #[serde(rename = "headerInfo")]
    pub header_info: String,
    #[serde(rename = "pageInfo")]
    pub page_info: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Numeric fields show up as either json numbers or numeric strings depending on the page
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
        match Value::deserialize(de)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(D::Error::custom(format!(
                "expected a string or number, got {}",
                other
            ))),
        }
    }

    pub fn u32<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
        let raw = string(de)?;
        raw.trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("expected a count, got {:?}", raw)))
    }

    pub fn opt_u32<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

/// One page entry: `level-a-b-offset-length[-trailing..]`.
///
/// Fields `a` and `b` carry no meaning for addressing and are round-tripped as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageId {
    pub level: u32,
    pub tag: [String; 2],
    pub offset: u64,
    pub length: u64,
    pub trailing: Vec<String>,
}

impl FromStr for PageId {
    type Err = DescriptorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let bad = || DescriptorError::PageId(raw.to_string());
        let fields: Vec<&str> = raw.trim().split('-').collect();
        if fields.len() < 5 {
            return Err(bad());
        }

        Ok(PageId {
            level: fields[0].parse().map_err(|_| bad())?,
            tag: [fields[1].to_string(), fields[2].to_string()],
            offset: fields[3].parse().map_err(|_| bad())?,
            length: fields[4].parse().map_err(|_| bad())?,
            trailing: fields[5..].iter().map(|f| f.to_string()).collect(),
        })
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            self.level, self.tag[0], self.tag[1], self.offset, self.length
        )?;
        for t in self.trailing.iter() {
            write!(f, "-{}", t)?;
        }
        Ok(())
    }
}

/// Where a chunk lives on the remote, always recomputed from descriptor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAddress {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Descriptor {
    payload: Payload,
    headers: Vec<u64>,
    pages: Vec<PageId>,
}

impl Descriptor {
    /// Decode the obfuscated blob handed out by the viewer.
    pub fn parse(blob: &str) -> Result<Self, DescriptorError> {
        let json = codec::decode(blob, &codec::DESCRIPTOR)?;
        Self::from_json(&json)
    }

    /// Load from the plain json payload, ie the on disk cache.
    pub fn from_json(json: &str) -> Result<Self, DescriptorError> {
        let payload: Payload = serde_json::from_str(json)?;
        Self::from_payload(payload)
    }

    pub fn from_payload(payload: Payload) -> Result<Self, DescriptorError> {
        let headers = parse_headers(&payload.header_info)?;

        let pages = codec::decode(&payload.page_info, &codec::DESCRIPTOR)?
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(PageId::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "descriptor {}: {} levels, {} page ids",
            payload.code,
            headers.len(),
            pages.len()
        );

        Ok(Descriptor {
            payload,
            headers,
            pages,
        })
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn to_json(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string(&self.payload)?)
    }

    pub fn code(&self) -> &str {
        &self.payload.code
    }

    pub fn name(&self) -> &str {
        &self.payload.name
    }

    pub fn upload_date(&self) -> &str {
        &self.payload.upload_date
    }

    pub fn host(&self) -> &str {
        self.payload.ebt_host.trim_end_matches('/')
    }

    pub fn swf(&self) -> &str {
        &self.payload.swf
    }

    pub fn declared_pages(&self) -> u32 {
        self.payload.declared_pages
    }

    pub fn preview_pages(&self) -> Option<u32> {
        self.payload.preview_pages
    }

    pub fn is_free(&self) -> bool {
        self.payload.download == "1"
    }

    pub fn doc_format(&self) -> &str {
        &self.payload.doc_format
    }

    pub fn level_count(&self) -> u32 {
        self.headers.len() as u32
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    /// The server declares more (or fewer) pages than it lists ids for, and no earlier scan
    /// covered every level.
    pub fn needs_scan(&self) -> bool {
        !self.scanned() && self.declared_pages() != self.page_count()
    }

    /// Every level was probed to the end of its stream.
    pub fn scanned(&self) -> bool {
        self.payload
            .extra
            .get(SCANNED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn mark_scanned(mut self) -> Descriptor {
        self.payload
            .extra
            .insert(SCANNED.to_string(), Value::Bool(true));
        self
    }

    pub fn header_size(&self, level: u32) -> Result<u64, DescriptorError> {
        level
            .checked_sub(1)
            .and_then(|idx| self.headers.get(idx as usize))
            .copied()
            .ok_or(DescriptorError::UnknownLevel(level))
    }

    pub fn page(&self, page: u32) -> Result<&PageId, DescriptorError> {
        page.checked_sub(1)
            .and_then(|idx| self.pages.get(idx as usize))
            .ok_or(DescriptorError::UnknownPage(page))
    }

    pub fn level_of(&self, page: u32) -> Result<u32, DescriptorError> {
        Ok(self.page(page)?.level)
    }

    pub fn header_address(&self, level: u32) -> Result<ChunkAddress, DescriptorError> {
        let size = self.header_size(level)?;
        Ok(self.address(&format!("{}-0-{}-{}", level, size, self.swf())))
    }

    pub fn content_address(&self, page: u32) -> Result<ChunkAddress, DescriptorError> {
        Ok(self.content_address_of(page, self.page(page)?))
    }

    /// Content address for an id that is not (yet) part of the page list.
    pub fn content_address_of(&self, page: u32, id: &PageId) -> ChunkAddress {
        self.address(&format!(
            "{}-{}-{}-{}-{}-{}",
            id.level,
            id.offset,
            id.length,
            self.swf(),
            page,
            self.code()
        ))
    }

    /// Address of an oversized read over a whole level, starting right after its header.
    pub fn probe_address(&self, level: u32) -> Result<ChunkAddress, DescriptorError> {
        let size = self.header_size(level)?;
        Ok(self.address(&format!(
            "{}-{}-{}-{}-1-{}",
            level,
            size,
            PROBE_LENGTH,
            self.swf(),
            self.code()
        )))
    }

    fn address(&self, tuple: &str) -> ChunkAddress {
        let name = format!("getebt-{}.ebt", codec::encode(tuple, &codec::CHUNK));
        let url = format!("{}/{}", self.host(), name);
        ChunkAddress { name, url }
    }

    /// New descriptor with the page list replaced, the payload is re-encoded to match. The
    /// declared count stays what the server said.
    pub fn with_pages(&self, pages: Vec<PageId>) -> Descriptor {
        let joined = pages
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut payload = self.payload.clone();
        payload.page_info = codec::encode(&joined, &codec::DESCRIPTOR);
        payload
            .extra
            .insert("p_count".to_string(), Value::from(pages.len()));

        Descriptor {
            payload,
            headers: self.headers.clone(),
            pages,
        }
    }
}

// headerInfo looks like `"1234","5678"`
fn parse_headers(raw: &str) -> Result<Vec<u64>, DescriptorError> {
    let headers = raw
        .replace('"', "")
        .split(',')
        .map(|h| h.trim().parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| DescriptorError::HeaderSize(raw.to_string()))?;

    if headers.is_empty() {
        return Err(DescriptorError::HeaderSize(raw.to_string()));
    }
    Ok(headers)
}
