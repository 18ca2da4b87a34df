//! Fake documents served out of a `MemoryRemote` for the pipeline tests.
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::json;
use tempfile::TempDir;

use ecore::codec;
use ecore::descriptor::{Descriptor, PageId};
use remote::mem::MemoryRemote;

use crate::cli::Config;
use crate::context::{Cancel, Context, Layout};
use crate::journal::Journal;

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn fragment(prefix: usize, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0x11; prefix];
    out.extend_from_slice(&zlib(data));
    out
}

pub fn header_body(level: u32) -> Vec<u8> {
    let mut h = b"FWS\x0a\xff\xff\xff\xff".to_vec();
    h.extend_from_slice(&[level as u8; 120]);
    h
}

pub fn page_body(page: usize) -> Vec<u8> {
    format!("page {} of the sample document;", page)
        .repeat(40 + page * 7)
        .into_bytes()
}

pub fn header_size(level: u32) -> u64 {
    1000 * level as u64
}

/// Every page that really exists on the server, in order.
pub struct Doc {
    pub levels: u32,
    pub headers: Vec<Vec<u8>>,
    pub pages: Vec<(PageId, Vec<u8>)>,
}

impl Doc {
    pub fn new(per_level: &[usize]) -> Self {
        let mut pages = Vec::new();
        let mut headers = Vec::new();

        for (l, count) in per_level.iter().enumerate() {
            let level = l as u32 + 1;
            headers.push(fragment(40, &header_body(level)));

            let mut offset = header_size(level);
            for _ in 0..*count {
                let bytes = fragment(32, &page_body(pages.len() + 1));
                let id = PageId {
                    level,
                    tag: ["7".to_string(), "8".to_string()],
                    offset,
                    length: bytes.len() as u64,
                    trailing: Vec::new(),
                };
                offset += bytes.len() as u64;
                pages.push((id, bytes));
            }
        }

        Doc {
            levels: per_level.len() as u32,
            headers,
            pages,
        }
    }

    /// Descriptor blob that lists only the pages at `listed` (0 based).
    pub fn blob(&self, listed: &[usize], declared: u32) -> String {
        let ids: Vec<String> = listed.iter().map(|i| self.pages[*i].0.to_string()).collect();
        let headers: Vec<String> = (1..=self.levels)
            .map(|l| format!("\"{}\"", header_size(l)))
            .collect();

        let payload = json!({
            "p_code": "4471829",
            "p_name": "Sample Document",
            "p_upload_date": "2021-03-04",
            "ebt_host": "http://ebt.example.com/",
            "p_swf": "77",
            "p_pagecount": declared,
            "pageCount": declared,
            "p_download": "0",
            "p_doc_format": "PDF",
            "headerInfo": headers.join(","),
            "pageInfo": codec::encode(&ids.join(","), &codec::DESCRIPTOR),
        });
        codec::encode(&payload.to_string(), &codec::DESCRIPTOR)
    }

    pub fn descriptor(&self) -> Descriptor {
        let all: Vec<usize> = (0..self.pages.len()).collect();
        Descriptor::parse(&self.blob(&all, self.pages.len() as u32)).unwrap()
    }

    /// Put every header, content chunk and level probe stream on the remote.
    pub fn serve(&self, remote: &MemoryRemote) {
        let d = self.descriptor();

        for level in 1..=self.levels {
            remote.insert(
                &d.header_address(level).unwrap().url,
                self.headers[level as usize - 1].clone(),
            );

            let stream: Vec<u8> = self
                .pages
                .iter()
                .filter(|(id, _)| id.level == level)
                .flat_map(|(_, bytes)| bytes.iter().copied())
                .collect();
            remote.insert(&d.probe_address(level).unwrap().url, stream);
        }

        for (i, (id, bytes)) in self.pages.iter().enumerate() {
            remote.insert(&d.content_address_of(i as u32 + 1, id).url, bytes.clone());
        }
    }
}

pub struct Env {
    pub tmp: TempDir,
    pub config: Config,
    pub remote: MemoryRemote,
    pub journal: Journal,
    pub cancel: Cancel,
}

impl Env {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            output_root: tmp.path().join("output"),
            log_dir: tmp.path().join("logs"),
            download_workers: 4,
            reassembly_workers: 2,
            retry_delay_ms: 1,
            ..Config::default()
        };

        Env {
            journal: Journal::new(&config.log_dir),
            tmp,
            config,
            remote: MemoryRemote::new(),
            cancel: Cancel::new(),
        }
    }

    pub fn ctx(&self) -> Context<'_> {
        Context {
            config: &self.config,
            remote: &self.remote,
            journal: &self.journal,
            cancel: &self.cancel,
        }
    }

    pub fn layout(&self, d: &Descriptor) -> Layout {
        let layout = Layout::new(&self.config.output_root, d.code());
        layout.create().unwrap();
        layout
    }
}
