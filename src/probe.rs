use std::fs;

use log::{info, warn};

use earc::container::{decompress_content, decompress_header, merge};
use earc::scan::BoundaryScanner;
use ecore::descriptor::{Descriptor, PageId};

use crate::context::{Context, Layout};
use crate::error::Error;
use crate::progress::{ChunkKind, ProgressStore};

/// A page cut out of a level's probe stream, not yet numbered or written.
#[derive(Debug)]
pub struct Found {
    pub id: PageId,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct LevelScan {
    pub found: Vec<Found>,
    /// The probe stream broke off before its end.
    pub truncated: bool,
}

/// Recover the page ids of one level by scanning its probe stream.
///
/// The level header is fetched, written and marked done once it decompresses. Found pages
/// are only returned, their page numbers depend on how they merge with the listed ids.
pub fn scan_level(
    ctx: &Context,
    descriptor: &Descriptor,
    layout: &Layout,
    store: &ProgressStore,
    level: u32,
) -> Result<LevelScan, Error> {
    let ph = descriptor.header_address(level)?;
    let data = ctx.config.retry().get(ctx.remote, &ph.url)?;
    let header = decompress_header(&data).map_err(|source| Error::ProbeHeader { level, source })?;
    fs::write(layout.fragment(&ph.name), &data)?;
    store.mark_done(ChunkKind::Header, level)?;

    let head = descriptor.header_size(level)?;
    let tag = descriptor
        .pages()
        .first()
        .map(|p| p.tag.clone())
        .unwrap_or_else(|| ["0".to_string(), "0".to_string()]);

    let probe = descriptor.probe_address(level)?;
    info!("Scanning level {}: {}", level, probe.url);
    let stream = ctx.remote.stream(&probe.url)?;

    let mut found = Vec::new();
    let scanner = BoundaryScanner::new(|window: &[u8]| {
        decompress_content(window)
            .and_then(|content| merge(&header, &content))
            .is_ok()
    });

    let report = scanner.scan(stream, |window| -> Result<(), Error> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let id = PageId {
            level,
            tag: tag.clone(),
            offset: head + window.offset,
            length: window.bytes.len() as u64,
            trailing: Vec::new(),
        };
        info!("Found page on level {}: {}", level, id);
        found.push(Found {
            id,
            bytes: window.bytes,
        });
        Ok(())
    })?;

    if report.truncated {
        warn!(
            "level {} probe stream ended early after {} bytes",
            level, report.bytes
        );
    }
    Ok(LevelScan {
        found,
        truncated: report.truncated,
    })
}

/// Merge one level's scan into its listed ids.
///
/// Found pages win where they overlap a listed id, listed ids the scan never reached are
/// kept. A level never ends up with fewer ids than it listed. Entries carrying bytes came
/// from the scan and still need to be written.
pub fn merge_level(listed: Vec<PageId>, found: Vec<Found>) -> Vec<(PageId, Option<Vec<u8>>)> {
    let overlaps = |id: &PageId| {
        found.iter().any(|f| {
            id.offset < f.id.offset + f.id.length && f.id.offset < id.offset + id.length
        })
    };

    let kept: Vec<PageId> = listed.iter().filter(|id| !overlaps(id)).cloned().collect();
    if found.len() + kept.len() < listed.len() {
        warn!(
            "scan found {} pages where {} are listed, keeping the listed ones",
            found.len(),
            listed.len()
        );
        return listed.into_iter().map(|id| (id, None)).collect();
    }

    let mut merged: Vec<(PageId, Option<Vec<u8>>)> = found
        .into_iter()
        .map(|f| (f.id, Some(f.bytes)))
        .chain(kept.into_iter().map(|id| (id, None)))
        .collect();
    merged.sort_by_key(|(id, _)| id.offset);
    merged
}
