use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use log::{debug, info, warn};

use ecore::descriptor::{Descriptor, PageId, Payload};

use crate::context::{Context, Layout};
use crate::convert::{convert_all, Converter};
use crate::download::fetch_all;
use crate::error::Error;
use crate::probe::{merge_level, scan_level};
use crate::progress::{ChunkKind, ProgressStore};
use crate::reassemble::reassemble_all;

#[derive(Debug, PartialEq, Eq)]
pub enum Status {
    Complete,
    /// Some pages failed to rebuild or are declared but were never found.
    Partial { skipped: usize, missing: usize },
}

#[derive(Debug)]
pub struct Outcome {
    pub code: String,
    pub name: String,
    pub dir: PathBuf,
    /// Page count the server declares.
    pub declared: u32,
    /// Pages with a rebuilt container.
    pub pages: Vec<u32>,
    pub skipped: Vec<u32>,
    /// Converted page files in page order, empty without a converter.
    pub converted: Vec<PathBuf>,
}

impl Outcome {
    pub fn status(&self) -> Status {
        let known = self.pages.len() + self.skipped.len();
        let missing = (self.declared as usize).saturating_sub(known);

        if self.skipped.is_empty() && missing == 0 {
            Status::Complete
        } else {
            Status::Partial {
                skipped: self.skipped.len(),
                missing,
            }
        }
    }
}

/// Full run for one document: describe, probe, download, rebuild and convert.
pub fn extract(
    ctx: &Context,
    blob: &str,
    scan: bool,
    converter: Option<&dyn Converter>,
) -> Result<Outcome, Error> {
    let fresh = Descriptor::parse(blob)?;
    let layout = Layout::new(&ctx.config.output_root, fresh.code());
    layout.create()?;

    let mut descriptor = load_or_cache(&layout, fresh)?;

    info!("Name: {}", descriptor.name());
    info!("Code: {}", descriptor.code());
    info!("Uploaded: {}", descriptor.upload_date());
    info!(
        "Pages: {} declared, {} listed, {} levels",
        descriptor.declared_pages(),
        descriptor.page_count(),
        descriptor.level_count()
    );
    if descriptor.is_free() {
        info!("{} is marked as freely downloadable", descriptor.code());
    }

    let store = ProgressStore::load(layout.progress());

    if descriptor.needs_scan() {
        if scan {
            descriptor = scan_all(ctx, &descriptor, &layout, &store)?;
            fs::write(layout.index(), descriptor.to_json()?)?;
        } else {
            warn!(
                "{} pages declared but only {} listed, enable scanning to look for the rest",
                descriptor.declared_pages(),
                descriptor.page_count()
            );
        }
    }

    let report = fetch_all(ctx, &descriptor, &layout, &store)?;
    if report.cancelled {
        return Err(Error::Cancelled);
    }
    if !report.is_complete() {
        return Err(Error::Incomplete {
            failed: report.failed,
        });
    }

    let rebuilt = reassemble_all(ctx, &descriptor, &layout)?;

    let converted = match converter {
        Some(converter) if !ctx.cancel.is_cancelled() => {
            let report = convert_all(ctx, converter, &layout, &rebuilt.written)?;
            report.converted.into_iter().map(|(_, path)| path).collect()
        }
        _ => Vec::new(),
    };

    Ok(Outcome {
        code: descriptor.code().to_string(),
        name: descriptor.name().to_string(),
        dir: layout.dir.clone(),
        declared: descriptor.declared_pages(),
        pages: rebuilt.written,
        skipped: rebuilt.skipped,
        converted,
    })
}

/// Prefer the cached payload, it may hold ids found by an earlier scan.
pub fn load_or_cache(layout: &Layout, fresh: Descriptor) -> Result<Descriptor, Error> {
    let path = layout.index();

    match fs::read_to_string(&path) {
        Ok(json) => match Descriptor::from_json(&json) {
            Ok(cached) => {
                debug!("using cached descriptor {}", path.display());
                return Ok(cached);
            }
            Err(e) => warn!("cached descriptor {} unusable, replacing: {}", path.display(), e),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
        Err(e) => return Err(e.into()),
    }

    fs::write(&path, fresh.to_json()?)?;
    Ok(fresh)
}

/// Probe every level and merge what turns up back into the page list.
///
/// Pages found on a level take the place of the listed ids they overlap, see `merge_level`.
/// Found pages are written and marked once their page number is known. The result is only
/// flagged as scanned when every level scanned to the end of its stream, so a run after a
/// failed or cut scan tries again.
pub fn scan_all(
    ctx: &Context,
    descriptor: &Descriptor,
    layout: &Layout,
    store: &ProgressStore,
) -> Result<Descriptor, Error> {
    // Page numbers shift, old content marks would point at the wrong chunks
    store.reset(ChunkKind::Content)?;

    let mut merged: Vec<PageId> = Vec::new();
    let mut clean = true;
    for level in 1..=descriptor.level_count() {
        let listed: Vec<PageId> = descriptor
            .pages()
            .iter()
            .filter(|p| p.level == level)
            .cloned()
            .collect();

        let found = match scan_level(ctx, descriptor, layout, store, level) {
            Ok(scan) => {
                clean &= !scan.truncated;
                scan.found
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!("level {} scan failed: {}", level, e);
                ctx.journal
                    .record(&format!("scanning level {} failed: {}", level, e));
                clean = false;
                Vec::new()
            }
        };

        for (id, bytes) in merge_level(listed, found) {
            let page = merged.len() as u32 + 1;
            if let Some(bytes) = bytes {
                let pk = descriptor.content_address_of(page, &id);
                fs::write(layout.fragment(&pk.name), &bytes)?;
                store.mark_done(ChunkKind::Content, page)?;
            }
            merged.push(id);
        }
    }

    info!(
        "scan: {} pages listed, {} declared, {} known now",
        descriptor.page_count(),
        descriptor.declared_pages(),
        merged.len()
    );

    let scanned = descriptor.with_pages(merged);
    if clean {
        Ok(scanned.mark_scanned())
    } else {
        warn!("scan incomplete, the next run scans again");
        Ok(scanned)
    }
}

/// Remove chunks, containers, converted pages and progress, keeps `index.json`.
pub fn clean(layout: &Layout) -> Result<usize, Error> {
    let mut removed = 0;

    for dir in [layout.swf_dir(), layout.pdf_dir()] {
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
            removed += 1;
        }
    }

    let progress = layout.progress();
    if progress.exists() {
        ProgressStore::load(&progress).clear()?;
        removed += 1;
    }

    let walker = WalkBuilder::new(&layout.dir)
        .max_depth(Some(1))
        .standard_filters(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("clean: {}", e);
                continue;
            }
        };
        if !entry.file_type().map_or(false, |ft| ft.is_file()) {
            continue;
        }

        let path = entry.path();
        if path.extension().map_or(false, |e| e == "ebt") {
            debug!("rm {}", path.display());
            fs::remove_file(path)?;
            removed += 1;
        }
    }

    info!("cleaned {}: {} entries", layout.dir.display(), removed);
    Ok(removed)
}

/// Write `<root>/indexs.json` mapping every cached document code to its name.
pub fn rebuild_index(root: &Path) -> Result<BTreeMap<String, String>, Error> {
    let mut index = BTreeMap::new();

    if root.is_dir() {
        let walker = WalkBuilder::new(root)
            .max_depth(Some(2))
            .standard_filters(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker.flatten() {
            if entry.depth() != 2 || entry.file_name() != "index.json" {
                continue;
            }

            let payload = fs::read_to_string(entry.path())
                .map_err(Error::from)
                .and_then(|json| Ok(serde_json::from_str::<Payload>(&json)?));
            match payload {
                Ok(p) => {
                    index.insert(p.code, p.name);
                }
                Err(e) => warn!("skipping {}: {}", entry.path().display(), e),
            }
        }
    } else {
        fs::create_dir_all(root)?;
    }

    fs::write(root.join("indexs.json"), serde_json::to_string_pretty(&index)?)?;
    info!("index: {} documents", index.len());
    Ok(index)
}

#[cfg(test)]
mod test_document {
    use super::*;
    use crate::convert::ConvertError;
    use crate::fixture::{Doc, Env};

    // Copies the container over as the "converted" page
    struct CopyOut;

    impl Converter for CopyOut {
        fn check(&self) -> Result<(), ConvertError> {
            Ok(())
        }

        fn convert(&self, container: &Path, out_dir: &Path) -> Result<PathBuf, ConvertError> {
            let stem = container.file_stem().unwrap().to_string_lossy().into_owned();
            let target = out_dir.join(format!("{}.pdf", stem));
            fs::copy(container, &target)?;
            Ok(target)
        }
    }

    #[test]
    fn three_pages() {
        let env = Env::new();
        let doc = Doc::new(&[3]);
        doc.serve(&env.remote);

        let outcome = extract(&env.ctx(), &doc.blob(&[0, 1, 2], 3), false, Some(&CopyOut)).unwrap();

        assert_eq!(outcome.code, "4471829");
        assert_eq!(outcome.name, "Sample Document");
        assert_eq!(outcome.pages, vec![1, 2, 3]);
        assert_eq!(outcome.status(), Status::Complete);

        let pdf = outcome.dir.join("pdf");
        assert_eq!(
            outcome.converted,
            vec![pdf.join("1.pdf"), pdf.join("2.pdf"), pdf.join("3.pdf")]
        );
        for page in 1..=3 {
            assert!(outcome.dir.join("swf").join(format!("{}.swf", page)).exists());
        }
        assert!(outcome.dir.join("index.json").exists());
    }

    #[test]
    fn undercount_is_scanned() {
        let env = Env::new();
        let doc = Doc::new(&[3]);
        doc.serve(&env.remote);

        // Three declared, two listed
        let blob = doc.blob(&[0, 1], 3);
        assert!(Descriptor::parse(&blob).unwrap().needs_scan());

        let outcome = extract(&env.ctx(), &blob, true, None).unwrap();
        assert_eq!(outcome.pages, vec![1, 2, 3]);
        assert_eq!(outcome.status(), Status::Complete);
        assert!(outcome.converted.is_empty());

        // Merged ids were cached
        let cached =
            Descriptor::from_json(&fs::read_to_string(outcome.dir.join("index.json")).unwrap())
                .unwrap();
        assert_eq!(cached.page_count(), 3);
        assert!(!cached.needs_scan());
        assert_eq!(cached.pages()[2], doc.pages[2].0);
    }

    #[test]
    fn undercount_without_scan() {
        let env = Env::new();
        let doc = Doc::new(&[3]);
        doc.serve(&env.remote);

        let outcome = extract(&env.ctx(), &doc.blob(&[0, 1], 3), false, None).unwrap();
        assert_eq!(outcome.pages, vec![1, 2]);
        assert_eq!(
            outcome.status(),
            Status::Partial {
                skipped: 0,
                missing: 1
            }
        );
    }

    #[test]
    fn failed_scan_is_retried() {
        let env = Env::new();
        let doc = Doc::new(&[3]);
        doc.serve(&env.remote);

        let d = doc.descriptor();
        let probe = d.probe_address(1).unwrap().url;
        env.remote.remove(&probe);

        let blob = doc.blob(&[0, 1], 3);
        let outcome = extract(&env.ctx(), &blob, true, None).unwrap();
        assert_eq!(outcome.pages, vec![1, 2]);
        assert_eq!(outcome.declared, 3);
        assert_eq!(
            outcome.status(),
            Status::Partial {
                skipped: 0,
                missing: 1
            }
        );

        // Cache still says three and still wants a scan
        let cached =
            Descriptor::from_json(&fs::read_to_string(outcome.dir.join("index.json")).unwrap())
                .unwrap();
        assert_eq!(cached.declared_pages(), 3);
        assert_eq!(cached.page_count(), 2);
        assert!(cached.needs_scan());

        // Level stream is back
        let stream: Vec<u8> = doc.pages.iter().flat_map(|(_, b)| b.clone()).collect();
        env.remote.insert(&probe, stream);

        let outcome = extract(&env.ctx(), &blob, true, None).unwrap();
        assert_eq!(outcome.pages, vec![1, 2, 3]);
        assert_eq!(outcome.status(), Status::Complete);

        let cached =
            Descriptor::from_json(&fs::read_to_string(outcome.dir.join("index.json")).unwrap())
                .unwrap();
        assert!(cached.scanned());
        assert!(!cached.needs_scan());
    }

    #[test]
    fn cut_scan_keeps_listed_pages() {
        let env = Env::new();
        let doc = Doc::new(&[3, 1]);
        doc.serve(&env.remote);

        // Level 1 fully listed, level 2 not at all
        let blob = doc.blob(&[0, 1, 2], 4);

        // Level 1 stream breaks off inside its second page
        let d = doc.descriptor();
        let mut stream = doc.pages[0].1.clone();
        stream.extend_from_slice(&doc.pages[1].1[..doc.pages[1].1.len() / 2]);
        env.remote.insert_cut(&d.probe_address(1).unwrap().url, stream);

        let outcome = extract(&env.ctx(), &blob, true, None).unwrap();
        assert_eq!(outcome.pages, vec![1, 2, 3, 4]);
        assert_eq!(outcome.status(), Status::Complete);

        let cached =
            Descriptor::from_json(&fs::read_to_string(outcome.dir.join("index.json")).unwrap())
                .unwrap();
        let ids: Vec<PageId> = doc.pages.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(cached.pages(), &ids[..]);
        assert!(!cached.scanned());
    }

    #[test]
    fn failed_scan_keeps_listed() {
        let env = Env::new();
        let doc = Doc::new(&[2, 1]);
        doc.serve(&env.remote);

        let d = doc.descriptor();
        env.remote.remove(&d.probe_address(2).unwrap().url);

        // Level 1 lists one of two, level 2 lists its only page
        let outcome = extract(&env.ctx(), &doc.blob(&[0, 2], 3), true, None).unwrap();
        assert_eq!(outcome.pages, vec![1, 2, 3]);
    }

    #[test]
    fn resume_fetches_nothing() {
        let env = Env::new();
        let doc = Doc::new(&[2]);
        doc.serve(&env.remote);
        let blob = doc.blob(&[0, 1], 2);

        extract(&env.ctx(), &blob, false, None).unwrap();
        let requests = env.remote.requests();

        let outcome = extract(&env.ctx(), &blob, false, None).unwrap();
        assert_eq!(outcome.status(), Status::Complete);
        assert_eq!(env.remote.requests(), requests);
    }

    #[test]
    fn incomplete_download() {
        let env = Env::new();
        let doc = Doc::new(&[3]);
        doc.serve(&env.remote);
        env.remote
            .remove(&doc.descriptor().content_address(3).unwrap().url);

        let res = extract(&env.ctx(), &doc.blob(&[0, 1, 2], 3), false, None);
        assert!(matches!(res, Err(Error::Incomplete { failed: 1 })));

        // Everything that did arrive is remembered
        let layout = Layout::new(&env.config.output_root, "4471829");
        let store = ProgressStore::load(layout.progress());
        assert!(store.is_done(ChunkKind::Content, 2));
        assert!(!layout.container(1).exists());
    }

    #[test]
    fn corrupt_chunk_is_partial() {
        let env = Env::new();
        let doc = Doc::new(&[3]);
        doc.serve(&env.remote);

        let d = doc.descriptor();
        let mut broken = doc.pages[1].1.clone();
        broken.truncate(40);
        env.remote.insert(&d.content_address(2).unwrap().url, broken);

        let outcome = extract(&env.ctx(), &doc.blob(&[0, 1, 2], 3), false, None).unwrap();
        assert_eq!(outcome.pages, vec![1, 3]);
        assert_eq!(
            outcome.status(),
            Status::Partial {
                skipped: 1,
                missing: 0
            }
        );
    }

    #[test]
    fn bad_blob() {
        let env = Env::new();
        assert!(matches!(
            extract(&env.ctx(), "not a descriptor!", false, None),
            Err(Error::Descriptor(_))
        ));
    }

    #[test]
    fn clean_keeps_index() {
        let env = Env::new();
        let doc = Doc::new(&[2]);
        doc.serve(&env.remote);

        let outcome = extract(&env.ctx(), &doc.blob(&[0, 1], 2), false, Some(&CopyOut)).unwrap();
        let layout = Layout::new(&env.config.output_root, &outcome.code);

        // 2 dirs, 1 header, 2 pages, progress
        assert_eq!(clean(&layout).unwrap(), 6);

        let left: Vec<_> = fs::read_dir(&layout.dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(left, vec![std::ffi::OsString::from("index.json")]);
    }

    #[test]
    fn index() {
        let env = Env::new();
        let doc = Doc::new(&[1]);
        doc.serve(&env.remote);
        extract(&env.ctx(), &doc.blob(&[0], 1), false, None).unwrap();

        let root = &env.config.output_root;
        fs::create_dir_all(root.join("junk")).unwrap();
        fs::write(root.join("junk").join("index.json"), b"{}").unwrap();

        let index = rebuild_index(root).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index["4471829"], "Sample Document");

        let written: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(root.join("indexs.json")).unwrap()).unwrap();
        assert_eq!(written, index);
    }
}
