use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{info, warn};
use rayon::ThreadPoolBuilder;

use earc::container;
use ecore::descriptor::Descriptor;

use crate::context::{Context, Layout};
use crate::error::Error;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReassemblyReport {
    /// Pages with a container on disk, ascending.
    pub written: Vec<u32>,
    pub skipped: Vec<u32>,
    /// Pages expected to come out of this stage, skipped ones taken off.
    pub total: usize,
}

/// Rebuild the container of one page out of its level header and content chunk.
pub fn reassemble_page(
    descriptor: &Descriptor,
    layout: &Layout,
    page: u32,
) -> Result<PathBuf, Error> {
    let level = descriptor.level_of(page)?;

    let ph = fs::read(layout.fragment(&descriptor.header_address(level)?.name))?;
    let pk = fs::read(layout.fragment(&descriptor.content_address(page)?.name))?;

    let swf = container::reassemble(&ph, &pk)?;
    let path = layout.container(page);
    fs::write(&path, swf)?;
    Ok(path)
}

pub fn reassemble_all(
    ctx: &Context,
    descriptor: &Descriptor,
    layout: &Layout,
) -> Result<ReassemblyReport, Error> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(ctx.config.reassembly_workers.max(1))
        .thread_name(|i| format!("rebuild-{}", i))
        .build()?;

    let total = descriptor.page_count() as usize;
    let remaining = AtomicUsize::new(total);
    let written = Mutex::new(Vec::new());
    let skipped = Mutex::new(Vec::new());

    pool.scope(|s| {
        for page in 1..=descriptor.page_count() {
            let (remaining, written, skipped) = (&remaining, &written, &skipped);
            s.spawn(move |_| match reassemble_page(descriptor, layout, page) {
                Ok(path) => {
                    info!("Page {} -> {}", page, path.display());
                    written.lock().unwrap_or_else(|e| e.into_inner()).push(page);
                }
                Err(e) => {
                    warn!("Can't decompress page {}, skipping: {}", page, e);
                    ctx.journal
                        .record(&format!("reassembling page {} failed: {}", page, e));
                    remaining.fetch_sub(1, Ordering::SeqCst);
                    skipped.lock().unwrap_or_else(|e| e.into_inner()).push(page);
                }
            });
        }
    });

    let mut written = written.into_inner().unwrap_or_else(|e| e.into_inner());
    let mut skipped = skipped.into_inner().unwrap_or_else(|e| e.into_inner());
    written.sort_unstable();
    skipped.sort_unstable();

    let total = remaining.load(Ordering::SeqCst);
    info!("{} of {} pages rebuilt", total, descriptor.page_count());

    Ok(ReassemblyReport {
        written,
        skipped,
        total,
    })
}

#[cfg(test)]
mod test_reassemble {
    use super::*;
    use crate::download::fetch_all;
    use crate::fixture::{header_body, page_body, Doc, Env};
    use crate::progress::ProgressStore;
    use byteorder::{ByteOrder, LittleEndian};

    fn fetched(env: &Env, doc: &Doc) -> (Descriptor, Layout) {
        doc.serve(&env.remote);
        let d = doc.descriptor();
        let layout = env.layout(&d);
        let store = ProgressStore::load(layout.progress());
        assert!(fetch_all(&env.ctx(), &d, &layout, &store).unwrap().is_complete());
        (d, layout)
    }

    #[test]
    fn page_container() {
        let env = Env::new();
        let doc = Doc::new(&[1, 1]);
        let (d, layout) = fetched(&env, &doc);

        let path = reassemble_page(&d, &layout, 2).unwrap();
        assert_eq!(path, layout.container(2));

        let swf = fs::read(&path).unwrap();
        let header = header_body(2);
        let body = page_body(2);

        assert_eq!(swf.len(), header.len() + body.len() + 4);
        assert_eq!(&swf[..4], b"FWS\x0a");
        assert_eq!(LittleEndian::read_u32(&swf[4..8]) as usize, swf.len());
        assert_eq!(&swf[8..header.len()], &header[8..]);
        assert_eq!(&swf[header.len()..header.len() + body.len()], &body[..]);
        assert_eq!(&swf[swf.len() - 4..], &[64, 0, 0, 0]);

        // Same inputs, same bytes
        reassemble_page(&d, &layout, 2).unwrap();
        assert_eq!(fs::read(&path).unwrap(), swf);
    }

    #[test]
    fn corrupt_page_is_skipped() {
        let env = Env::new();
        let doc = Doc::new(&[3]);
        let (d, layout) = fetched(&env, &doc);

        let name = d.content_address(2).unwrap().name;
        let mut broken = fs::read(layout.fragment(&name)).unwrap();
        broken.truncate(broken.len() - 10);
        fs::write(layout.fragment(&name), broken).unwrap();

        let report = reassemble_all(&env.ctx(), &d, &layout).unwrap();
        assert_eq!(report.written, vec![1, 3]);
        assert_eq!(report.skipped, vec![2]);
        assert_eq!(report.total, 2);

        assert!(layout.container(1).exists());
        assert!(!layout.container(2).exists());
        assert!(layout.container(3).exists());
    }

    #[test]
    fn missing_fragment_is_skipped() {
        let env = Env::new();
        let doc = Doc::new(&[2]);
        let (d, layout) = fetched(&env, &doc);

        fs::remove_file(layout.fragment(&d.content_address(1).unwrap().name)).unwrap();

        let report = reassemble_all(&env.ctx(), &d, &layout).unwrap();
        assert_eq!(report.written, vec![2]);
        assert_eq!(report.skipped, vec![1]);
    }
}
