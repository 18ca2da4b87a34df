use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, error, info};
use rayon::ThreadPoolBuilder;

use ecore::descriptor::{ChunkAddress, Descriptor, DescriptorError};

use crate::context::{Context, Layout};
use crate::error::Error;
use crate::progress::{ChunkKind, ProgressStore};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

#[derive(Default)]
struct Tally {
    fetched: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicBool,
}

impl Tally {
    fn report(&self) -> FetchReport {
        FetchReport {
            fetched: self.fetched.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
        }
    }
}

/// Fetch every level header, then every content chunk, skipping what the progress store
/// already has.
pub fn fetch_all(
    ctx: &Context,
    descriptor: &Descriptor,
    layout: &Layout,
    store: &ProgressStore,
) -> Result<FetchReport, Error> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(ctx.config.download_workers.max(1))
        .thread_name(|i| format!("fetch-{}", i))
        .build()?;
    let tally = Tally::default();

    info!("Downloading {} level headers", descriptor.level_count());
    pool.scope(|s| {
        for level in 1..=descriptor.level_count() {
            let tally = &tally;
            s.spawn(move |_| {
                let address = descriptor.header_address(level);
                fetch_one(ctx, layout, store, tally, ChunkKind::Header, level, address)
            });
        }
    });

    info!("Downloading {} pages", descriptor.page_count());
    pool.scope(|s| {
        for page in 1..=descriptor.page_count() {
            let tally = &tally;
            s.spawn(move |_| {
                let address = descriptor.content_address(page);
                fetch_one(ctx, layout, store, tally, ChunkKind::Content, page, address)
            });
        }
    });

    let report = tally.report();
    debug!("progress now {:?}", store.snapshot());
    info!(
        "download: {} fetched, {} cached, {} failed",
        report.fetched, report.skipped, report.failed
    );
    Ok(report)
}

fn fetch_one(
    ctx: &Context,
    layout: &Layout,
    store: &ProgressStore,
    tally: &Tally,
    kind: ChunkKind,
    index: u32,
    address: Result<ChunkAddress, DescriptorError>,
) {
    if ctx.cancel.is_cancelled() {
        tally.cancelled.store(true, Ordering::SeqCst);
        return;
    }

    if store.is_done(kind, index) {
        debug!("{:?} {} cached", kind, index);
        tally.skipped.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let what = match kind {
        ChunkKind::Header => "header",
        ChunkKind::Content => "page",
    };

    let res = address.map_err(Error::from).and_then(|address| {
        info!("Downloading {} {}: {}", what, index, address.url);
        let data = ctx.config.retry().get(ctx.remote, &address.url)?;
        fs::write(layout.fragment(&address.name), data)?;
        store.mark_done(kind, index)
    });

    match res {
        Ok(()) => {
            tally.fetched.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            error!("{} {} failed: {}", what, index, e);
            ctx.journal
                .record(&format!("download {} {} failed: {}", what, index, e));
            tally.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
