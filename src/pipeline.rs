use crate::{
    batch_plan::{BatchPlan, PageRange},
    compressor::{CompressionResult, PageCompressor, PageTask},
    config::Config,
    error::PageError,
    merger::{self, MergeOutcome},
    metadata::MetadataReader,
    pdf::PdfDocument,
    preflight::{self, InputProbe},
    report::{MergeReport, RunReport},
    stats::{BatchStatistics, DocumentStatistics, PageFailure, Summary},
    thumbnail::Thumbnailer,
    tools::ToolRunner,
    util::{ensure_dir, now_rfc3339, page_file_name, write_atomic},
};
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, LazyLock};
use tempfile::TempDir;
use tracing::{debug, info, warn};

pub const ORIGINAL_METADATA_FILE: &str = "original_pdf_metadata.txt";
pub const COMPRESSED_METADATA_FILE: &str = "compressed_pdf_metadata.txt";
pub const REPORT_FILE: &str = "report.json";

static THUMB_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^page_\d+_thumb\.jpg$").expect("static regex"));

pub struct Pipeline<R: ToolRunner> {
    cfg: Config,
    runner: R,
    thumbnailer: Option<Box<dyn Thumbnailer>>,
    metadata: Option<Box<dyn MetadataReader>>,
}

pub struct JobOutput {
    pub summary: Summary,
    pub report: RunReport,
    pub final_path: Option<PathBuf>,
}

/// Result of compressing every page of a document.
pub struct DocumentRun {
    pub plan: BatchPlan,
    pub stats: DocumentStatistics,
    pub pages: Vec<CompressionResult>,
}

type PageOutcome = std::result::Result<CompressionResult, PageError>;

impl<R: ToolRunner> Pipeline<R> {
    pub fn new(cfg: &Config, runner: R) -> Self {
        Self {
            cfg: cfg.clone(),
            runner,
            thumbnailer: None,
            metadata: None,
        }
    }

    pub fn with_thumbnailer(mut self, t: Box<dyn Thumbnailer>) -> Self {
        self.thumbnailer = Some(t);
        self
    }

    pub fn with_metadata(mut self, m: Box<dyn MetadataReader>) -> Self {
        self.metadata = Some(m);
        self
    }

    fn thumbnailer(&self) -> Option<&dyn Thumbnailer> {
        if self.cfg.global.thumbnails {
            self.thumbnailer.as_deref()
        } else {
            None
        }
    }

    fn metadata_reader(&self) -> Option<&dyn MetadataReader> {
        if self.cfg.global.metadata {
            self.metadata.as_deref()
        } else {
            None
        }
    }

    /// Compresses `input` end to end: pages, merge, metadata, report.
    pub fn run_job(&self, input: &Path) -> Result<JobOutput> {
        self.cfg.validate()?;
        let (probe, doc) = preflight::probe_input(&self.cfg, input)?;
        info!(
            "input {} pages={} bytes={}",
            probe.path, probe.page_count, probe.file_bytes
        );

        let out_dir = self.cfg.out_dir();
        let pages_dir = self.cfg.pages_dir();
        ensure_dir(&out_dir)?;
        ensure_dir(&pages_dir)?;
        if self.thumbnailer().is_some() {
            ensure_dir(&self.cfg.thumbnails_dir())?;
        }
        clear_stale_pages(&pages_dir)?;
        clear_stale_thumbnails(&self.cfg.thumbnails_dir())?;

        if let Some(reader) = self.metadata_reader() {
            write_metadata(reader, input, &out_dir.join(ORIGINAL_METADATA_FILE));
        }

        let run = self.run_document(&doc, &probe)?;
        drop(doc);

        let mut merge_report = None;
        let mut final_path = None;
        if self.cfg.global.merge {
            let dest = out_dir.join(compressed_file_name(input));
            let outcome = self.merge_into(input, &pages_dir, probe.page_count, &dest)?;
            if let Some(reader) = self.metadata_reader() {
                write_metadata(reader, &dest, &out_dir.join(COMPRESSED_METADATA_FILE));
            }
            merge_report = Some(MergeReport {
                output: dest.display().to_string(),
                bytes: outcome.bytes.len() as u64,
                kept_original: outcome.kept_original(),
                fallback: outcome.fallback,
            });
            final_path = Some(dest);
        } else if self.metadata_reader().is_some() {
            info!("merge disabled; no compressed document to read metadata from");
        }

        if !self.cfg.global.keep_pages {
            match std::fs::remove_dir_all(&pages_dir) {
                Ok(()) => debug!("removed {}", pages_dir.display()),
                Err(e) => warn!("could not remove {}: {e}", pages_dir.display()),
            }
        }

        let summary = run
            .stats
            .summary(merge_report.as_ref().map(|m| m.bytes));
        let report = RunReport {
            input: probe,
            started: run.stats.started_at.clone(),
            finished: now_rfc3339(),
            plan: run.plan,
            summary: summary.clone(),
            pages: run.pages,
            failed_pages: run.stats.failures.clone(),
            merge: merge_report,
        };

        if self.cfg.global.write_report_json {
            let path = out_dir.join(REPORT_FILE);
            write_atomic(&path, serde_json::to_string_pretty(&report)?.as_bytes())
                .with_context(|| format!("writing {}", path.display()))?;
        }

        Ok(JobOutput {
            summary,
            report,
            final_path,
        })
    }

    /// Compresses every page in sequential batches of bounded parallelism.
    pub fn run_document(&self, doc: &PdfDocument, probe: &InputProbe) -> Result<DocumentRun> {
        let plan = BatchPlan::from_page_count(probe.page_count, self.cfg.global.batch_size);
        let mut stats = DocumentStatistics::new(probe.page_count, probe.file_bytes);
        let mut pages = Vec::with_capacity(probe.page_count as usize);

        // Removed on drop, on every exit path.
        let temp = self.make_temp_dir()?;
        debug!("temp dir {}", temp.path().display());

        let total_batches = plan.batches.len();
        for (i, range) in plan.batches.iter().enumerate() {
            info!(
                "batch {}/{} pages {}-{}",
                i + 1,
                total_batches,
                range.start_page,
                range.end_page
            );
            let batch_dir = temp.path().join(format!("batch_{:04}", i + 1));
            ensure_dir(&batch_dir)?;

            let mut batch = BatchStatistics::default();
            let tasks = prepare_batch(doc, range, &batch_dir, &mut batch);
            self.run_batch(&tasks, &mut batch, &mut pages);

            if batch.pages == 0 && !batch.failures.is_empty() {
                let first = &batch.failures[0];
                return Err(anyhow!(
                    "every page of batch {} failed; aborting (page {}: {})",
                    i + 1,
                    first.page,
                    first.error
                ));
            }

            info!(
                "batch {}/{} done: {}/{} pages ok, {} -> {} bytes",
                i + 1,
                total_batches,
                batch.pages,
                batch.attempted(),
                batch.original_bytes,
                batch.compressed_bytes
            );
            if let Err(e) = std::fs::remove_dir_all(&batch_dir) {
                warn!("could not remove {}: {e}", batch_dir.display());
            }
            stats.absorb(batch);
        }

        pages.sort_by_key(|r| r.page);
        Ok(DocumentRun { plan, stats, pages })
    }

    /// At most `concurrency` pages in flight; this thread is the only one
    /// that touches `batch` and `results`.
    fn run_batch(
        &self,
        tasks: &[PageTask],
        batch: &mut BatchStatistics,
        results: &mut Vec<CompressionResult>,
    ) {
        if tasks.is_empty() {
            return;
        }
        let pages_dir = self.cfg.pages_dir();
        let thumbnails_dir = self.cfg.thumbnails_dir();
        let compressor = PageCompressor {
            tools: &self.cfg.tools.enabled,
            runner: &self.runner,
            thumbnailer: self.thumbnailer(),
            pages_dir: &pages_dir,
            thumbnails_dir: &thumbnails_dir,
        };
        let workers = self.cfg.global.concurrency.clamp(1, tasks.len());
        let cursor = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<PageOutcome>();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let compressor = &compressor;
                let cursor = &cursor;
                scope.spawn(move || {
                    loop {
                        let i = cursor.fetch_add(1, Ordering::SeqCst);
                        let Some(task) = tasks.get(i) else {
                            break;
                        };
                        if tx.send(compressor.compress_page(task)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let total = tasks.len();
            for (done, outcome) in rx.into_iter().enumerate() {
                match outcome {
                    Ok(result) => {
                        debug!("[{}/{}] page {} ok", done + 1, total, result.page);
                        batch.record(&result);
                        results.push(result);
                    }
                    Err(err) => {
                        warn!("[{}/{}] {err}", done + 1, total);
                        batch.record_failure(PageFailure {
                            page: err.page(),
                            error: err.to_string(),
                        });
                    }
                }
            }
        });
    }

    fn make_temp_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pdf-squeeze-");
        let dir = if self.cfg.paths.temp_parent.is_empty() {
            builder.tempdir()
        } else {
            let parent = Path::new(&self.cfg.paths.temp_parent);
            ensure_dir(parent)?;
            builder.tempdir_in(parent)
        };
        dir.with_context(|| "creating temp dir")
    }

    fn merge_into(
        &self,
        input: &Path,
        pages_dir: &Path,
        expected_pages: u32,
        dest: &Path,
    ) -> Result<MergeOutcome> {
        let outcome = merger::merge(pages_dir, input, expected_pages)?;
        write_atomic(dest, &outcome.bytes)
            .with_context(|| format!("writing {}", dest.display()))?;
        if outcome.kept_original() {
            warn!("{} is a copy of the original input", dest.display());
        } else {
            info!("wrote {} ({} bytes)", dest.display(), outcome.bytes.len());
        }
        Ok(outcome)
    }
}

/// Splits every page of `range` into its own private work dir. Pages that
/// cannot be split are recorded as failures and get no task.
fn prepare_batch(
    doc: &PdfDocument,
    range: &PageRange,
    batch_dir: &Path,
    batch: &mut BatchStatistics,
) -> Vec<PageTask> {
    let mut tasks = Vec::with_capacity(range.len() as usize);
    for page in range.pages() {
        match split_to_task(doc, page, batch_dir) {
            Ok(task) => tasks.push(task),
            Err(err) => {
                warn!("{err}");
                batch.record_failure(PageFailure {
                    page,
                    error: err.to_string(),
                });
            }
        }
    }
    tasks
}

fn split_to_task(doc: &PdfDocument, page: u32, batch_dir: &Path) -> std::result::Result<PageTask, PageError> {
    let work_dir = batch_dir.join(format!("page_{page:05}"));
    std::fs::create_dir_all(&work_dir).map_err(|e| PageError::fs(page, "creating work dir", e))?;
    let bytes = doc.split_page(page).map_err(|e| PageError::Split {
        page,
        message: format!("{e:#}"),
    })?;
    let input = work_dir.join(page_file_name(page));
    std::fs::write(&input, &bytes).map_err(|e| PageError::fs(page, "writing split page", e))?;
    Ok(PageTask {
        page,
        input,
        work_dir,
    })
}

/// Page files left by an earlier run would be merged into this one.
fn clear_stale_pages(pages_dir: &Path) -> Result<()> {
    for (_, path) in merger::list_page_files(pages_dir)? {
        std::fs::remove_file(&path).with_context(|| format!("removing stale {}", path.display()))?;
    }
    Ok(())
}

/// Thumbnails of pages the previous run had and this one may not.
fn clear_stale_thumbnails(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let entries = std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        let stale = entry
            .file_name()
            .to_str()
            .is_some_and(|name| THUMB_FILE.is_match(name));
        if stale {
            let path = entry.path();
            std::fs::remove_file(&path).with_context(|| format!("removing stale {}", path.display()))?;
        }
    }
    Ok(())
}

fn write_metadata(reader: &dyn MetadataReader, pdf: &Path, dest: &Path) {
    let res = reader
        .read_info(pdf)
        .and_then(|text| write_atomic(dest, text.as_bytes()).map_err(Into::into));
    match res {
        Ok(()) => debug!("wrote {}", dest.display()),
        Err(err) => warn!("metadata for {} failed: {err:#}", pdf.display()),
    }
}

/// `<stem>_compressed.pdf` for the given input path.
pub fn compressed_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    format!("{stem}_compressed.pdf")
}
