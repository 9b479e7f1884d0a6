use crate::{
    config::Config,
    document::{Document, DocumentStatus},
    engine::process,
    pipeline::Pipeline,
    report::Reporter,
    util::{ensure_dir, remove_dir_if_empty},
};
use anyhow::{Context, Result, anyhow, bail};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{info, warn};

const RUNNING: u8 = 0;
const GRACEFUL: u8 = 1;
const FORCED: u8 = 2;

/// Stop request shared between the runners and whoever asks them to stop.
///
/// A graceful stop is honoured between documents, so the attempt in flight
/// finishes. A forced stop also abandons the document in flight: its tool
/// is killed and its work directory deleted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicU8>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.fetch_max(GRACEFUL, Ordering::SeqCst);
    }

    pub fn force(&self) {
        self.0.store(FORCED, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst) >= GRACEFUL
    }

    pub fn is_forced(&self) -> bool {
        self.0.load(Ordering::SeqCst) >= FORCED
    }

    /// First call requests a graceful stop. Any later call forces one and
    /// kills every tool process group still running. Returns true once forced.
    pub fn escalate(&self) -> bool {
        if self.0.fetch_max(GRACEFUL, Ordering::SeqCst) == RUNNING {
            return false;
        }
        self.force();
        process::kill_active_groups();
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
    /// Documents left untouched because the batch was cancelled.
    pub skipped: usize,
}

impl BatchOutcome {
    fn absorb(&mut self, other: BatchOutcome) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// `*.pdf` files directly inside `dir` (extension matched case-insensitively),
/// sorted by path.
pub fn discover_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("read input dir: {}", dir.display()))?;
    let mut inputs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

/// One pending [`Document`] per input, each with output directory
/// `<out_root>/<stem>`. Two inputs sharing a stem would share an output
/// directory, so that is rejected up front.
pub fn plan_documents(inputs: &[PathBuf], out_root: &Path) -> Result<Vec<Document>> {
    let out_root = std::path::absolute(out_root)
        .with_context(|| format!("resolve out dir: {}", out_root.display()))?;
    let mut by_stem: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut docs = Vec::with_capacity(inputs.len());

    for input in inputs {
        let file = std::path::absolute(input)
            .with_context(|| format!("resolve input: {}", input.display()))?;
        let mut doc = Document::new(file.clone(), PathBuf::new());
        let stem = doc.stem();
        if let Some(prev) = by_stem.insert(stem.clone(), file.clone()) {
            bail!(
                "inputs {} and {} would both write to {}",
                prev.display(),
                file.display(),
                out_root.join(&stem).display()
            );
        }
        doc.output_dir = out_root.join(stem);
        docs.push(doc);
    }
    Ok(docs)
}

/// Fails fast when the output root can't be created or written.
pub fn check_out_root(out_root: &Path) -> Result<()> {
    ensure_dir(out_root)?;
    let marker = out_root.join(".pdf-rasterize-write-test");
    std::fs::write(&marker, b"ok")
        .with_context(|| format!("output root is not writable: {}", out_root.display()))?;
    std::fs::remove_file(&marker).ok();
    Ok(())
}

/// Round-robin split into at most `n` disjoint, non-empty partitions.
pub fn partition(docs: Vec<Document>, n: usize) -> Vec<Vec<Document>> {
    let n = n.max(1).min(docs.len().max(1));
    let mut parts: Vec<Vec<Document>> = (0..n).map(|_| Vec::new()).collect();
    for (i, doc) in docs.into_iter().enumerate() {
        parts[i % n].push(doc);
    }
    parts.retain(|p| !p.is_empty());
    parts
}

pub struct JobRunner<'a> {
    pipeline: &'a Pipeline,
    reporter: &'a Reporter,
    cancel: CancelToken,
}

impl<'a> JobRunner<'a> {
    pub fn new(pipeline: &'a Pipeline, reporter: &'a Reporter) -> Self {
        Self {
            pipeline,
            reporter,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Converts `docs` strictly one after another. Every document is handed to
    /// the reporter exactly once, including those skipped by cancellation.
    pub fn run(&self, docs: Vec<Document>) -> Result<BatchOutcome> {
        let total = docs.len();
        let mut outcome = BatchOutcome::default();
        let mut docs = docs.into_iter().enumerate();

        while let Some((i, mut doc)) = docs.next() {
            if self.cancel.is_cancelled() {
                warn!("batch cancelled; {} document(s) not started", total - i);
                outcome.skipped += 1;
                self.reporter.finish(doc);
                for (_, rest) in docs.by_ref() {
                    outcome.skipped += 1;
                    self.reporter.finish(rest);
                }
                break;
            }

            info!("[{}/{}] {}", i + 1, total, doc.file.display());
            self.pipeline
                .convert_with_cancel(&mut doc, self.reporter, &self.cancel)?;
            if doc.status == DocumentStatus::Pending {
                // Abandoned by a forced stop.
                outcome.skipped += 1;
                self.reporter.finish(doc);
                continue;
            }
            outcome.processed += 1;
            if doc.status == DocumentStatus::Failed {
                outcome.failed += 1;
            }
            self.reporter.finish(doc);
        }
        Ok(outcome)
    }

    /// Opt-in: splits `docs` into `parallelism` disjoint partitions and runs a
    /// sequential runner over each on its own thread. `parallelism <= 1` is the
    /// same as [`JobRunner::run`].
    pub fn run_partitioned(&self, docs: Vec<Document>, parallelism: usize) -> Result<BatchOutcome> {
        if parallelism <= 1 || docs.len() <= 1 {
            return self.run(docs);
        }
        let parts = partition(docs, parallelism);
        info!("running {} partition(s) in parallel", parts.len());

        std::thread::scope(|scope| {
            let handles: Vec<_> = parts
                .into_iter()
                .map(|part| {
                    scope.spawn(move || {
                        let result = self.run(part);
                        if result.is_err() {
                            // Stop the other partitions at their next document boundary.
                            self.cancel.cancel();
                        }
                        result
                    })
                })
                .collect();

            let mut total = BatchOutcome::default();
            let mut first_err = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(o)) => total.absorb(o),
                    Ok(Err(err)) => {
                        first_err.get_or_insert(err);
                    }
                    Err(_) => {
                        self.cancel.cancel();
                        first_err.get_or_insert(anyhow!("runner thread panicked"));
                    }
                }
            }
            match first_err {
                Some(err) => Err(err),
                None => Ok(total),
            }
        })
    }
}

/// Full batch over every PDF in `input_dir`.
pub fn run_batch(
    cfg: &Config,
    pipeline: &Pipeline,
    reporter: &Reporter,
    input_dir: &Path,
    out_root: &Path,
    cancel: CancelToken,
) -> Result<BatchOutcome> {
    let inputs = discover_inputs(input_dir)?;
    if inputs.is_empty() {
        warn!("no PDFs found in {}", input_dir.display());
    }
    run_inputs(cfg, pipeline, reporter, &inputs, out_root, cancel)
}

/// Plans and converts an explicit list of inputs into `out_root`.
pub fn run_inputs(
    cfg: &Config,
    pipeline: &Pipeline,
    reporter: &Reporter,
    inputs: &[PathBuf],
    out_root: &Path,
    cancel: CancelToken,
) -> Result<BatchOutcome> {
    check_out_root(out_root)?;
    let docs = plan_documents(inputs, out_root)?;
    info!("{} document(s) queued", docs.len());

    let runner = JobRunner::new(pipeline, reporter).with_cancel(cancel);
    let outcome = runner.run_partitioned(docs, cfg.global.max_parallel_documents)?;
    remove_dir_if_empty(pipeline.work_root())?;
    Ok(outcome)
}
