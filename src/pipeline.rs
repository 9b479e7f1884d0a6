use crate::{
    batch::CancelToken,
    config::Config,
    document::{Attempt, AttemptOutcome, Document, DocumentStatus, Page},
    engine::{self, RenderTool, ToolDiag},
    error::AttemptError,
    probe,
    report::Reporter,
    util::{
        ensure_dir, hash_file, move_file, now_rfc3339, remove_dir_if_empty, reset_dir, sha256_hex,
    },
    verify::{self, VerifiedPage, VerifyOptions, page_file_name, parse_page_index},
};
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives the fallback ladder for one document at a time.
///
/// Each method gets a fresh, empty work directory. The first attempt whose
/// output verifies completely wins and its pages are moved into the
/// document's output directory. A render that verifies but falls short of the
/// probe's page hint is held back while later methods try for a complete one,
/// and becomes a `partial` result only if none succeeds. Pages always come
/// from a single method.
pub struct Pipeline {
    cfg: Config,
    tools: Vec<Box<dyn RenderTool>>,
    work_root: PathBuf,
}

impl Pipeline {
    pub fn new(cfg: &Config) -> Result<Self> {
        Self::with_tools(cfg, engine::ladder(cfg))
    }

    pub fn with_tools(cfg: &Config, tools: Vec<Box<dyn RenderTool>>) -> Result<Self> {
        if tools.is_empty() {
            bail!("fallback ladder has no methods");
        }
        let work_root = std::path::absolute(&cfg.paths.work_dir)
            .with_context(|| format!("resolve work_dir: {}", cfg.paths.work_dir))?;
        Ok(Self {
            cfg: cfg.clone(),
            tools,
            work_root,
        })
    }

    pub fn methods(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    pub fn diagnose(&self) -> Vec<ToolDiag> {
        self.tools.iter().flat_map(|t| t.diagnose()).collect()
    }

    /// Per-document scratch directory. Keyed by input and destination as
    /// well as stem, so runs sharing a `work_dir` never touch each other's
    /// attempts.
    pub fn work_dir_for(&self, doc: &Document) -> PathBuf {
        let key = sha256_hex(format!("{}:{}", doc.file.display(), doc.output_dir.display()).as_bytes());
        self.work_root.join(format!("{}-{}", doc.stem(), &key[..12]))
    }

    /// Runs the ladder on `doc` and finalizes its status.
    ///
    /// Method failures never surface here; they are recorded as attempts. An
    /// `Err` means the environment is broken (work or output directory not
    /// writable) and the batch should stop.
    pub fn convert(&self, doc: &mut Document, reporter: &Reporter) -> Result<()> {
        self.convert_with_cancel(doc, reporter, &CancelToken::default())
    }

    /// Like [`Pipeline::convert`], but a forced cancellation abandons the
    /// document: the in-flight attempt's work directory is deleted and the
    /// document stays `pending`.
    pub fn convert_with_cancel(
        &self,
        doc: &mut Document,
        reporter: &Reporter,
        cancel: &CancelToken,
    ) -> Result<()> {
        if doc.is_finished() {
            bail!("document already processed: {}", doc.file.display());
        }
        info!("processing {} -> {}", doc.file.display(), doc.output_dir.display());

        self.preflight(doc);
        clear_stale_pages(&doc.output_dir)?;

        let doc_work = self.work_dir_for(doc);
        // Best verified-but-short render, accepted only if nothing completes.
        let mut best: Option<Candidate> = None;

        for (i, tool) in self.tools.iter().enumerate() {
            if cancel.is_forced() {
                break;
            }
            let rank = i + 1;
            let attempt_dir = doc_work.join(format!("{rank}-{}", tool.name()));
            reset_dir(&attempt_dir)?;

            let (attempt, verdict) = self.run_attempt(doc, rank, tool.as_ref(), &attempt_dir);
            reporter.record_attempt(doc, &attempt);
            doc.attempts.push(attempt);

            if cancel.is_forced() {
                warn!("{}: aborted during {}", doc.file.display(), tool.name());
                remove_tree(&attempt_dir)?;
                break;
            }

            match verdict {
                Verdict::Complete(pages) => {
                    self.accept(doc, tool.name(), pages)?;
                    remove_tree(&attempt_dir)?;
                    break;
                }
                Verdict::Short(pages) if !self.cfg.verify.require_expected_page_count => {
                    if best.as_ref().is_none_or(|b| pages.len() > b.pages.len()) {
                        let held = Candidate {
                            method: tool.name().to_string(),
                            dir: attempt_dir,
                            pages,
                        };
                        if let Some(prev) = best.replace(held) {
                            self.discard(&prev.dir)?;
                        }
                    } else {
                        self.discard(&attempt_dir)?;
                    }
                }
                _ => self.discard(&attempt_dir)?,
            }
        }

        if doc.status == DocumentStatus::Pending {
            match best.take() {
                Some(b) if !cancel.is_forced() => {
                    self.accept(doc, &b.method, b.pages)?;
                    remove_tree(&b.dir)?;
                }
                held => {
                    if let Some(b) = held {
                        remove_tree(&b.dir)?;
                    }
                    if !cancel.is_forced() {
                        doc.status = DocumentStatus::Failed;
                    }
                    remove_dir_if_empty(&doc.output_dir)?;
                }
            }
        }
        if let Some(b) = best {
            self.discard(&b.dir)?;
        }
        remove_dir_if_empty(&doc_work)?;
        Ok(())
    }

    /// Drops a rejected attempt's output unless intermediates are kept.
    fn discard(&self, dir: &Path) -> Result<()> {
        if self.cfg.global.keep_intermediates {
            debug!("keeping rejected attempt output in {}", dir.display());
            Ok(())
        } else {
            remove_tree(dir)
        }
    }

    fn preflight(&self, doc: &mut Document) {
        if self.cfg.probe.enabled {
            match probe::probe_pdf(&self.cfg, &doc.file) {
                Ok(p) => {
                    for w in p.warnings() {
                        warn!("{}: {w}", doc.file.display());
                    }
                    doc.expected_pages = p.page_hint;
                    doc.probe = Some(p);
                }
                Err(err) => warn!("probe failed for {}: {err:#}", doc.file.display()),
            }
        }
        match hash_file(&self.cfg, &doc.file) {
            Ok(h) => doc.input_sha256 = Some(h),
            Err(err) => warn!("hashing failed for {}: {err:#}", doc.file.display()),
        }
    }

    fn run_attempt(
        &self,
        doc: &Document,
        rank: usize,
        tool: &dyn RenderTool,
        attempt_dir: &Path,
    ) -> (Attempt, Verdict) {
        let timeout = self.cfg.method_timeout(tool.name());
        info!(
            "trying method {rank}/{} ({}) timeout={}s",
            self.tools.len(),
            tool.name(),
            timeout.as_secs()
        );

        let started_at = now_rfc3339();
        let clock = Instant::now();
        let result = tool.attempt(&doc.file, attempt_dir, timeout);
        debug!(
            "{} left {} file(s) in {}",
            tool.name(),
            result.produced_files.len(),
            attempt_dir.display()
        );

        let checked = match result.error {
            Some(err) => Err(err),
            None => self.check(attempt_dir),
        };
        let (outcome, detail, verdict) = match checked {
            Ok(pages) => match doc.expected_pages {
                Some(expected) if (pages.len() as u32) < expected => {
                    let err = AttemptError::Verification {
                        detail: format!("incomplete: {} of {expected} expected page(s)", pages.len()),
                    };
                    (err.outcome(), Some(err.to_string()), Verdict::Short(pages))
                }
                _ => (AttemptOutcome::Success, None, Verdict::Complete(pages)),
            },
            Err(err) => (err.outcome(), Some(err.to_string()), Verdict::Rejected),
        };

        let attempt = Attempt {
            method: tool.name().to_string(),
            rank,
            started_at,
            finished_at: now_rfc3339(),
            duration_ms: clock.elapsed().as_millis() as u64,
            exit_code: result.exit_code,
            outcome,
            stderr_excerpt: result.stderr_excerpt,
            detail,
        };
        (attempt, verdict)
    }

    fn check(&self, attempt_dir: &Path) -> Result<Vec<VerifiedPage>, AttemptError> {
        let opts = VerifyOptions {
            min_page_bytes: self.cfg.limits.min_page_file_size_bytes,
            check_image_header: self.cfg.verify.check_image_header,
        };
        let v = verify::verify(attempt_dir, opts).map_err(|e| AttemptError::Verification {
            detail: format!("{e:#}"),
        })?;
        if !v.complete {
            return Err(AttemptError::Verification { detail: v.summary() });
        }
        Ok(v.pages)
    }

    fn accept(&self, doc: &mut Document, method: &str, pages: Vec<VerifiedPage>) -> Result<()> {
        ensure_dir(&doc.output_dir)?;
        for p in pages {
            let dest = doc.output_dir.join(page_file_name(p.index));
            move_file(&p.path, &dest)?;
            doc.pages.push(Page {
                index: p.index,
                path: dest,
                method: method.to_string(),
                bytes: p.bytes,
            });
        }

        let produced = doc.pages.len() as u32;
        doc.page_count = produced;
        doc.status = match doc.expected_pages {
            Some(expected) if produced < expected => {
                warn!(
                    "{}: {method} rendered {produced} of {expected} expected page(s)",
                    doc.file.display()
                );
                DocumentStatus::Partial
            }
            _ => {
                doc.expected_pages = Some(produced);
                DocumentStatus::Succeeded
            }
        };
        info!(
            "{} -> {} page(s) via {method} ({:?})",
            doc.file.display(),
            produced,
            doc.status
        );
        Ok(())
    }
}

struct Candidate {
    method: String,
    dir: PathBuf,
    pages: Vec<VerifiedPage>,
}

/// How an attempt's output measured up.
enum Verdict {
    Complete(Vec<VerifiedPage>),
    /// Verified, but fewer pages than the probe's hint.
    Short(Vec<VerifiedPage>),
    Rejected,
}

fn remove_tree(dir: &Path) -> Result<()> {
    std::fs::remove_dir_all(dir).with_context(|| format!("remove {}", dir.display()))
}

/// Removes page images left in `dir` by an earlier run. Other files stay.
fn clear_stale_pages(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("read_dir {}", dir.display())),
    };
    for entry in entries {
        let entry = entry?;
        if parse_page_index(&entry.file_name().to_string_lossy()).is_some() {
            std::fs::remove_file(entry.path())
                .with_context(|| format!("remove stale page {}", entry.path().display()))?;
        }
    }
    Ok(())
}
