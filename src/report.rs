use crate::{
    document::{Attempt, AttemptOutcome, Document, DocumentStatus},
    error::DocumentError,
    util::now_rfc3339,
};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Destination of the human-readable conversion log.
pub trait LogSink: Send {
    fn write_line(&mut self, line: &str) -> std::io::Result<()>;
}

/// Appends lines to any writer, flushing after each so the log survives a crash.
pub struct WriterSink<W: Write + Send>(BufWriter<W>);

impl<W: Write + Send> WriterSink<W> {
    pub fn new(w: W) -> Self {
        Self(BufWriter::new(w))
    }
}

impl WriterSink<std::fs::File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("create conversion log: {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> LogSink for WriterSink<W> {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.0, "{line}")?;
        self.0.flush()
    }
}

/// In-memory sink; clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<String>>>);

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("memory sink poisoned"))?
            .push(line.to_string());
        Ok(())
    }
}

pub struct NullSink;

impl LogSink for NullSink {
    fn write_line(&mut self, _line: &str) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReport {
    pub generated_at: String,
    pub total_documents: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    /// Never started, or abandoned by a forced stop.
    pub pending: usize,
    pub total_pages: u64,
    pub method_successes: BTreeMap<String, usize>,
    pub failures: Vec<String>,
    pub documents: Vec<Document>,
}

impl ConversionReport {
    /// True when nothing needs manual intervention.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.pending == 0
    }
}

/// Collects finished documents and writes the attempt log.
///
/// Safe to share across threads; every write is serialized by a mutex.
pub struct Reporter {
    sink: Mutex<Box<dyn LogSink>>,
    documents: Mutex<Vec<Document>>,
}

impl Reporter {
    pub fn new(sink: Box<dyn LogSink>) -> Self {
        Self {
            sink: Mutex::new(sink),
            documents: Mutex::new(Vec::new()),
        }
    }

    pub fn record_attempt(&self, doc: &Document, attempt: &Attempt) {
        let line = format!(
            "{} | {} | {}:{} | {} | {}ms{}",
            attempt.finished_at,
            doc.file.display(),
            attempt.rank,
            attempt.method,
            attempt.outcome.as_str(),
            attempt.duration_ms,
            attempt
                .detail
                .as_deref()
                .map(|d| format!(" | {d}"))
                .unwrap_or_default()
        );
        match attempt.outcome {
            AttemptOutcome::Success => info!(
                file = %doc.file.display(),
                method = %attempt.method,
                ms = attempt.duration_ms,
                "attempt succeeded"
            ),
            outcome => warn!(
                file = %doc.file.display(),
                method = %attempt.method,
                outcome = outcome.as_str(),
                ms = attempt.duration_ms,
                detail = attempt.detail.as_deref().unwrap_or(""),
                "attempt failed"
            ),
        }
        self.write(&line);
    }

    /// Takes ownership of a finalized document.
    pub fn finish(&self, doc: Document) {
        match doc.status {
            DocumentStatus::Failed => {
                let err = exhausted(&doc);
                error!("{err}");
                self.write(&format!("FAILED | {err}"));
            }
            DocumentStatus::Partial => self.write(&format!(
                "PARTIAL | {} | {} | {} of {} expected page(s)",
                doc.file.display(),
                doc.pages.first().map(|p| p.method.as_str()).unwrap_or("-"),
                doc.page_count,
                doc.expected_pages.unwrap_or(doc.page_count)
            )),
            DocumentStatus::Succeeded => self.write(&format!(
                "DONE | {} | {} page(s)",
                doc.file.display(),
                doc.page_count
            )),
            DocumentStatus::Pending => self.write(&format!(
                "SKIPPED | {} | batch cancelled",
                doc.file.display()
            )),
        }
        match self.documents.lock() {
            Ok(mut docs) => docs.push(doc),
            Err(poisoned) => poisoned.into_inner().push(doc),
        }
    }

    /// Snapshot of everything recorded so far, documents sorted by path.
    pub fn report(&self) -> ConversionReport {
        let mut documents = match self.documents.lock() {
            Ok(docs) => docs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        documents.sort_by(|a, b| a.file.cmp(&b.file));

        let count = |s: DocumentStatus| documents.iter().filter(|d| d.status == s).count();
        let mut method_successes = BTreeMap::new();
        for doc in &documents {
            if let Some(a) = doc.successful_attempt() {
                *method_successes.entry(a.method.clone()).or_insert(0) += 1;
            }
        }
        let failures = documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Failed)
            .map(|d| exhausted(d).to_string())
            .collect();

        ConversionReport {
            generated_at: now_rfc3339(),
            total_documents: documents.len(),
            succeeded: count(DocumentStatus::Succeeded),
            partial: count(DocumentStatus::Partial),
            failed: count(DocumentStatus::Failed),
            pending: count(DocumentStatus::Pending),
            total_pages: documents.iter().map(|d| d.page_count as u64).sum(),
            method_successes,
            failures,
            documents,
        }
    }

    /// Writes the JSON summary and, when given, the failure list.
    pub fn write_artifacts(
        &self,
        summary_path: Option<&Path>,
        failures_path: Option<&Path>,
    ) -> Result<ConversionReport> {
        let report = self.report();
        if let Some(path) = summary_path {
            let json = serde_json::to_string_pretty(&report)?;
            std::fs::write(path, json)
                .with_context(|| format!("write report: {}", path.display()))?;
        }
        if let Some(path) = failures_path {
            let mut body = report.failures.join("\n");
            if !body.is_empty() {
                body.push('\n');
            }
            std::fs::write(path, body)
                .with_context(|| format!("write failure list: {}", path.display()))?;
        }
        Ok(report)
    }

    fn write(&self, line: &str) {
        let result = self
            .sink
            .lock()
            .map_err(|_| anyhow!("log sink poisoned"))
            .and_then(|mut s| s.write_line(line).map_err(Into::into));
        if let Err(err) = result {
            warn!("conversion log write failed: {err:#}");
        }
    }
}

fn exhausted(doc: &Document) -> DocumentError {
    DocumentError::Exhausted {
        file: doc.file.clone(),
        attempts: doc.attempts.len(),
        last: doc
            .attempts
            .last()
            .and_then(|a| a.detail.clone())
            .unwrap_or_else(|| "no attempts recorded".to_string()),
    }
}
