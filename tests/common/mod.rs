#![allow(dead_code)]

use pdf_rasterize::{
    config::Config,
    engine::{AttemptResult, RenderTool},
    error::AttemptError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// A PNG-looking page whose body names the method that wrote it.
pub fn page_bytes(method: &str) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(method.as_bytes());
    bytes.resize(2048, b'.');
    bytes
}

/// Minimal PDF-shaped file. With `pages > 0` it carries a catalog and a page
/// tree whose `/Count` the probe reports as the page hint.
pub fn write_pdf(dir: &Path, name: &str, pages: u32) -> PathBuf {
    write_pdf_with(dir, name, pages, "")
}

/// Like [`write_pdf`], appending `extra` raw objects before the trailer.
pub fn write_pdf_with(dir: &Path, name: &str, pages: u32, extra: &str) -> PathBuf {
    let mut body = String::from("%PDF-1.4\n");
    if pages > 0 {
        let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 10)).collect();
        body.push_str("1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        body.push_str(&format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {pages} >> endobj\n",
            kids.join(" ")
        ));
        for i in 0..pages {
            body.push_str(&format!("{} 0 obj << /Type /Page /Parent 2 0 R >> endobj\n", i + 10));
        }
    }
    body.push_str(extra);
    if pages > 0 {
        body.push_str("trailer << /Root 1 0 R >>\n");
    }
    body.push_str("%%EOF\n");
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Defaults with every path under `root` and small verification floor.
pub fn test_config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.out_dir = root.join("out").display().to_string();
    cfg.paths.work_dir = root.join("work").display().to_string();
    cfg.limits.min_page_file_size_bytes = 64;
    cfg.logging.write_to_file = false;
    cfg
}

#[derive(Clone)]
pub enum Behavior {
    /// Writes `n` valid pages and exits 0.
    Pages(u32),
    /// Exits non-zero without output.
    Exit(i32),
    /// Exits 0, but page 1 is empty.
    ZeroBytePage(u32),
    /// Exits 0 with pages 1 and 3 only.
    Gap,
    /// Reports a timeout.
    Timeout,
    /// Binary not found.
    Missing,
}

pub struct FakeTool {
    name: String,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    hook: Option<Box<dyn Fn() + Send + Sync>>,
    fails_on: Vec<String>,
}

impl FakeTool {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            hook: None,
            fails_on: Vec::new(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Runs `f` inside every attempt.
    pub fn on_attempt(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(f));
        self
    }

    /// Exits 1 instead of following `behavior` when given this file name.
    pub fn failing_on(mut self, file_name: &str) -> Self {
        self.fails_on.push(file_name.to_string());
        self
    }

    fn write_page(&self, work_dir: &Path, index: u32, bytes: &[u8]) {
        std::fs::write(work_dir.join(format!("page-{index:03}.png")), bytes).unwrap();
    }
}

impl RenderTool for FakeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn attempt(&self, pdf: &Path, work_dir: &Path, timeout: Duration) -> AttemptResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook();
        }
        let file_name = pdf.file_name().map(|n| n.to_string_lossy().into_owned());
        let behavior = match file_name {
            Some(n) if self.fails_on.contains(&n) => Behavior::Exit(1),
            _ => self.behavior.clone(),
        };
        let ok = |stderr: &str| AttemptResult {
            exit_code: Some(0),
            stderr_excerpt: stderr.to_string(),
            produced_files: Vec::new(),
            error: None,
        };
        match &behavior {
            Behavior::Pages(n) => {
                for i in 1..=*n {
                    self.write_page(work_dir, i, &page_bytes(&self.name));
                }
                ok("")
            }
            Behavior::Exit(code) => AttemptResult {
                exit_code: Some(*code),
                stderr_excerpt: "**** Error: cannot find trailer".to_string(),
                produced_files: Vec::new(),
                error: Some(AttemptError::ToolExit {
                    tool: self.name.clone(),
                    code: Some(*code),
                }),
            },
            Behavior::ZeroBytePage(n) => {
                self.write_page(work_dir, 1, b"");
                for i in 2..=*n {
                    self.write_page(work_dir, i, &page_bytes(&self.name));
                }
                ok("")
            }
            Behavior::Gap => {
                self.write_page(work_dir, 1, &page_bytes(&self.name));
                self.write_page(work_dir, 3, &page_bytes(&self.name));
                ok("")
            }
            Behavior::Timeout => {
                // Partial output a killed tool may leave behind.
                self.write_page(work_dir, 1, &page_bytes(&self.name));
                AttemptResult::failed(AttemptError::Timeout {
                    tool: self.name.clone(),
                    timeout,
                })
            }
            Behavior::Missing => AttemptResult::failed(AttemptError::ToolInvocation {
                tool: self.name.clone(),
                exe: format!("/nonexistent/{}", self.name),
                detail: "No such file or directory (os error 2)".to_string(),
            }),
        }
    }
}

pub fn ladder(tools: Vec<FakeTool>) -> Vec<Box<dyn RenderTool>> {
    tools
        .into_iter()
        .map(|t| Box::new(t) as Box<dyn RenderTool>)
        .collect()
}

/// Sorted page file names in `dir`.
pub fn page_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("page-"))
        .collect();
    names.sort();
    names
}
