use crate::config::Config;
use anyhow::{Context, Result};
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::LazyLock;

static OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s-u)(\d+)\s+\d+\s+obj\b(.*?)endobj").expect("object pattern")
});
static ROOT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)/Root\s+(\d+)\s+\d+\s+R").expect("root pattern"));
static PAGES_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)/Pages\s+(\d+)\s+\d+\s+R").expect("pages pattern"));
static COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)/Count\s+(\d+)").expect("count pattern"));
static ENCRYPT_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Encrypt\b").expect("encrypt pattern"));

/// Cheap structural look at a PDF before any tool runs. Informational only:
/// malformed files still go through the whole ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub file_bytes: u64,
    pub has_pdf_header: bool,
    pub has_eof_marker: bool,
    pub encrypted: bool,
    /// `/Count` of the page tree reached from the last trailer's `/Root`.
    /// Absent when the file was too large to scan or the catalog lives in a
    /// compressed object stream. Informational; never decides success.
    pub page_hint: Option<u32>,
}

impl ProbeResult {
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut w = Vec::new();
        if !self.has_pdf_header {
            w.push("missing %PDF- header");
        }
        if !self.has_eof_marker {
            w.push("missing %%EOF marker (truncated?)");
        }
        if self.encrypted {
            w.push("document is encrypted");
        }
        w
    }
}

pub fn probe_pdf(cfg: &Config, input: &Path) -> Result<ProbeResult> {
    let mut f = std::fs::File::open(input)
        .with_context(|| format!("open input: {}", input.display()))?;
    let file_bytes = f.metadata().with_context(|| "stat input")?.len();

    if file_bytes > cfg.probe.max_scan_bytes {
        let mut head = [0u8; 1024];
        let n = read_up_to(&mut f, &mut head)?;
        let tail = read_tail(&mut f, file_bytes, 1024)?;
        return Ok(ProbeResult {
            file_bytes,
            has_pdf_header: find(&head[..n], b"%PDF-").is_some(),
            has_eof_marker: find(&tail, b"%%EOF").is_some(),
            encrypted: false,
            page_hint: None,
        });
    }

    let mut raw = Vec::with_capacity(file_bytes as usize);
    f.read_to_end(&mut raw)
        .with_context(|| format!("read input: {}", input.display()))?;
    Ok(scan(&raw))
}

/// Probe over an in-memory copy of the whole file.
pub fn scan(raw: &[u8]) -> ProbeResult {
    let head = &raw[..raw.len().min(1024)];
    let tail = &raw[raw.len().saturating_sub(1024)..];

    ProbeResult {
        file_bytes: raw.len() as u64,
        has_pdf_header: find(head, b"%PDF-").is_some(),
        has_eof_marker: find(tail, b"%%EOF").is_some(),
        encrypted: ENCRYPT_KEY.is_match(raw),
        page_hint: page_tree_count(raw).filter(|&n| n > 0),
    }
}

/// Follows the last `/Root` reference to the catalog, then its `/Pages`
/// reference to the page tree root, and reads `/Count`. Incremental updates
/// append new versions of objects, so the last definition of each number
/// wins. Page objects no longer reachable from the tree are not counted.
fn page_tree_count(raw: &[u8]) -> Option<u32> {
    let mut objects: HashMap<&[u8], &[u8]> = HashMap::new();
    for cap in OBJECT.captures_iter(raw) {
        if let (Some(num), Some(body)) = (cap.get(1), cap.get(2)) {
            objects.insert(num.as_bytes(), body.as_bytes());
        }
    }

    let root = ROOT_REF.captures_iter(raw).last()?.get(1)?.as_bytes();
    let catalog = objects.get(root)?;
    let pages = PAGES_REF.captures(catalog)?.get(1)?.as_bytes();
    let tree = objects.get(pages)?;
    let count = COUNT.captures(tree)?.get(1)?.as_bytes();
    std::str::from_utf8(count).ok()?.parse().ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn read_up_to(f: &mut std::fs::File, buf: &mut [u8]) -> Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        let read = f.read(&mut buf[n..])?;
        if read == 0 {
            break;
        }
        n += read;
    }
    Ok(n)
}

fn read_tail(f: &mut std::fs::File, size: u64, window: u64) -> Result<Vec<u8>> {
    let start = size.saturating_sub(window);
    f.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}
