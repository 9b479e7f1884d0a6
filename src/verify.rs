//! Page verification: decides whether a method's output counts as a success.
//!
//! A tool exiting 0 says nothing about whether its output is usable; some
//! renderers stop half-way, leave zero-byte files, or write truncated PNGs
//! and still report success. Verification looks only at the files.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const PAGE_PREFIX: &str = "page-";
pub const PAGE_EXT: &str = "png";

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

static PAGE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^{}(\d+)\.{}$",
        regex::escape(PAGE_PREFIX),
        regex::escape(PAGE_EXT)
    ))
    .expect("page file pattern")
});

#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub min_page_bytes: u64,
    pub check_image_header: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedPage {
    pub index: u32,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Verification {
    /// Recognized page files, sorted by index.
    pub pages: Vec<VerifiedPage>,
    pub complete: bool,
    pub problems: Vec<String>,
}

impl Verification {
    pub fn summary(&self) -> String {
        if self.problems.is_empty() {
            format!("{} page(s) verified", self.pages.len())
        } else {
            self.problems.join("; ")
        }
    }
}

/// Canonical name of page `index` in a final output directory.
pub fn page_file_name(index: u32) -> String {
    format!("{PAGE_PREFIX}{index:03}.{PAGE_EXT}")
}

/// Parses the 1-based page index out of a file name, accepting any digit width.
pub fn parse_page_index(name: &str) -> Option<u32> {
    PAGE_FILE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Scans the top level of `work_dir` and checks that pages exist, are numbered
/// 1..=n without gaps or duplicates, exceed the size floor, and (optionally)
/// start with a PNG signature.
pub fn verify(work_dir: &Path, opts: VerifyOptions) -> Result<Verification> {
    let mut by_index: BTreeMap<u32, Vec<VerifiedPage>> = BTreeMap::new();
    let entries = std::fs::read_dir(work_dir)
        .with_context(|| format!("read_dir {}", work_dir.display()))?;

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(index) = parse_page_index(&name.to_string_lossy()) else {
            continue;
        };
        let bytes = entry.metadata()?.len();
        by_index.entry(index).or_default().push(VerifiedPage {
            index,
            path: entry.path(),
            bytes,
        });
    }

    let mut problems = Vec::new();
    if by_index.is_empty() {
        problems.push("no page images produced".to_string());
    }

    let mut expected = 1u32;
    for (&index, files) in &by_index {
        if index != expected {
            problems.push(format!("page numbering gap: expected {expected}, found {index}"));
            expected = index;
        }
        if files.len() > 1 {
            problems.push(format!("page {index} produced {} times", files.len()));
        }
        expected += 1;
    }

    let pages: Vec<VerifiedPage> = by_index.into_values().flatten().collect();
    for page in &pages {
        if page.bytes == 0 || page.bytes <= opts.min_page_bytes {
            problems.push(format!(
                "page {} is {} bytes (floor {})",
                page.index, page.bytes, opts.min_page_bytes
            ));
        } else if opts.check_image_header && !has_png_signature(&page.path)? {
            problems.push(format!("page {} is not a valid PNG", page.index));
        }
    }

    Ok(Verification {
        complete: problems.is_empty(),
        pages,
        problems,
    })
}

fn has_png_signature(path: &Path) -> Result<bool> {
    let mut f = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut head = [0u8; 8];
    match f.read_exact(&mut head) {
        Ok(()) => Ok(head == PNG_SIGNATURE),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}
