use super::{AttemptResult, RenderTool, ToolDiag, process};
use crate::config::{ColorDepth, Config};
use crate::error::AttemptError;
use crate::verify::PAGE_PREFIX;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SCRATCH_DIR: &str = ".ocr";

/// Last-resort renderer: Tesseract re-renders the document into a fresh PDF,
/// which `pdftoppm` then rasterizes. Slow and lossy, but it gets through
/// files the other engines reject.
pub struct OcrRender {
    tesseract_exe: String,
    pdftoppm_exe: String,
    langs: String,
    dpi: u32,
    depth: ColorDepth,
    excerpt_bytes: usize,
}

impl OcrRender {
    pub fn new(cfg: &Config) -> Self {
        Self {
            tesseract_exe: cfg.tools.ocr_render.tesseract_exe.clone(),
            pdftoppm_exe: cfg.tools.ocr_render.pdftoppm_exe.clone(),
            langs: cfg.tools.ocr_render.langs.clone(),
            dpi: cfg.render.dpi,
            depth: cfg.render.color_depth,
            excerpt_bytes: cfg.debug.stderr_excerpt_bytes,
        }
    }

    fn tesseract_command(&self, pdf: &Path, out_base: &Path) -> Command {
        let mut cmd = Command::new(&self.tesseract_exe);
        cmd.arg(pdf).arg(out_base).args(["-l", &self.langs, "pdf"]);
        cmd
    }

    fn pdftoppm_command(&self, rendered: &Path, work_dir: &Path) -> Command {
        // pdftoppm appends "-<n>.png" to the root, padding <n> to the page count's width.
        let root = work_dir.join(PAGE_PREFIX.trim_end_matches('-'));
        let mut cmd = Command::new(&self.pdftoppm_exe);
        cmd.arg("-png");
        if self.depth == ColorDepth::Gray8 {
            cmd.arg("-gray");
        }
        cmd.arg("-r").arg(self.dpi.to_string()).arg(rendered).arg(root);
        cmd
    }

    fn run_steps(&self, pdf: &Path, work_dir: &Path, scratch: &Path, timeout: Duration) -> AttemptResult {
        let deadline = Instant::now() + timeout;
        let out_base = scratch.join("rendered");

        let mut cmd = self.tesseract_command(pdf, &out_base);
        let first = process::invoke("tesseract", &mut cmd, timeout, self.excerpt_bytes);
        if let Some(err) = first.error {
            return AttemptResult {
                exit_code: first.exit_code,
                stderr_excerpt: first.stderr_excerpt,
                produced_files: Vec::new(),
                error: Some(self.whole_budget(err, timeout)),
            };
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return AttemptResult::failed(AttemptError::Timeout {
                tool: self.name().to_string(),
                timeout,
            });
        }

        let rendered = out_base.with_extension("pdf");
        debug!("ocr render produced {}", rendered.display());
        let mut cmd = self.pdftoppm_command(&rendered, work_dir);
        let second = process::invoke("pdftoppm", &mut cmd, remaining, self.excerpt_bytes);

        let stderr_excerpt = [first.stderr_excerpt, second.stderr_excerpt]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        AttemptResult {
            exit_code: second.exit_code,
            stderr_excerpt,
            produced_files: super::types::list_files(work_dir),
            error: second.error.map(|e| self.whole_budget(e, timeout)),
        }
    }

    /// Timeouts are reported against the method's whole budget, not the step's share.
    fn whole_budget(&self, err: AttemptError, timeout: Duration) -> AttemptError {
        match err {
            AttemptError::Timeout { .. } => AttemptError::Timeout {
                tool: self.name().to_string(),
                timeout,
            },
            other => other,
        }
    }
}

impl RenderTool for OcrRender {
    fn name(&self) -> &str {
        "ocr_render"
    }

    fn attempt(&self, pdf: &Path, work_dir: &Path, timeout: Duration) -> AttemptResult {
        let scratch = work_dir.join(SCRATCH_DIR);
        if let Err(err) = std::fs::create_dir_all(&scratch) {
            return AttemptResult::failed(AttemptError::ToolInvocation {
                tool: self.name().to_string(),
                exe: self.tesseract_exe.clone(),
                detail: format!("create scratch dir {}: {err}", scratch.display()),
            });
        }

        let result = self.run_steps(pdf, work_dir, &scratch, timeout);

        if let Err(err) = std::fs::remove_dir_all(&scratch) {
            warn!("removing {} failed: {err}", scratch.display());
        }
        result
    }

    fn diagnose(&self) -> Vec<ToolDiag> {
        vec![
            super::version_probe(self.name(), &self.tesseract_exe, &["--version"]),
            super::version_probe(self.name(), &self.pdftoppm_exe, &["-v"]),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn commands_chain_through_scratch_pdf() {
        let cfg = Config::default();
        let ocr = OcrRender::new(&cfg);

        let t = ocr.tesseract_command(Path::new("/in/a.pdf"), Path::new("/w/.ocr/rendered"));
        assert_eq!(args(&t), ["/in/a.pdf", "/w/.ocr/rendered", "-l", "fas+eng", "pdf"]);

        let p = ocr.pdftoppm_command(Path::new("/w/.ocr/rendered.pdf"), Path::new("/w"));
        assert_eq!(args(&p), ["-png", "-r", "300", "/w/.ocr/rendered.pdf", "/w/page"]);
    }
}
