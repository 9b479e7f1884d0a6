pub mod ghostscript;
pub mod imagemagick;
pub mod ocr_render;
pub mod process;
pub mod types;

use crate::config::Config;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

pub use ghostscript::Ghostscript;
pub use imagemagick::ImageMagick;
pub use ocr_render::OcrRender;
pub use types::{AttemptResult, ToolDiag};

/// One external rendering method.
///
/// `attempt` must write only inside `work_dir` and must not fail past its
/// boundary: spawn errors, non-zero exits and timeouts all come back inside
/// the [`AttemptResult`].
pub trait RenderTool: Send + Sync {
    fn name(&self) -> &str;
    fn attempt(&self, pdf: &Path, work_dir: &Path, timeout: Duration) -> AttemptResult;
    fn diagnose(&self) -> Vec<ToolDiag> {
        Vec::new()
    }
}

/// Builds the enabled rungs of the fallback ladder, in fixed order.
pub fn ladder(cfg: &Config) -> Vec<Box<dyn RenderTool>> {
    cfg.enabled_methods()
        .into_iter()
        .map(|name| -> Box<dyn RenderTool> {
            match name {
                "ghostscript" => Box::new(Ghostscript::new(cfg)),
                "imagemagick" => Box::new(ImageMagick::new(cfg)),
                _ => Box::new(OcrRender::new(cfg)),
            }
        })
        .collect()
}

/// Runs `<exe> <args>` and reads the first non-empty output line as a version.
pub(crate) fn version_probe(method: &str, exe: &str, args: &[&str]) -> ToolDiag {
    let mut cmd = Command::new(exe);
    cmd.args(args);
    let step = process::invoke(method, &mut cmd, Duration::from_secs(10), 400);

    let invocation_failed = matches!(
        step.error,
        Some(crate::error::AttemptError::ToolInvocation { .. })
    );
    let version = step
        .stdout
        .lines()
        .chain(step.stderr_excerpt.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string);

    ToolDiag {
        method: method.to_string(),
        exe: exe.to_string(),
        available: !invocation_failed,
        version,
        error: step.error.map(|e| e.to_string()),
    }
}
