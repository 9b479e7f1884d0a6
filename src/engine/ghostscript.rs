use super::{AttemptResult, RenderTool, ToolDiag, process};
use crate::config::{ColorDepth, Config};
use crate::verify::{PAGE_EXT, PAGE_PREFIX};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Primary rasterizer: Ghostscript's PNG devices.
pub struct Ghostscript {
    exe: String,
    dpi: u32,
    depth: ColorDepth,
    extra_args: Vec<String>,
    excerpt_bytes: usize,
}

impl Ghostscript {
    pub fn new(cfg: &Config) -> Self {
        Self {
            exe: cfg.tools.ghostscript.exe.clone(),
            dpi: cfg.render.dpi,
            depth: cfg.render.color_depth,
            extra_args: cfg.tools.ghostscript.extra_args.clone(),
            excerpt_bytes: cfg.debug.stderr_excerpt_bytes,
        }
    }

    fn device(&self) -> &'static str {
        match self.depth {
            ColorDepth::Png24 => "png16m",
            ColorDepth::Gray8 => "pnggray",
            ColorDepth::Rgba32 => "pngalpha",
        }
    }

    fn command(&self, pdf: &Path, work_dir: &Path) -> Command {
        let pattern = work_dir.join(format!("{PAGE_PREFIX}%03d.{PAGE_EXT}"));
        let mut cmd = Command::new(&self.exe);
        cmd.args(["-dNOPAUSE", "-dBATCH", "-dSAFER"])
            .arg(format!("-sDEVICE={}", self.device()))
            .arg(format!("-r{}", self.dpi))
            .args(&self.extra_args)
            .arg(format!("-sOutputFile={}", pattern.display()))
            .arg(pdf);
        cmd
    }
}

impl RenderTool for Ghostscript {
    fn name(&self) -> &str {
        "ghostscript"
    }

    fn attempt(&self, pdf: &Path, work_dir: &Path, timeout: Duration) -> AttemptResult {
        let mut cmd = self.command(pdf, work_dir);
        let step = process::invoke(self.name(), &mut cmd, timeout, self.excerpt_bytes);
        AttemptResult::from_step(step, work_dir)
    }

    fn diagnose(&self) -> Vec<ToolDiag> {
        vec![super::version_probe(self.name(), &self.exe, &["--version"])]
    }
}
