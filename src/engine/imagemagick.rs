use super::{AttemptResult, RenderTool, ToolDiag, process};
use crate::config::{ColorDepth, Config};
use crate::verify::{PAGE_EXT, PAGE_PREFIX};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Secondary rasterizer: ImageMagick `convert` (delegates to its own PDF path).
pub struct ImageMagick {
    exe: String,
    dpi: u32,
    depth: ColorDepth,
    extra_args: Vec<String>,
    excerpt_bytes: usize,
}

impl ImageMagick {
    pub fn new(cfg: &Config) -> Self {
        Self {
            exe: cfg.tools.imagemagick.exe.clone(),
            dpi: cfg.render.dpi,
            depth: cfg.render.color_depth,
            extra_args: cfg.tools.imagemagick.extra_args.clone(),
            excerpt_bytes: cfg.debug.stderr_excerpt_bytes,
        }
    }

    fn command(&self, pdf: &Path, work_dir: &Path) -> Command {
        let (flags, format): (&[&str], &str) = match self.depth {
            ColorDepth::Png24 => (&["-background", "white", "-alpha", "remove", "-alpha", "off"], "PNG24"),
            ColorDepth::Gray8 => (&["-colorspace", "Gray", "-type", "Grayscale", "-depth", "8"], "PNG"),
            ColorDepth::Rgba32 => (&[], "PNG32"),
        };
        let pattern = work_dir.join(format!("{PAGE_PREFIX}%03d.{PAGE_EXT}"));

        let mut cmd = Command::new(&self.exe);
        // -density must precede the input to affect rasterization.
        cmd.arg("-density")
            .arg(self.dpi.to_string())
            .args(&self.extra_args)
            .arg(pdf)
            .args(["-scene", "1"])
            .args(flags)
            .arg(format!("{format}:{}", pattern.display()));
        cmd
    }
}

impl RenderTool for ImageMagick {
    fn name(&self) -> &str {
        "imagemagick"
    }

    fn attempt(&self, pdf: &Path, work_dir: &Path, timeout: Duration) -> AttemptResult {
        let mut cmd = self.command(pdf, work_dir);
        let step = process::invoke(self.name(), &mut cmd, timeout, self.excerpt_bytes);
        AttemptResult::from_step(step, work_dir)
    }

    fn diagnose(&self) -> Vec<ToolDiag> {
        vec![super::version_probe(self.name(), &self.exe, &["-version"])]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_starts_at_one() {
        let cfg = Config::default();
        let im = ImageMagick::new(&cfg);
        let cmd = im.command(Path::new("/in/a.pdf"), Path::new("/w"));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let scene = args.iter().position(|a| a == "-scene").expect("-scene");
        assert_eq!(args[scene + 1], "1");
        assert_eq!(args[0..2], ["-density".to_string(), "300".to_string()]);
        assert_eq!(args.last().map(String::as_str), Some("PNG24:/w/page-%03d.png"));
    }
}
