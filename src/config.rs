use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Method names in ladder order. `methods.enabled` may drop entries but
/// never reorder them.
pub const LADDER: [&str; 3] = ["ghostscript", "imagemagick", "ocr_render"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub render: Render,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub verify: Verify,
    #[serde(default)]
    pub methods: Methods,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub probe: Probe,
    #[serde(default)]
    pub hashing: Hashing,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.render.dpi == 0 {
            bail!("render.dpi must be > 0");
        }
        if self.limits.per_method_timeout_seconds == 0 {
            bail!("limits.per_method_timeout_seconds must be > 0");
        }
        if self.methods.enabled.is_empty() {
            bail!("methods.enabled must name at least one method");
        }
        for name in &self.methods.enabled {
            if !LADDER.contains(&name.as_str()) {
                bail!("unknown method in methods.enabled: {name} (expected one of {LADDER:?})");
            }
        }
        if !matches!(self.hashing.mode.as_str(), "full_sha256" | "fast_2x16mb") {
            bail!("unknown hashing.mode: {}", self.hashing.mode);
        }
        if self.global.max_parallel_documents == 0 {
            bail!("global.max_parallel_documents must be >= 1");
        }
        Ok(())
    }

    /// Enabled methods, in ladder order regardless of how they were listed.
    pub fn enabled_methods(&self) -> Vec<&'static str> {
        LADDER
            .iter()
            .copied()
            .filter(|m| self.methods.enabled.iter().any(|e| e == m))
            .collect()
    }

    /// Timeout for one method; a per-tool override of 0 inherits the global limit.
    pub fn method_timeout(&self, method: &str) -> Duration {
        let own = match method {
            "ghostscript" => self.tools.ghostscript.timeout_seconds,
            "imagemagick" => self.tools.imagemagick.timeout_seconds,
            "ocr_render" => self.tools.ocr_render.timeout_seconds,
            _ => 0,
        };
        let secs = if own > 0 {
            own
        } else {
            self.limits.per_method_timeout_seconds
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub print_summary: bool,
    pub keep_intermediates: bool,
    pub max_parallel_documents: usize,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            print_summary: true,
            keep_intermediates: false,
            max_parallel_documents: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
    pub work_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            work_dir: ".pdf-rasterize-work".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorDepth {
    /// 24-bit RGB.
    Png24,
    /// 8-bit grayscale.
    Gray8,
    /// 32-bit RGBA.
    Rgba32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Render {
    pub dpi: u32,
    pub color_depth: ColorDepth,
}
impl Default for Render {
    fn default() -> Self {
        Self {
            dpi: 300,
            color_depth: ColorDepth::Png24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub per_method_timeout_seconds: u64,
    pub min_page_file_size_bytes: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            per_method_timeout_seconds: 600,
            min_page_file_size_bytes: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Verify {
    pub check_image_header: bool,
    pub require_expected_page_count: bool,
}
impl Default for Verify {
    fn default() -> Self {
        Self {
            check_image_header: true,
            require_expected_page_count: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Methods {
    pub enabled: Vec<String>,
}
impl Default for Methods {
    fn default() -> Self {
        Self {
            enabled: LADDER.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub ghostscript: Ghostscript,
    pub imagemagick: ImageMagick,
    pub ocr_render: OcrRender,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Ghostscript {
    pub exe: String,
    pub timeout_seconds: u64,
    pub extra_args: Vec<String>,
}
impl Default for Ghostscript {
    fn default() -> Self {
        Self {
            exe: "gs".into(),
            timeout_seconds: 0,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMagick {
    pub exe: String,
    pub timeout_seconds: u64,
    pub extra_args: Vec<String>,
}
impl Default for ImageMagick {
    fn default() -> Self {
        Self {
            exe: "convert".into(),
            timeout_seconds: 0,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrRender {
    pub tesseract_exe: String,
    pub pdftoppm_exe: String,
    pub langs: String,
    pub timeout_seconds: u64,
}
impl Default for OcrRender {
    fn default() -> Self {
        Self {
            tesseract_exe: "tesseract".into(),
            pdftoppm_exe: "pdftoppm".into(),
            langs: "fas+eng".into(),
            timeout_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Probe {
    pub enabled: bool,
    pub max_scan_bytes: u64,
}
impl Default for Probe {
    fn default() -> Self {
        Self {
            enabled: true,
            max_scan_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hashing {
    pub mode: String,
    pub fast_window_bytes: u64,
}
impl Default for Hashing {
    fn default() -> Self {
        Self {
            mode: "fast_2x16mb".into(),
            fast_window_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub write_report_json: bool,
    pub write_failure_list: bool,
    pub report_filename: String,
    pub log_filename: String,
    pub failures_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: true,
            write_failure_list: true,
            report_filename: "conversion-report.json".into(),
            log_filename: "conversion.log".into(),
            failures_filename: "failures.txt".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub stderr_excerpt_bytes: usize,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            stderr_excerpt_bytes: 2000,
            dump_effective_config: false,
        }
    }
}
