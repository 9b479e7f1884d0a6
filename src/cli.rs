use crate::{
    batch::{self, BatchOutcome, CancelToken},
    config::Config,
    pipeline::Pipeline,
    report::{ConversionReport, Reporter, WriterSink},
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pdf-rasterize")]
#[command(about = "Fault-tolerant PDF to page-image converter with a fallback rendering ladder")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./pdf-rasterize.toml if present, else defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report which rendering tools are installed.
    Doctor {},
    /// Print a structural preflight of one PDF.
    Probe {
        #[arg(long)]
        input: PathBuf,
    },
    /// Convert a single PDF.
    Convert {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Convert every PDF in a directory.
    Run {
        #[arg(long)]
        input_dir: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

/// How the batch ended, for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    /// At least one document failed or was never started.
    NeedsAttention,
}

pub fn dispatch(args: Args) -> Result<RunStatus> {
    let cfg = load_config(args.config.as_deref())?;

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            doctor(&cfg)
        }
        Command::Probe { input } => {
            let _guard = init_logging(&args, &cfg, None)?;
            probe(&cfg, input)
        }
        Command::Convert { input, out_dir } => {
            validate_input(input)?;
            run(&args, &cfg, Inputs::File(input), out_dir.as_deref())
        }
        Command::Run { input_dir, out_dir } => {
            run(&args, &cfg, Inputs::Dir(input_dir), out_dir.as_deref())
        }
    }
}

fn load_config(user: Option<&Path>) -> Result<Config> {
    if let Some(p) = user {
        return Config::load(p);
    }
    let default = PathBuf::from("pdf-rasterize.toml");
    if default.exists() {
        Config::load(&default)
    } else {
        Ok(Config::default())
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config) -> Result<RunStatus> {
    let pipeline = Pipeline::new(cfg)?;
    let diags = pipeline.diagnose();
    let all_available = diags.iter().all(|d| d.available);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "methods": pipeline.methods(),
            "tools": diags,
        }))?
    );
    Ok(if all_available {
        RunStatus::Clean
    } else {
        RunStatus::NeedsAttention
    })
}

fn probe(cfg: &Config, input: &Path) -> Result<RunStatus> {
    validate_input(input)?;
    let probe = crate::probe::probe_pdf(cfg, input)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "probe": probe,
            "warnings": probe.warnings(),
        }))?
    );
    Ok(RunStatus::Clean)
}

enum Inputs<'a> {
    File(&'a Path),
    Dir(&'a Path),
}

fn run(args: &Args, cfg: &Config, inputs: Inputs<'_>, out_override: Option<&Path>) -> Result<RunStatus> {
    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    batch::check_out_root(&out_root)?;

    let log_path = resolve_log_path(cfg, &out_root);
    let _guard = init_logging(args, cfg, log_path.as_deref())?;
    info!("out={}", out_root.display());

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).context("serialize effective config")?;
        let path = out_root.join("effective-config.toml");
        std::fs::write(&path, raw).with_context(|| format!("write {}", path.display()))?;
    }

    let pipeline = Pipeline::new(cfg)?;
    let sink = WriterSink::create(&out_root.join(&cfg.output.log_filename))?;
    let reporter = Reporter::new(Box::new(sink));
    let cancel = CancelToken::default();
    install_signal_handler(&cancel)?;

    let outcome = match inputs {
        Inputs::File(input) => batch::run_inputs(
            cfg,
            &pipeline,
            &reporter,
            &[input.to_path_buf()],
            &out_root,
            cancel,
        )?,
        Inputs::Dir(dir) => batch::run_batch(cfg, &pipeline, &reporter, dir, &out_root, cancel)?,
    };

    let report_path = out_root.join(&cfg.output.report_filename);
    let failures_path = out_root.join(&cfg.output.failures_filename);
    let report = reporter.write_artifacts(
        cfg.output.write_report_json.then_some(report_path.as_path()),
        cfg.output.write_failure_list.then_some(failures_path.as_path()),
    )?;

    if cfg.global.print_summary {
        print_summary(&report, &outcome, &out_root)?;
    }

    Ok(if report.is_clean() {
        RunStatus::Clean
    } else {
        RunStatus::NeedsAttention
    })
}

/// First SIGINT/SIGTERM drains the batch after the current document. A second
/// kills the running tool and drops its attempt, then the run reports and exits.
fn install_signal_handler(cancel: &CancelToken) -> Result<()> {
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        if token.escalate() {
            warn!("second interrupt: killing the running tool");
        } else {
            warn!("interrupt: finishing the current document, interrupt again to stop now");
        }
    })
    .context("install signal handler")
}

fn print_summary(report: &ConversionReport, outcome: &BatchOutcome, out_root: &Path) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "outDir": out_root,
            "totalDocuments": report.total_documents,
            "succeeded": report.succeeded,
            "partial": report.partial,
            "failed": report.failed,
            "skipped": outcome.skipped,
            "totalPages": report.total_pages,
            "methodSuccesses": report.method_successes,
            "generatedAt": report.generated_at,
        }))?
    );
    Ok(())
}

fn validate_input(input: &Path) -> Result<()> {
    let input_str = input.display().to_string();

    if looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are not supported: {input_str}"));
    }

    if !input.is_file() {
        return Err(anyhow!("input does not exist or is not a file: {}", input.display()));
    }

    match input.extension().and_then(|s| s.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => {}
        Some(_) => warn!("input does not have a .pdf extension: {}", input.display()),
        None => warn!("input has no extension; assuming PDF: {}", input.display()),
    }

    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

fn resolve_log_path(cfg: &Config, out_root: &Path) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    Some(out_root.join("logs").join("pdf-rasterize.log"))
}
