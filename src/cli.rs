use crate::{
    batch_plan::BatchPlan,
    config::Config,
    metadata::Pdfinfo,
    pipeline::Pipeline,
    preflight,
    thumbnail::Pdftoppm,
    tools::ProcessRunner,
    util::ensure_dir,
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "pdf-squeeze")]
#[command(about = "Batch PDF compressor: best of several external tools per page")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./pdf-squeeze.toml if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compress a PDF page by page and reassemble it.
    Compress {
        input: PathBuf,
        #[command(flatten)]
        opts: CompressOpts,
    },
    /// Print the batch plan for a PDF without compressing it.
    Plan {
        input: PathBuf,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Report which external executables are available.
    Doctor {},
}

#[derive(clap::Args, Debug, Default)]
pub struct CompressOpts {
    /// Skip producing the merged whole-document output.
    #[arg(long)]
    pub no_merge: bool,
    /// Delete per-page outputs after the run.
    #[arg(long)]
    pub no_pages: bool,
    /// Skip metadata-text extraction.
    #[arg(long)]
    pub no_metadata: bool,
    /// Skip thumbnail generation.
    #[arg(long)]
    pub no_thumbnails: bool,
    /// Pages per batch.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Pages compressed at the same time within a batch.
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Output directory.
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

impl CompressOpts {
    /// Flags only ever narrow what the config enables.
    pub fn apply(&self, cfg: &mut Config) {
        if self.no_merge {
            cfg.global.merge = false;
        }
        if self.no_pages {
            cfg.global.keep_pages = false;
        }
        if self.no_metadata {
            cfg.global.metadata = false;
        }
        if self.no_thumbnails {
            cfg.global.thumbnails = false;
        }
        if let Some(n) = self.batch_size {
            cfg.global.batch_size = n;
        }
        if let Some(n) = self.concurrency {
            cfg.global.concurrency = n;
        }
        if let Some(dir) = &self.out_dir {
            cfg.paths.out_dir = dir.display().to_string();
        }
    }
}

pub fn dispatch(args: Args) -> Result<()> {
    let mut cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => match Config::load(&path) {
            Ok(cfg) => cfg,
            Err(err) => {
                let _guard = init_logging(&args, &Config::default(), None);
                return Err(err);
            }
        },
        None => Config::default(),
    };

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            doctor(&cfg)
        }
        Command::Plan { input, batch_size } => {
            let _guard = init_logging(&args, &cfg, None)?;
            if let Some(n) = batch_size {
                cfg.global.batch_size = *n;
            }
            plan(&cfg, input)
        }
        Command::Compress { input, opts } => {
            opts.apply(&mut cfg);
            let log_path = resolve_log_path(&cfg);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            compress(&cfg, input)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("pdf-squeeze.toml");
    default.exists().then_some(default)
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

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(cfg.out_dir().join("pdf-squeeze.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let report = preflight::executable_report(cfg);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn plan(cfg: &Config, input: &Path) -> Result<()> {
    cfg.validate()?;
    let (probe, _doc) = preflight::probe_input(cfg, input)?;
    let plan = BatchPlan::from_page_count(probe.page_count, cfg.global.batch_size);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": probe,
            "plan": plan,
        }))?
    );
    Ok(())
}

fn compress(cfg: &Config, input: &Path) -> Result<()> {
    cfg.validate()?;
    preflight::check_executables(cfg)?;

    let pipeline = Pipeline::new(cfg, ProcessRunner::new(cfg))
        .with_thumbnailer(Box::new(Pdftoppm::new(cfg)))
        .with_metadata(Box::new(Pdfinfo::new(cfg)));

    let out = pipeline.run_job(input)?;
    if let Some(path) = &out.final_path {
        info!("final document {}", path.display());
    }

    if cfg.global.print_summary {
        println!("{}", out.summary);
        if let Some(path) = &out.final_path {
            println!("output:      {}", path.display());
        }
    }
    Ok(())
}
