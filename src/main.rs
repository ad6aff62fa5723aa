//! bookshot CLI — one subcommand per pipeline stage.
//!
//! `windows` / `capture` / `convert` / `summarize` run a single stage;
//! `run` chains them with skip-if-exists idempotence. Long-running stages
//! go through a worker handle so Ctrl-C pauses nothing halfway: tracked
//! child processes are terminated and the job lands in the Stopped state.

use anyhow::{bail, Context, Result};
use bookshot::capture::{self, CapturePlan, Margins};
use bookshot::ocr::{self, OcrEngine, Tesseract};
use bookshot::pipeline::{self, PipelineJob};
use bookshot::settings::{self, Settings};
use bookshot::worker::{WorkerHandle, WorkerState};
use bookshot::{llm, merge};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Book-scanning pipeline: capture a paginated viewer, OCR to searchable PDF, summarize with Gemini")]
struct Cli {
    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, short = 'L', global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capturable windows (app, title, position, size)
    Windows,
    /// Capture a page range from a viewer window into PNGs
    Capture(CaptureOpts),
    /// OCR page images into searchable PDFs + text and merge them
    Convert(ConvertOpts),
    /// Summarize an extracted text file with Gemini
    Summarize(SummarizeOpts),
    /// Full pipeline: capture → convert → summarize
    Run(RunOpts),
}

#[derive(Args, Debug, Clone)]
struct CaptureOpts {
    /// App name to capture (exact match, case-insensitive)
    #[arg(long, short = 'A')]
    app: Option<String>,

    /// Window title to capture (exact match, case-insensitive)
    #[arg(long, short = 'N')]
    window_name: Option<String>,

    /// Output directory root; pages land in <output>/<book-title>/
    #[arg(long, short = 'O')]
    output: Option<PathBuf>,

    /// Book title — output file prefix
    #[arg(long, short = 'T')]
    book_title: Option<String>,

    /// First page number
    #[arg(long, short = 'S')]
    start: Option<u32>,

    /// Last page number
    #[arg(long, short = 'E')]
    end: Option<u32>,

    /// Key that advances the viewer to the next page (e.g. right, space)
    #[arg(long)]
    next: Option<String>,

    /// Delay between captures, in seconds
    #[arg(long, short = 'D')]
    delay: Option<f64>,

    /// Resize the window to this width before capturing
    #[arg(long)]
    width: Option<u32>,

    /// Resize the window to this height before capturing
    #[arg(long)]
    height: Option<u32>,

    /// Capture-region margins, in logical pixels
    #[arg(long)]
    top_margin: Option<i32>,
    #[arg(long)]
    bottom_margin: Option<i32>,
    #[arg(long)]
    left_margin: Option<i32>,
    #[arg(long)]
    right_margin: Option<i32>,

    /// Persist the effective values as new defaults
    #[arg(long)]
    save_settings: bool,
}

#[derive(Args, Debug, Clone)]
struct ConvertOpts {
    /// Input image file, or a directory of page images
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Output PDF path (single-image mode only)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Tesseract language(s), e.g. kor+eng
    #[arg(long, short = 'l')]
    lang: Option<String>,

    /// Explicit tesseract binary path
    #[arg(long)]
    tesseract: Option<PathBuf>,

    /// OCR only — skip merging the per-page outputs
    #[arg(long)]
    no_merge: bool,
}

#[derive(Args, Debug, Clone)]
struct SummarizeOpts {
    /// Input text file
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Output file for the summary
    #[arg(long, short = 'o')]
    output: PathBuf,

    /// Prompt file; defaults to a generic summarization prompt
    #[arg(long, short = 'p')]
    prompt: Option<PathBuf>,

    /// Gemini model name
    #[arg(long)]
    model: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct RunOpts {
    #[command(flatten)]
    capture: CaptureOpts,

    /// Tesseract language(s), e.g. kor+eng
    #[arg(long, short = 'l')]
    lang: Option<String>,

    /// Explicit tesseract binary path
    #[arg(long)]
    tesseract: Option<PathBuf>,

    /// OCR only — skip merging the per-page outputs
    #[arg(long)]
    no_merge: bool,

    /// Prompt file(s); each produces {title}_{prompt_stem}.md
    #[arg(long, short = 'p')]
    prompt: Vec<PathBuf>,

    /// Gemini model name
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env.local → .env from the working directory.
    for env_file in [".env.local", ".env"] {
        let path = std::path::Path::new(env_file);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(_) => eprintln!("[STARTUP] Loaded {}", path.display()),
                Err(e) => eprintln!("[STARTUP] Failed to load {}: {}", path.display(), e),
            }
            break;
        }
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log.as_str()),
    )
    .init();

    match cli.command {
        Commands::Windows => cmd_windows(),
        Commands::Capture(opts) => cmd_capture(opts).await,
        Commands::Convert(opts) => cmd_convert(opts).await,
        Commands::Summarize(opts) => cmd_summarize(opts).await,
        Commands::Run(opts) => cmd_run(opts).await,
    }
}

fn cmd_windows() -> Result<()> {
    let windows = capture::list_windows()?;
    println!("\nAvailable Windows:");
    for (i, w) in windows.iter().enumerate() {
        println!(
            "{:2}. [{}] {}  ({},{}) {}x{}",
            i + 1,
            w.app,
            w.title,
            w.x,
            w.y,
            w.width,
            w.height
        );
    }
    Ok(())
}

async fn cmd_capture(opts: CaptureOpts) -> Result<()> {
    let saved = settings::load();
    let (plan, effective) = build_plan(&opts, &saved)?;
    if opts.save_settings {
        settings::save(&effective)?;
    }
    let worker = drive_worker(move |w| capture::capture_pages(&plan, w).map(|_| ())).await?;
    report_outcome(&worker, "Capture");
    Ok(())
}

async fn cmd_convert(opts: ConvertOpts) -> Result<()> {
    let saved = settings::load();
    let lang = opts.lang.unwrap_or(saved.lang);
    let tesseract = opts
        .tesseract
        .or_else(|| non_empty(&saved.tesseract_path).map(PathBuf::from));
    let input = opts.input;
    let output = opts.output;
    let do_merge = !opts.no_merge;

    let worker = drive_worker(move |w| {
        let engine = Tesseract::new(tesseract.as_deref(), &lang)?.with_worker(w.clone());
        if input.is_file() {
            if !ocr::is_supported_image(&input) {
                bail!(
                    "unsupported input format {:?} — supported: {}",
                    input.extension().unwrap_or_default(),
                    ocr::SUPPORTED_INPUT.join(", ")
                );
            }
            let out_base = output
                .map(|o| o.with_extension(""))
                .unwrap_or_else(|| input.with_extension(""));
            let pdf = out_base.with_extension("pdf");
            let text = out_base.with_extension("txt");
            if pdf.exists() && text.exists() {
                log::info!(
                    "[OCR] {} and {} already exist — skipping",
                    pdf.display(),
                    text.display()
                );
            } else {
                engine.ocr_page(&input, &out_base)?;
            }
        } else if input.is_dir() {
            pipeline::ocr_directory(&input, &engine, w)?;
            if do_merge {
                let stem = input
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "output".to_string());
                merge::merge_book(&input, &stem, &engine)?;
            }
        } else {
            bail!("input {} does not exist", input.display());
        }
        Ok(())
    })
    .await?;
    report_outcome(&worker, "Convert");
    Ok(())
}

async fn cmd_summarize(opts: SummarizeOpts) -> Result<()> {
    let client = llm::GeminiClient::from_env(opts.model.as_deref())?;
    let prompt = match &opts.prompt {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt {}", path.display()))?,
        None => "Summarize the following text:".to_string(),
    };
    let stats = client
        .summarize_path(prompt.trim(), &opts.input, &opts.output)
        .await?;
    println!(
        "Summary written to {} ({} chars)",
        opts.output.display(),
        stats.chars_written
    );
    Ok(())
}

async fn cmd_run(opts: RunOpts) -> Result<()> {
    let saved = settings::load();
    let (plan, mut effective) = build_plan(&opts.capture, &saved)?;
    if let Some(lang) = &opts.lang {
        effective.lang = lang.clone();
    }
    if let Some(tesseract) = &opts.tesseract {
        effective.tesseract_path = tesseract.to_string_lossy().into_owned();
    }
    effective.merge = !opts.no_merge;
    if opts.capture.save_settings {
        settings::save(&effective)?;
    }

    for prompt in &opts.prompt {
        if !prompt.exists() {
            bail!("prompt file {} does not exist", prompt.display());
        }
    }

    let job = PipelineJob {
        plan,
        lang: effective.lang.clone(),
        tesseract_path: non_empty(&effective.tesseract_path).map(PathBuf::from),
        merge: effective.merge,
        prompts: opts.prompt.clone(),
        model: opts.model.clone(),
    };
    let worker = drive_worker(move |w| pipeline::run_pipeline(&job, w)).await?;
    report_outcome(&worker, "Pipeline");
    Ok(())
}

/// Run a job on a dedicated blocking thread, stopping it on Ctrl-C.
async fn drive_worker<F>(job: F) -> Result<WorkerHandle>
where
    F: FnOnce(&WorkerHandle) -> Result<()> + Send + 'static,
{
    let worker = WorkerHandle::new();
    let inner = worker.clone();
    let mut task = tokio::task::spawn_blocking(move || inner.run_job(job));
    tokio::select! {
        res = &mut task => res.context("worker thread panicked")??,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("[WORKER] Ctrl-C received — stopping the current job");
            worker.stop();
            task.await.context("worker thread panicked")??;
        }
    }
    Ok(worker)
}

fn report_outcome(worker: &WorkerHandle, label: &str) {
    match worker.state() {
        WorkerState::Finished => log::info!("[PIPELINE] {} complete", label),
        WorkerState::Stopped => log::warn!("[PIPELINE] {} stopped before completion", label),
        other => log::debug!("[PIPELINE] {} ended in state {:?}", label, other),
    }
}

/// Effective capture plan: CLI flag → settings file → built-in default.
fn build_plan(opts: &CaptureOpts, saved: &Settings) -> Result<(CapturePlan, Settings)> {
    let mut effective = saved.clone();
    if let Some(v) = &opts.app {
        effective.app_name = v.clone();
    }
    if let Some(v) = &opts.window_name {
        effective.window_title = v.clone();
    }
    if let Some(v) = &opts.output {
        effective.output_dir = v.to_string_lossy().into_owned();
    }
    if let Some(v) = &opts.book_title {
        effective.book_title = v.clone();
    }
    if let Some(v) = opts.start {
        effective.start_page = v;
    }
    if let Some(v) = opts.end {
        effective.end_page = v;
    }
    if let Some(v) = &opts.next {
        effective.next_key = v.clone();
    }
    if let Some(v) = opts.delay {
        effective.delay_ms = (v * 1000.0).max(0.0) as u64;
    }
    if let Some(v) = opts.width {
        effective.width = v;
    }
    if let Some(v) = opts.height {
        effective.height = v;
    }
    if let Some(v) = opts.top_margin {
        effective.top_margin = v;
    }
    if let Some(v) = opts.bottom_margin {
        effective.bottom_margin = v;
    }
    if let Some(v) = opts.left_margin {
        effective.left_margin = v;
    }
    if let Some(v) = opts.right_margin {
        effective.right_margin = v;
    }

    if effective.start_page == 0 {
        bail!("page numbers start at 1");
    }
    if effective.end_page < effective.start_page {
        bail!(
            "end page {} is before start page {}",
            effective.end_page,
            effective.start_page
        );
    }
    if effective.book_title.trim().is_empty() {
        bail!("book title must not be empty");
    }

    // Resize only when explicitly requested on the command line.
    let resize = if opts.width.is_some() || opts.height.is_some() {
        Some((effective.width, effective.height))
    } else {
        None
    };

    let plan = CapturePlan {
        app_name: non_empty(&effective.app_name),
        window_title: non_empty(&effective.window_title),
        output_dir: PathBuf::from(&effective.output_dir).join(&effective.book_title),
        title: effective.book_title.clone(),
        start: effective.start_page,
        end: effective.end_page,
        next_key: non_empty(&effective.next_key),
        delay: Duration::from_millis(effective.delay_ms),
        margins: Margins {
            top: effective.top_margin,
            bottom: effective.bottom_margin,
            left: effective.left_margin,
            right: effective.right_margin,
        },
        resize,
    };
    Ok((plan, effective))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
