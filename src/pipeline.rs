//! Full book pipeline — capture → OCR/merge → summarize.
//!
//! Stages run sequentially on one worker thread. Each stage is skipped
//! when its expected outputs already exist, so re-running a failed or
//! stopped job picks up where it left off. Worker checkpoints sit at
//! every stage boundary; a stop request surfaces as
//! [`crate::worker::Interrupted`] and is mapped to the Stopped state by
//! [`crate::worker::WorkerHandle::run_job`], not treated as a failure.

use crate::capture::{self, CapturePlan};
use crate::llm;
use crate::merge;
use crate::ocr::{self, OcrEngine, Tesseract};
use crate::worker::WorkerHandle;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Everything one pipeline run needs. Immutable once started.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub plan: CapturePlan,
    pub lang: String,
    /// Explicit tesseract binary; `None` means search PATH.
    pub tesseract_path: Option<PathBuf>,
    pub merge: bool,
    /// Prompt files; each produces `{title}_{prompt_stem}.md`.
    pub prompts: Vec<PathBuf>,
    pub model: Option<String>,
}

#[derive(Debug, Default)]
pub struct OcrRunReport {
    pub processed: usize,
    pub skipped: usize,
}

/// Run every stage of the pipeline for one book.
pub fn run_pipeline(job: &PipelineJob, worker: &WorkerHandle) -> Result<()> {
    let book_dir = &job.plan.output_dir;
    let title = &job.plan.title;
    let start = Instant::now();

    // Stage 1: capture
    worker.checkpoint()?;
    let existing = count_page_images(book_dir);
    if existing > 1 {
        log::info!(
            "[PIPELINE] Skipping capture — {} page images already in {}",
            existing,
            book_dir.display()
        );
    } else {
        log::info!(
            "[PIPELINE] [1/3] Capturing pages {}-{} of {}",
            job.plan.start,
            job.plan.end,
            title
        );
        let report = capture::capture_pages(&job.plan, worker)?;
        log::info!("[PIPELINE] Capture done: {} page(s)", report.captured);
    }

    // Stage 2: OCR + merge
    worker.checkpoint()?;
    let merged_pdf = book_dir.join(format!("{title}.pdf"));
    let merged_txt = book_dir.join(format!("{title}.txt"));
    if merged_pdf.exists() && merged_txt.exists() {
        log::info!(
            "[PIPELINE] Skipping OCR/merge — {} and {} already exist",
            merged_pdf.display(),
            merged_txt.display()
        );
    } else {
        log::info!("[PIPELINE] [2/3] OCR of page images in {}", book_dir.display());
        let engine = Tesseract::new(job.tesseract_path.as_deref(), &job.lang)?
            .with_worker(worker.clone());
        let report = ocr_directory(book_dir, &engine, worker)?;
        log::info!(
            "[PIPELINE] OCR done: {} processed, {} already existed",
            report.processed,
            report.skipped
        );
        if job.merge {
            let report = merge::merge_book(book_dir, title, &engine)?;
            if !report.skipped && !report.failed.is_empty() {
                log::warn!(
                    "[PIPELINE] Merge excluded {} unrecoverable page(s)",
                    report.failed.len()
                );
            }
        }
    }

    // Stage 3: summaries
    if !job.prompts.is_empty() {
        worker.checkpoint()?;
        if !merged_txt.exists() {
            bail!(
                "cannot summarize: {} does not exist (was merge disabled?)",
                merged_txt.display()
            );
        }
        let client = llm::GeminiClient::from_env(job.model.as_deref())?;
        for prompt_path in &job.prompts {
            worker.checkpoint()?;
            let stem = prompt_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "summary".to_string());
            let output = book_dir.join(format!("{title}_{stem}.md"));
            if output.exists() {
                log::info!(
                    "[PIPELINE] Skipping summary — {} already exists",
                    output.display()
                );
                continue;
            }
            let prompt = std::fs::read_to_string(prompt_path)
                .with_context(|| format!("failed to read prompt {}", prompt_path.display()))?;
            log::info!(
                "[PIPELINE] [3/3] Summarizing {} with prompt '{}'",
                merged_txt.display(),
                stem
            );
            let stats =
                llm::summarize_path_blocking(&client, prompt.trim(), &merged_txt, &output)?;
            log::info!(
                "[PIPELINE] Summary written: {} ({} chars)",
                output.display(),
                stats.chars_written
            );
        }
    }

    log::info!("[PIPELINE] Total: {}ms", start.elapsed().as_millis());
    Ok(())
}

/// OCR every supported image in `dir`, naturally ordered, skipping pages
/// whose PDF and text sidecar both already exist.
pub fn ocr_directory(
    dir: &Path,
    engine: &dyn OcrEngine,
    worker: &WorkerHandle,
) -> Result<OcrRunReport> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && ocr::is_supported_image(p))
        .collect();
    if images.is_empty() {
        bail!("no page images found in {}", dir.display());
    }
    images.sort_by(|a, b| {
        natord::compare(
            &a.file_name().unwrap_or_default().to_string_lossy(),
            &b.file_name().unwrap_or_default().to_string_lossy(),
        )
    });

    let mut report = OcrRunReport::default();
    for image in &images {
        worker.checkpoint()?;
        let out_base = image.with_extension("");
        let pdf = out_base.with_extension("pdf");
        let text = out_base.with_extension("txt");
        if pdf.exists() && text.exists() {
            log::info!(
                "[OCR] {} and {} already exist — skipping",
                pdf.display(),
                text.display()
            );
            report.skipped += 1;
            continue;
        }
        engine.ocr_page(image, &out_base)?;
        report.processed += 1;
    }
    Ok(report)
}

fn count_page_images(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && ocr::is_supported_image(p))
                .count()
        })
        .unwrap_or(0)
}
