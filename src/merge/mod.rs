//! Merge domain — natural-order merge with repair.
//!
//! Takes the per-page PDF/text pairs the OCR stage produced and builds one
//! book PDF and one book text file, ordered by natural (digit-aware)
//! filename sort so `page_10` lands after `page_9`. A page PDF that fails
//! to open is regenerated from its source image through the OCR engine,
//! validated, and only then kept; pages that cannot be repaired are
//! counted and excluded — the merge never aborts just because a subset of
//! pages is bad.

mod pdf;
mod text;

pub use pdf::{load_validated, merge_documents};
pub use text::{decode_text_file, merge_text_files};

use crate::ocr::{OcrEngine, SUPPORTED_INPUT};
use anyhow::{bail, Context, Result};
use lopdf::Document;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Outcome bookkeeping for one merge run.
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Per-page PDFs considered.
    pub pages: usize,
    /// Pages present in the merged output.
    pub merged: usize,
    /// Pages that had to be regenerated from their source image.
    pub repaired: usize,
    /// Pages excluded after repair failed.
    pub failed: Vec<PathBuf>,
    /// Text sidecars replaced by a placeholder line.
    pub unreadable_texts: usize,
    /// True when the merged outputs already existed and nothing was done.
    pub skipped: bool,
}

/// Merge every per-page PDF/text pair in `dir` into `{stem}.pdf` and
/// `{stem}.txt`. Re-running over an already-merged directory is a no-op.
pub fn merge_book(dir: &Path, stem: &str, engine: &dyn OcrEngine) -> Result<MergeReport> {
    let merged_pdf = dir.join(format!("{stem}.pdf"));
    let merged_txt = dir.join(format!("{stem}.txt"));
    if merged_pdf.exists() && merged_txt.exists() {
        log::info!(
            "[MERGE] {} and {} already exist — skipping",
            merged_pdf.display(),
            merged_txt.display()
        );
        return Ok(MergeReport {
            skipped: true,
            ..MergeReport::default()
        });
    }

    let page_pdfs = collect_page_pdfs(dir, stem)?;
    if page_pdfs.is_empty() {
        bail!("no per-page PDFs to merge in {}", dir.display());
    }

    let start = Instant::now();
    let mut report = MergeReport {
        pages: page_pdfs.len(),
        ..MergeReport::default()
    };
    let mut docs = Vec::new();
    let mut texts = Vec::new();

    for page_pdf in &page_pdfs {
        let doc = match pdf::load_validated(page_pdf) {
            Ok(doc) => doc,
            Err(err) => {
                log::warn!("[MERGE] {} is unusable: {:#}", page_pdf.display(), err);
                match repair_page(page_pdf, engine) {
                    Ok(doc) => {
                        log::info!("[MERGE] Repaired {}", page_pdf.display());
                        report.repaired += 1;
                        doc
                    }
                    Err(repair_err) => {
                        log::error!(
                            "[MERGE] Could not repair {}: {:#}",
                            page_pdf.display(),
                            repair_err
                        );
                        report.failed.push(page_pdf.clone());
                        continue;
                    }
                }
            }
        };
        docs.push(doc);
        texts.push(page_pdf.with_extension("txt"));
    }

    if docs.is_empty() {
        bail!(
            "all {} page PDFs in {} failed to load or repair",
            page_pdfs.len(),
            dir.display()
        );
    }
    report.merged = docs.len();

    let mut merged = pdf::merge_documents(docs)?;
    merged
        .save(&merged_pdf)
        .with_context(|| format!("failed to write {}", merged_pdf.display()))?;
    report.unreadable_texts = text::merge_text_files(&texts, &merged_txt)?;

    log::info!(
        "[MERGE] Merged {}/{} page(s) into {} in {}ms ({} repaired, {} failed)",
        report.merged,
        report.pages,
        merged_pdf.display(),
        start.elapsed().as_millis(),
        report.repaired,
        report.failed.len()
    );
    Ok(report)
}

/// Per-page PDFs in `dir`, natural-sorted by file name. The merged output
/// (`{stem}.pdf`) and backup files are excluded.
fn collect_page_pdfs(dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if !is_pdf {
            continue;
        }
        if path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
            continue;
        }
        pdfs.push(path);
    }
    pdfs.sort_by(|a, b| {
        natord::compare(
            &a.file_name().unwrap_or_default().to_string_lossy(),
            &b.file_name().unwrap_or_default().to_string_lossy(),
        )
    });
    Ok(pdfs)
}

/// Regenerate a corrupt page from its source image.
///
/// The current PDF (and its sidecar) are backed up first; the OCR engine
/// rewrites both in place; the regenerated PDF must itself validate before
/// the backups are discarded. On any failure the originals come back.
fn repair_page(page_pdf: &Path, engine: &dyn OcrEngine) -> Result<Document> {
    let image = find_source_image(page_pdf)
        .with_context(|| format!("no same-stem source image for {}", page_pdf.display()))?;
    log::info!(
        "[MERGE] Regenerating {} from {}",
        page_pdf.display(),
        image.display()
    );

    let sidecar = page_pdf.with_extension("txt");
    let pdf_backup = back_up(page_pdf)?;
    let txt_backup = if sidecar.exists() {
        Some(back_up(&sidecar)?)
    } else {
        None
    };

    let out_base = page_pdf.with_extension("");
    let regenerated = engine
        .ocr_page(&image, &out_base)
        .map_err(anyhow::Error::from)
        .and_then(|artifacts| {
            pdf::load_validated(&artifacts.pdf).context("regenerated PDF failed validation")
        });

    match regenerated {
        Ok(doc) => {
            let _ = std::fs::remove_file(&pdf_backup);
            if let Some(bak) = txt_backup {
                let _ = std::fs::remove_file(bak);
            }
            Ok(doc)
        }
        Err(err) => {
            restore(&pdf_backup, page_pdf);
            if let Some(bak) = txt_backup {
                restore(&bak, &sidecar);
            }
            Err(err)
        }
    }
}

/// Same-stem sibling image to regenerate a page from.
fn find_source_image(page_pdf: &Path) -> Option<PathBuf> {
    for ext in SUPPORTED_INPUT {
        let candidate = page_pdf.with_extension(ext);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn back_up(path: &Path) -> Result<PathBuf> {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    let backup = PathBuf::from(name);
    std::fs::copy(path, &backup)
        .with_context(|| format!("failed to back up {}", path.display()))?;
    Ok(backup)
}

fn restore(backup: &Path, original: &Path) {
    if let Err(err) = std::fs::copy(backup, original) {
        log::error!(
            "[MERGE] Failed to restore {} from {}: {}",
            original.display(),
            backup.display(),
            err
        );
        return;
    }
    let _ = std::fs::remove_file(backup);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_pdfs_sort_naturally() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["book_2.pdf", "book_10.pdf", "book_1.pdf", "book.pdf"] {
            std::fs::write(dir.path().join(name), b"stub").unwrap();
        }
        std::fs::write(dir.path().join("book_3.txt"), b"not a pdf").unwrap();

        let pdfs = collect_page_pdfs(dir.path(), "book").unwrap();
        let names: Vec<_> = pdfs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        // the merged output `book.pdf` is excluded, numbers compare numerically
        assert_eq!(names, ["book_1.pdf", "book_2.pdf", "book_10.pdf"]);
    }

    #[test]
    fn source_image_is_found_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book_07.pdf");
        std::fs::write(&pdf, b"stub").unwrap();
        assert!(find_source_image(&pdf).is_none());

        std::fs::write(dir.path().join("book_07.png"), b"img").unwrap();
        assert_eq!(
            find_source_image(&pdf).unwrap(),
            dir.path().join("book_07.png")
        );
    }

    #[test]
    fn backup_names_append_bak() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book_01.pdf");
        std::fs::write(&pdf, b"contents").unwrap();

        let backup = back_up(&pdf).unwrap();
        assert_eq!(backup, dir.path().join("book_01.pdf.bak"));
        assert_eq!(std::fs::read(&backup).unwrap(), b"contents");

        // backups never show up as page candidates
        let pdfs = collect_page_pdfs(dir.path(), "book").unwrap();
        assert_eq!(pdfs.len(), 1);
    }
}
