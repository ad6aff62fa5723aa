//! OCR domain — searchable-PDF and text-sidecar generation.
//!
//! Production OCR is the `tesseract` CLI invoked per page image with the
//! `pdf txt` output configs, producing `<base>.pdf` and `<base>.txt` next
//! to each other. The [`OcrEngine`] trait is the seam the merge-repair
//! path goes through, so repair is testable without the binary installed.

use crate::worker::WorkerHandle;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Image formats accepted as OCR input.
pub const SUPPORTED_INPUT: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("tesseract binary not found — install tesseract or pass --tesseract")]
    BinaryNotFound,
    #[error("tesseract failed on {} ({status}): {stderr}", .input.display())]
    CommandFailed {
        input: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("tesseract reported success but {} was not produced", .0.display())]
    MissingOutput(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The PDF + text pair produced for one page image.
#[derive(Debug, Clone)]
pub struct PageArtifacts {
    pub pdf: PathBuf,
    pub text: PathBuf,
}

/// OCR one page image into `<out_base>.pdf` and `<out_base>.txt`.
pub trait OcrEngine {
    fn ocr_page(&self, image: &Path, out_base: &Path) -> Result<PageArtifacts, OcrError>;
}

/// The tesseract CLI. When a [`WorkerHandle`] is attached, invocations are
/// tracked so a stop request terminates a running OCR promptly.
pub struct Tesseract {
    binary: PathBuf,
    lang: String,
    worker: Option<WorkerHandle>,
}

impl Tesseract {
    /// Locate the binary: explicit path when given, PATH search otherwise.
    pub fn new(explicit: Option<&Path>, lang: &str) -> Result<Self, OcrError> {
        let binary = match explicit {
            Some(path) if !path.as_os_str().is_empty() => {
                if !path.exists() {
                    return Err(OcrError::BinaryNotFound);
                }
                path.to_path_buf()
            }
            _ => which::which("tesseract").map_err(|_| OcrError::BinaryNotFound)?,
        };
        Ok(Self {
            binary,
            lang: lang.to_string(),
            worker: None,
        })
    }

    pub fn with_worker(mut self, worker: WorkerHandle) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }
}

impl OcrEngine for Tesseract {
    fn ocr_page(&self, image: &Path, out_base: &Path) -> Result<PageArtifacts, OcrError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image)
            .arg(out_base)
            .args(["-l", &self.lang, "pdf", "txt"]);
        log::info!(
            "[OCR] Running: {} {} {} -l {} pdf txt",
            self.binary.display(),
            image.display(),
            out_base.display(),
            self.lang
        );

        let output = match &self.worker {
            Some(worker) => worker.run_tracked(&mut cmd)?,
            None => cmd.output()?,
        };
        if !output.status.success() {
            return Err(OcrError::CommandFailed {
                input: image.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pdf = out_base.with_extension("pdf");
        let text = out_base.with_extension("txt");
        for produced in [&pdf, &text] {
            if !produced.exists() {
                return Err(OcrError::MissingOutput(produced.clone()));
            }
        }
        log::info!("[OCR] Generated {} + {}", pdf.display(), text.display());
        Ok(PageArtifacts { pdf, text })
    }
}

/// True when `path` has a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_INPUT.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_image_extensions() {
        assert!(is_supported_image(Path::new("page_01.png")));
        assert!(is_supported_image(Path::new("page_01.PNG")));
        assert!(is_supported_image(Path::new("scan.tiff")));
        assert!(!is_supported_image(Path::new("page_01.pdf")));
        assert!(!is_supported_image(Path::new("noextension")));
    }

    #[test]
    fn explicit_missing_binary_is_an_error() {
        let err = Tesseract::new(Some(Path::new("/nonexistent/tesseract")), "eng").unwrap_err();
        assert!(matches!(err, OcrError::BinaryNotFound));
    }
}
