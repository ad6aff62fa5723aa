//! Text side of the merge — concatenate per-page sidecars with a legacy
//! encoding fallback.
//!
//! Sidecars are normally UTF-8; scans of Korean material occasionally
//! arrive in EUC-KR from older tooling. Decode falls back before giving
//! up, and a file that decodes under neither encoding becomes a
//! placeholder line rather than aborting the whole merge.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Read a text file as UTF-8, falling back to EUC-KR.
pub fn decode_text_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            let bytes = err.into_bytes();
            let (decoded, _, had_errors) = encoding_rs::EUC_KR.decode(&bytes);
            if had_errors {
                bail!("{} is neither UTF-8 nor EUC-KR", path.display());
            }
            log::debug!("[MERGE] Decoded {} via EUC-KR fallback", path.display());
            Ok(decoded.into_owned())
        }
    }
}

/// Concatenate `files` in order into `output`. Returns how many files were
/// unreadable and replaced by a placeholder line.
pub fn merge_text_files(files: &[PathBuf], output: &Path) -> Result<usize> {
    let mut out = std::io::BufWriter::new(
        std::fs::File::create(output)
            .with_context(|| format!("failed to create {}", output.display()))?,
    );
    let mut unreadable = 0;
    for file in files {
        match decode_text_file(file) {
            Ok(text) => out.write_all(text.as_bytes())?,
            Err(err) => {
                log::warn!("[MERGE] Unreadable text sidecar: {:#}", err);
                writeln!(out, "[unreadable page text: {}]", file.display())?;
                unreadable += 1;
            }
        }
    }
    out.flush()?;
    log::info!(
        "[MERGE] Wrote {} from {} text file(s) ({} unreadable)",
        output.display(),
        files.len(),
        unreadable
    );
    Ok(unreadable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.txt");
        std::fs::write(&path, "plain utf-8 페이지\n").unwrap();
        assert_eq!(decode_text_file(&path).unwrap(), "plain utf-8 페이지\n");
    }

    #[test]
    fn euc_kr_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.txt");
        let korean = "한글 인코딩 시험\n";
        let (encoded, _, _) = encoding_rs::EUC_KR.encode(korean);
        std::fs::write(&path, &encoded).unwrap();

        assert_eq!(decode_text_file(&path).unwrap(), korean);
    }

    #[test]
    fn unreadable_file_becomes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.txt");
        let bad = dir.path().join("b.txt");
        std::fs::write(&good, "first page\n").unwrap();
        // 0x81 0xff is invalid in both UTF-8 and EUC-KR
        std::fs::write(&bad, [0x81u8, 0xff, 0x81, 0xff]).unwrap();

        let out = dir.path().join("merged.txt");
        let unreadable =
            merge_text_files(&[good.clone(), bad.clone()], &out).unwrap();
        assert_eq!(unreadable, 1);

        let merged = std::fs::read_to_string(&out).unwrap();
        assert!(merged.starts_with("first page\n"));
        assert!(merged.contains("[unreadable page text:"));
    }
}
