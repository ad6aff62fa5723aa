//! Bookshot — book-scanning pipeline for macOS.
//!
//! Capture a paginated viewer window page by page, OCR the captures into
//! searchable PDFs and text sidecars, merge them in natural page order
//! (repairing corrupt pages from their source images), and optionally
//! summarize the extracted text through Gemini.
//!
//! This is the crate root: module declarations only. Orchestration lives
//! in pipeline.rs, the CLI in main.rs.

pub mod capture;
pub mod llm;
pub mod merge;
pub mod ocr;
pub mod pipeline;
pub mod settings;
pub mod worker;
