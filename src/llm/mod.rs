//! LLM domain — Gemini summarization.
//!
//! Public API for the summarize stage. External code should only use the
//! items exported here.
//!
//! Shared:
//!   - streaming.rs — SSE parsing + raw-body salvage
//!   - gemini.rs    — client, retry/backoff, file upload lifecycle

mod gemini;
pub mod streaming;

pub use gemini::{
    summarize_path_blocking, GeminiClient, RemoteFile, SummaryStats, DEFAULT_MODEL,
    INLINE_TEXT_LIMIT,
};
