//! Gemini summarization — streaming SSE via the Google AI API.
//!
//! Endpoint specifics:
//! - API key in URL query param, not a header
//! - SSE events are `data: {...}` lines without `event:` prefix
//! - Text chunks in `candidates[0].content.parts[*].text`
//! - Token usage in `usageMetadata` of the final chunk
//!
//! Chunks are appended and flushed to the output file as they arrive, so a
//! dying stream still leaves partial content on disk. A stream that yields
//! nothing parseable gets one salvage pass over the raw body; after the
//! retry budget is spent an error marker is written so the output file is
//! never silently absent.

use super::streaming;
use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-05-20";
pub const MAX_OUTPUT_TOKENS: u32 = 65_535;

/// Inputs larger than this go through the Files API instead of inline.
pub const INLINE_TEXT_LIMIT: usize = 256 * 1024;

const API_BASE: &str = "https://generativelanguage.googleapis.com";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);
const READ_TIMEOUT: Duration = Duration::from_secs(1200);

const MAX_RETRIES: u32 = 5;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const RETRY_MULTIPLIER: u32 = 2;

const TEMPERATURE: f64 = 0.2;
const TOP_P: f64 = 0.9;
const TOP_K: u32 = 40;

const ERROR_MARKER: &str =
    "Error processing document. The API response could not be parsed correctly.\n";

#[derive(Debug, Default)]
pub struct SummaryStats {
    pub chars_written: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Content came from the raw-body salvage pass, not the SSE stream.
    pub salvaged: bool,
}

/// A file uploaded through the Files API.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Resource name, e.g. `files/abc-123`.
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

struct StreamFailure {
    message: String,
    retryable: bool,
}

impl StreamFailure {
    fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

pub struct GeminiClient {
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl GeminiClient {
    /// Build a client from `GEMINI_API_KEY` (or `GOOGLE_API_KEY`).
    pub fn from_env(model: Option<&str>) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok().filter(|k| !k.is_empty()))
            .context("no GEMINI_API_KEY or GOOGLE_API_KEY set — put one in .env or the environment")?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Summarize inline text, streaming the response into `output`.
    pub async fn summarize_text(
        &self,
        prompt: &str,
        text: &str,
        output: &Path,
    ) -> Result<SummaryStats> {
        let full_prompt = format!("{prompt}\n\n{text}");
        let contents = json!([{ "role": "user", "parts": [{ "text": full_prompt }] }]);
        self.generate_streaming(contents, output).await
    }

    /// Summarize a previously uploaded file.
    pub async fn summarize_remote(
        &self,
        prompt: &str,
        file: &RemoteFile,
        output: &Path,
    ) -> Result<SummaryStats> {
        let contents = json!([{
            "role": "user",
            "parts": [
                { "file_data": { "file_uri": file.uri, "mime_type": file.mime_type } },
                { "text": prompt }
            ]
        }]);
        self.generate_streaming(contents, output).await
    }

    /// Summarize a text file on disk, routing through the Files API when it
    /// is too large to inline. An uploaded file is deleted afterwards even
    /// when generation fails; a failed delete is only a warning.
    pub async fn summarize_path(
        &self,
        prompt: &str,
        input: &Path,
        output: &Path,
    ) -> Result<SummaryStats> {
        let text = crate::merge::decode_text_file(input)?;
        if text.len() <= INLINE_TEXT_LIMIT {
            return self.summarize_text(prompt, &text, output).await;
        }

        log::info!(
            "[LLM] Input is {} bytes — uploading via the Files API",
            text.len()
        );
        let remote = self.upload_text(&text).await?;
        let result = self.summarize_remote(prompt, &remote, output).await;
        if let Err(err) = self.delete_file(&remote).await {
            log::warn!(
                "[LLM] Failed to delete uploaded file {}: {:#}",
                remote.name,
                err
            );
        }
        result
    }

    async fn generate_streaming(
        &self,
        contents: serde_json::Value,
        output: &Path,
    ) -> Result<SummaryStats> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut delay = INITIAL_RETRY_DELAY;
        for attempt in 1..=MAX_RETRIES {
            match self.try_generate(&contents, output).await {
                Ok(stats) => return Ok(stats),
                Err(failure) if failure.retryable && attempt < MAX_RETRIES => {
                    log::warn!(
                        "[LLM] Attempt {}/{} failed: {} — retrying in {:?}",
                        attempt,
                        MAX_RETRIES,
                        failure.message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * RETRY_MULTIPLIER).min(MAX_RETRY_DELAY);
                }
                Err(failure) => {
                    log::error!(
                        "[LLM] Giving up after {} attempt(s): {}",
                        attempt,
                        failure.message
                    );
                    let _ = std::fs::write(output, ERROR_MARKER);
                    return Err(anyhow!(failure.message));
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    async fn try_generate(
        &self,
        contents: &serde_json::Value,
        output: &Path,
    ) -> Result<SummaryStats, StreamFailure> {
        let url = format!(
            "{API_BASE}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.model, self.api_key
        );
        log::info!("[LLM] Model: {} (streaming)", self.model);

        let start = Instant::now();
        let mut response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&json!({
                "contents": contents,
                "generationConfig": {
                    "maxOutputTokens": MAX_OUTPUT_TOKENS,
                    "temperature": TEMPERATURE,
                    "topP": TOP_P,
                    "topK": TOP_K,
                    "responseMimeType": "text/plain"
                }
            }))
            .send()
            .await
            .map_err(|e| StreamFailure::transient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            let failure = format!("Gemini API returned {status}: {body}");
            return Err(if retryable {
                StreamFailure::transient(failure)
            } else {
                StreamFailure::fatal(failure)
            });
        }
        log::info!("[LLM] TTFB: {}ms", start.elapsed().as_millis());

        let mut out = std::fs::File::create(output)
            .map_err(|e| StreamFailure::fatal(format!("cannot create {}: {e}", output.display())))?;

        let mut sse_buffer = String::new();
        let mut raw_body = String::new();
        let mut stats = SummaryStats::default();
        let mut ttft_logged = false;
        let mut stream_failed = false;

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let chunk_str = String::from_utf8_lossy(&chunk);
                    raw_body.push_str(&chunk_str);
                    sse_buffer.push_str(&chunk_str);

                    for data in streaming::parse_data_only_sse_events(&mut sse_buffer) {
                        if let Some(delta) = streaming::extract_stream_text(&data) {
                            if !ttft_logged && !delta.is_empty() {
                                log::info!("[LLM] TTFT: {}ms", start.elapsed().as_millis());
                                ttft_logged = true;
                            }
                            out.write_all(delta.as_bytes()).map_err(|e| {
                                StreamFailure::fatal(format!(
                                    "cannot write {}: {e}",
                                    output.display()
                                ))
                            })?;
                            let _ = out.flush();
                            stats.chars_written += delta.chars().count();
                        }

                        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&data) {
                            if let Some(usage) = json.get("usageMetadata") {
                                stats.input_tokens =
                                    usage["promptTokenCount"].as_u64().unwrap_or(0);
                                stats.output_tokens =
                                    usage["candidatesTokenCount"].as_u64().unwrap_or(0);
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("[LLM] Stream error: {e}");
                    stream_failed = true;
                    break;
                }
            }
        }

        let api_ms = start.elapsed().as_millis();
        log::info!("[LLM] Stream complete: {}ms", api_ms);
        if stats.input_tokens > 0 || stats.output_tokens > 0 {
            log::info!("[LLM] Input tokens: {}", stats.input_tokens);
            log::info!("[LLM] Output tokens: {}", stats.output_tokens);
        }

        if stats.chars_written == 0 {
            // Salvage whatever text fragments survive in the raw body
            // before giving this attempt up.
            let scraped = streaming::salvage_text_fragments(&raw_body);
            if !scraped.is_empty() {
                log::warn!(
                    "[LLM] Stream yielded no parsed content — salvaged {} chars from the raw body",
                    scraped.chars().count()
                );
                out.write_all(scraped.as_bytes()).map_err(|e| {
                    StreamFailure::fatal(format!("cannot write {}: {e}", output.display()))
                })?;
                let _ = out.flush();
                stats.chars_written = scraped.chars().count();
                stats.salvaged = true;
            } else if stream_failed {
                return Err(StreamFailure::transient(
                    "stream aborted with no salvageable content",
                ));
            } else {
                return Err(StreamFailure::transient("empty response received from API"));
            }
        } else if stream_failed {
            log::warn!(
                "[LLM] Stream died after {} chars — keeping partial content",
                stats.chars_written
            );
        }

        log::info!(
            "[LLM] Wrote {} chars to {}",
            stats.chars_written,
            output.display()
        );
        Ok(stats)
    }

    /// Upload text through the Files API (`uploadType=media`).
    async fn upload_text(&self, text: &str) -> Result<RemoteFile> {
        let url = format!(
            "{API_BASE}/upload/v1beta/files?uploadType=media&key={}",
            self.api_key
        );
        let response = self
            .http
            .post(&url)
            .header("content-type", "text/plain")
            .body(text.to_string())
            .send()
            .await
            .context("file upload request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("file upload returned {status}: {body}");
        }

        let json: serde_json::Value = response.json().await?;
        let file = json.get("file").context("upload response missing `file`")?;
        let remote = RemoteFile {
            name: file["name"]
                .as_str()
                .context("upload response missing file name")?
                .to_string(),
            uri: file["uri"]
                .as_str()
                .context("upload response missing file uri")?
                .to_string(),
            mime_type: file["mimeType"].as_str().unwrap_or("text/plain").to_string(),
        };
        log::info!("[LLM] Uploaded {} ({} bytes)", remote.name, text.len());
        Ok(remote)
    }

    /// Delete an uploaded file.
    pub async fn delete_file(&self, file: &RemoteFile) -> Result<()> {
        let url = format!("{API_BASE}/v1beta/{}?key={}", file.name, self.api_key);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .context("file delete request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("file delete returned {status}: {body}");
        }
        log::info!("[LLM] Deleted uploaded file {}", file.name);
        Ok(())
    }
}

/// Bridge for the synchronous pipeline thread: re-enter the ambient tokio
/// runtime when one exists (the CLI's), otherwise spin up a small one.
pub fn summarize_path_blocking(
    client: &GeminiClient,
    prompt: &str,
    input: &Path,
    output: &Path,
) -> Result<SummaryStats> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.block_on(client.summarize_path(prompt, input, output)),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(client.summarize_path(prompt, input, output)),
    }
}
