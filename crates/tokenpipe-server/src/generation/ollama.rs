use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::source::{TokenSource, TokenStream};
use super::GenerationError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Streams completions from an Ollama server (`POST /api/generate`, NDJSON body).
#[derive(Clone)]
pub struct OllamaSource {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaSource {
    pub fn new(base_url: &str, model: &str, temperature: f32) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl TokenSource for OllamaSource {
    async fn generate(
        &self,
        cancel: CancellationToken,
        prompt: &str,
    ) -> Result<TokenStream, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };

        let send = self.http_client.post(&url).json(&request).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Ok(stream::empty().boxed()),
            resp = send => resp.map_err(|e| GenerationError::Source(format!("network error: {}", e)))?,
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, model = %self.model, "ollama rejected generate request");
            return Err(GenerationError::Source(format!(
                "ollama returned {}: {}",
                status, body
            )));
        }

        tracing::debug!(model = %self.model, "ollama stream opened");

        let body = resp.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed();
        let reader = NdjsonReader {
            body,
            decoder: NdjsonDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
            cancel,
        };

        let tokens = stream::unfold(reader, |mut reader| async move {
            reader.next_item().await.map(|item| (item, reader))
        });
        Ok(tokens.boxed())
    }
}

struct NdjsonReader {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<String, GenerationError>>,
    finished: bool,
    cancel: CancellationToken,
}

impl NdjsonReader {
    async fn next_item(&mut self) -> Option<Result<String, GenerationError>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.finished || self.cancel.is_cancelled() {
                return None;
            }

            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                chunk = self.body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    let decoded = self.decoder.push(&bytes);
                    self.absorb(decoded);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(GenerationError::Source(format!("stream error: {}", e))));
                }
                None => {
                    let decoded = self.decoder.finish();
                    self.absorb(decoded);
                    self.finished = true;
                }
            }
        }
    }

    fn absorb(&mut self, decoded: Vec<Decoded>) {
        for item in decoded {
            if self.finished {
                return;
            }
            match item {
                Decoded::Token(text) => self.pending.push_back(Ok(text)),
                Decoded::Done => self.finished = true,
                Decoded::Error(message) => {
                    self.pending.push_back(Err(GenerationError::Source(message)));
                    self.finished = true;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Decoded {
    Token(String),
    Done,
    Error(String),
}

/// Splits a byte stream into JSON lines; chunks may cut lines anywhere.
#[derive(Default)]
struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Decoded> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            decode_line(&line, &mut out);
        }
        out
    }

    fn finish(&mut self) -> Vec<Decoded> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest, &mut out);
        out
    }
}

fn decode_line(line: &[u8], out: &mut Vec<Decoded>) {
    let line = line.trim_ascii();
    if line.is_empty() {
        return;
    }
    match serde_json::from_slice::<GenerateChunk>(line) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                out.push(Decoded::Error(error));
                return;
            }
            if !chunk.response.is_empty() {
                out.push(Decoded::Token(chunk.response));
            }
            if chunk.done {
                out.push(Decoded::Done);
            }
        }
        Err(e) => out.push(Decoded::Error(format!("malformed chunk: {}", e))),
    }
}
