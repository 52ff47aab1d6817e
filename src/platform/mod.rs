use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::SatchelConfig;
use crate::core::session::ChatMessage;

pub const ENV_PLATFORM_TOKEN: &str = "SATCHEL_PLATFORM_TOKEN";

/// The signed-in platform account.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformUser {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SignInOptions {
    /// Re-fetch the account even when one is already cached.
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    /// Cooperative cancellation; a cancelled call ends silently with no
    /// result (it is not a failure).
    pub cancel: Option<CancellationToken>,
}

/// One incremental text chunk from a streaming chat reply.
pub type ChatChunk = Result<String, String>;
pub type ChatStream = Pin<Box<dyn Stream<Item = ChatChunk> + Send>>;

struct Connected {
    http: reqwest::Client,
    base_url: String,
    token: String,
    user: Mutex<Option<PlatformUser>>,
}

/// Client for the injected cloud platform (auth, AI inference, TTS, blob
/// storage). The platform may simply not be present (SDK not loaded,
/// unsupported environment); that is a normal condition, and every method
/// on an unavailable client degrades to an empty result instead of erring.
#[derive(Clone)]
pub struct PlatformClient {
    inner: Option<Arc<Connected>>,
}

impl PlatformClient {
    /// Build a client from config, falling back to the environment token.
    /// No token means the platform is unavailable.
    pub fn detect(config: &SatchelConfig) -> Self {
        let token = config
            .platform_token
            .clone()
            .or_else(|| std::env::var(ENV_PLATFORM_TOKEN).ok());
        match token {
            Some(token) if !token.is_empty() => {
                log::info!("platform available at {}", config.platform_url);
                Self {
                    inner: Some(Arc::new(Connected {
                        http: reqwest::Client::new(),
                        base_url: config.platform_url.trim_end_matches('/').to_string(),
                        token,
                        user: Mutex::new(None),
                    })),
                }
            }
            _ => {
                log::info!("platform unavailable, cloud features disabled");
                Self::unavailable()
            }
        }
    }

    pub fn unavailable() -> Self {
        Self { inner: None }
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_some()
    }

    // --- auth ---

    pub fn is_signed_in(&self) -> bool {
        match &self.inner {
            Some(c) => c.user.lock().unwrap_or_else(|e| e.into_inner()).is_some(),
            None => false,
        }
    }

    pub fn get_user(&self) -> Option<PlatformUser> {
        let c = self.inner.as_ref()?;
        c.user.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Establish the session. `Ok(None)` when the platform is unavailable.
    pub async fn sign_in(&self, options: &SignInOptions) -> Result<Option<PlatformUser>, String> {
        let Some(c) = &self.inner else {
            return Ok(None);
        };

        if !options.force_refresh {
            let cached = c.user.lock().unwrap_or_else(|e| e.into_inner()).clone();
            if cached.is_some() {
                return Ok(cached);
            }
        }

        let resp = c
            .http
            .get(format!("{}/auth/me", c.base_url))
            .bearer_auth(&c.token)
            .send()
            .await
            .map_err(|e| format!("Sign-in request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("Sign-in rejected: {}", resp.status()));
        }

        let user: PlatformUser = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse account: {}", e))?;
        log::info!("signed in as {}", user.display_name);
        *c.user.lock().unwrap_or_else(|e| e.into_inner()) = Some(user.clone());
        Ok(Some(user))
    }

    pub async fn sign_out(&self) {
        let Some(c) = &self.inner else {
            return;
        };
        c.user.lock().unwrap_or_else(|e| e.into_inner()).take();
        // Best-effort server-side invalidation.
        if let Err(e) = c
            .http
            .post(format!("{}/auth/signout", c.base_url))
            .bearer_auth(&c.token)
            .send()
            .await
        {
            log::debug!("sign-out request failed: {}", e);
        }
    }

    // --- AI ---

    /// One-shot chat completion. `Ok(None)` when the platform is
    /// unavailable or the call was cancelled.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<Option<String>, String> {
        let Some(c) = &self.inner else {
            return Ok(None);
        };

        let body = chat_body(messages, options, false);
        let request = c
            .http
            .post(format!("{}/ai/chat", c.base_url))
            .bearer_auth(&c.token)
            .json(&body)
            .send();

        let resp = match &options.cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::debug!("chat call cancelled");
                        return Ok(None);
                    }
                    resp = request => resp,
                }
            }
            None => request.await,
        }
        .map_err(|e| format!("Chat request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("Chat error {}: {}", status, text));
        }

        let reply: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse chat reply: {}", e))?;
        let text = reply["text"]
            .as_str()
            .ok_or_else(|| "No text in chat reply".to_string())?;
        Ok(Some(text.to_string()))
    }

    /// Streaming chat completion: an async sequence of incremental text
    /// chunks. `Ok(None)` when the platform is unavailable.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<Option<ChatStream>, String> {
        let Some(c) = &self.inner else {
            return Ok(None);
        };

        let body = chat_body(messages, options, true);
        let resp = c
            .http
            .post(format!("{}/ai/chat", c.base_url))
            .bearer_auth(&c.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Chat request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("Chat error {}", resp.status()));
        }

        let cancel = options.cancel.clone();
        let bytes = resp.bytes_stream();
        let stream = futures::stream::unfold(
            (bytes, String::new(), cancel),
            |(mut bytes, mut buf, cancel)| async move {
                loop {
                    if let Some(token) = &cancel {
                        if token.is_cancelled() {
                            log::debug!("chat stream cancelled");
                            return None;
                        }
                    }
                    if let Some(pos) = buf.find('\n') {
                        let line = buf[..pos].trim().to_string();
                        buf.drain(..=pos);
                        match parse_stream_line(&line) {
                            StreamLine::Delta(text) => {
                                return Some((Ok(text), (bytes, buf, cancel)));
                            }
                            StreamLine::Done => return None,
                            StreamLine::Skip => continue,
                            StreamLine::Bad(e) => {
                                return Some((Err(e), (bytes, buf, cancel)));
                            }
                        }
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => buf.push_str(&String::from_utf8_lossy(&chunk)),
                        Some(Err(e)) => {
                            return Some((Err(format!("Stream error: {}", e)), (bytes, buf, cancel)));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(Some(Box::pin(stream)))
    }

    /// OCR step of the flashcard pipeline: extract text from an image.
    pub async fn extract_text(&self, image: Vec<u8>) -> Result<Option<String>, String> {
        let Some(c) = &self.inner else {
            return Ok(None);
        };

        let resp = c
            .http
            .post(format!("{}/ai/extract-text", c.base_url))
            .bearer_auth(&c.token)
            .header("content-type", "application/octet-stream")
            .body(image)
            .send()
            .await
            .map_err(|e| format!("Extraction request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("Extraction error {}", resp.status()));
        }

        let reply: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse extraction reply: {}", e))?;
        let text = reply["text"]
            .as_str()
            .ok_or_else(|| "No text in extraction reply".to_string())?;
        Ok(Some(text.to_string()))
    }

    /// Text-to-speech. Returns encoded audio bytes.
    pub async fn speak(&self, text: &str, voice: Option<&str>) -> Result<Option<Vec<u8>>, String> {
        let Some(c) = &self.inner else {
            return Ok(None);
        };

        let body = serde_json::json!({
            "text": text,
            "voice": voice,
        });
        let resp = c
            .http
            .post(format!("{}/ai/tts", c.base_url))
            .bearer_auth(&c.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("TTS request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("TTS error {}", resp.status()));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| format!("Failed to read TTS audio: {}", e))?;
        Ok(Some(audio.to_vec()))
    }

    // --- cloud blob storage ---

    /// Read a JSON blob from the user's cloud store. `Ok(None)` when the
    /// platform is unavailable or the key has never been written.
    pub async fn get_blob(&self, key: &str) -> Result<Option<serde_json::Value>, String> {
        let Some(c) = &self.inner else {
            return Ok(None);
        };

        let resp = c
            .http
            .get(format!("{}/storage/{}", c.base_url, key))
            .bearer_auth(&c.token)
            .send()
            .await
            .map_err(|e| format!("Storage read failed: {}", e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(format!("Storage read error {}", resp.status()));
        }

        let value = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse blob '{}': {}", key, e))?;
        Ok(Some(value))
    }

    /// Write a JSON blob. Errors when the platform is unavailable: pushes
    /// must propagate so the caller can surface a sync error.
    pub async fn put_blob(&self, key: &str, value: &serde_json::Value) -> Result<(), String> {
        let Some(c) = &self.inner else {
            return Err("Platform unavailable".to_string());
        };

        let resp = c
            .http
            .put(format!("{}/storage/{}", c.base_url, key))
            .bearer_auth(&c.token)
            .json(value)
            .send()
            .await
            .map_err(|e| format!("Storage write failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("Storage write error {}", resp.status()));
        }
        Ok(())
    }
}

fn chat_body(messages: &[ChatMessage], options: &ChatOptions, stream: bool) -> serde_json::Value {
    let msgs: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                // Cap message bodies to stay within token budget
                "content": m.content.chars().take(8000).collect::<String>(),
            })
        })
        .collect();
    serde_json::json!({
        "messages": msgs,
        "system": options.system,
        "max_tokens": options.max_tokens.unwrap_or(1024),
        "stream": stream,
    })
}

enum StreamLine {
    Delta(String),
    Done,
    Skip,
    Bad(String),
}

fn parse_stream_line(line: &str) -> StreamLine {
    let Some(data) = line.strip_prefix("data: ") else {
        return StreamLine::Skip;
    };
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(v) => match v["delta"].as_str() {
            Some(text) => StreamLine::Delta(text.to_string()),
            None => StreamLine::Skip,
        },
        Err(e) => StreamLine::Bad(format!("Bad stream chunk: {}", e)),
    }
}

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").expect("static regex"));

/// Strip a surrounding markdown code fence from an AI reply, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    match CODE_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str()),
        None => trimmed,
    }
}

/// Parse a JSON value out of an AI reply, tolerating markdown fences.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let json_str = strip_code_fences(text);
    serde_json::from_str(json_str)
        .map_err(|e| format!("Failed to parse AI reply: {} — raw: {}", e, text))
}
