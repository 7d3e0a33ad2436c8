//! LmClient: streaming completion calls to the configured language model
//! (spec §4.9's "LM client" component), used by every agent as a stateless
//! text-in/text-out call.
//!
//! Grounded in `original_source/jelly/agents/base.py`'s `BaseAgent.call()`:
//! a single system+user message pair, a fixed (non-jittered) retry
//! schedule, and response accumulation from a streamed reply so a long
//! generation doesn't trip an overall request timeout. The retry schedule
//! here is deliberately distinct from [`crate::mcp::retry::RetryConfig`]'s
//! exponential-backoff-with-jitter: this one is a simple doubling schedule
//! capped at `max_delay_ms`, derived straight from `config.lm`.

use crate::config::LmConfig;
use crate::log_sink::{Level, LogSink};
use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;

pub struct LmClient {
    http: reqwest::Client,
    config: LmConfig,
    log: LogSink,
}

impl LmClient {
    pub fn new(config: &LmConfig, log: &LogSink) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("failed to build LM HTTP client");
        Self {
            http,
            config: config.clone(),
            log: log.child(vec![("component".into(), json!("lm_client"))]),
        }
    }

    /// Run a single system/user completion, retrying transport and
    /// non-2xx failures on the configured fixed schedule.
    pub async fn complete(&self, system_prompt: &str, user_prompt: &str, max_tokens: u32) -> Result<String> {
        let api_key = std::env::var(&self.config.api_key_env)
            .with_context(|| format!("{} is not set", self.config.api_key_env))?;

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..self.config.max_attempts {
            match self
                .try_once(&api_key, system_prompt, user_prompt, max_tokens)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) => {
                    self.log.event(
                        Level::Warning,
                        "lm_client",
                        "complete.attempt_failed",
                        vec![
                            ("attempt".into(), json!(attempt)),
                            ("error".into(), json!(e.to_string())),
                        ],
                    );
                    last_err = Some(e);
                    if attempt + 1 < self.config.max_attempts {
                        tokio::time::sleep(self.delay_for(attempt)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("LM call failed with no attempts made")))
    }

    /// Doubling delay capped at `max_delay_ms`, e.g. with defaults
    /// 1000/2000/4000ms for attempts 0/1/2 (mirrors the 1s/2s/4s schedule
    /// the original agent base class hardcoded).
    fn delay_for(&self, attempt: usize) -> Duration {
        let doubled = self.config.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(doubled.min(self.config.max_delay_ms))
    }

    async fn try_once(&self, api_key: &str, system_prompt: &str, user_prompt: &str, max_tokens: u32) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "stream": true,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let url = format!("{}/chat/completions", self.config.api_base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("LM request failed to send")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("LM request returned {status}: {text}");
        }

        accumulate_stream(response).await
    }
}

/// Accumulate an OpenAI-style `text/event-stream` of
/// `data: {"choices":[{"delta":{"content":"..."}}]}` lines into one string,
/// stopping at the `data: [DONE]` sentinel.
async fn accumulate_stream(response: reqwest::Response) -> Result<String> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut out = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("LM stream read failed")?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim_end_matches('\r').to_string();
            buffer.drain(..=pos);
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                return Ok(out);
            }
            if let Ok(value) = serde_json::from_str::<Value>(data) {
                if let Some(delta) = extract_delta_text(&value) {
                    out.push_str(&delta);
                }
            }
        }
    }

    Ok(out)
}

fn extract_delta_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.get(0)?;
    if let Some(text) = choice.get("delta").and_then(|d| d.get("content")).and_then(|c| c.as_str()) {
        return Some(text.to_string());
    }
    // Fall back to a non-streamed shape, in case a server ignores `stream: true`.
    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_log() -> LogSink {
        let dir = tempfile::tempdir().unwrap();
        LogSink::create(dir.path(), Level::Info, None).unwrap()
    }

    #[test]
    fn delay_schedule_doubles_and_caps() {
        let config = LmConfig {
            base_delay_ms: 1000,
            max_delay_ms: 4000,
            ..LmConfig::default()
        };
        let client = LmClient::new(&config, &dummy_log());
        assert_eq!(client.delay_for(0), Duration::from_millis(1000));
        assert_eq!(client.delay_for(1), Duration::from_millis(2000));
        assert_eq!(client.delay_for(2), Duration::from_millis(4000));
        assert_eq!(client.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn extract_delta_text_reads_streaming_shape() {
        let value = json!({"choices": [{"delta": {"content": "hello"}}]});
        assert_eq!(extract_delta_text(&value), Some("hello".to_string()));
    }

    #[test]
    fn extract_delta_text_falls_back_to_message_shape() {
        let value = json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_delta_text(&value), Some("hi".to_string()));
    }

    #[tokio::test]
    async fn missing_api_key_env_fails_fast() {
        let config = LmConfig {
            api_key_env: "BUILDER_LM_API_KEY_TEST_UNSET_XYZ".to_string(),
            ..LmConfig::default()
        };
        std::env::remove_var(&config.api_key_env);
        let client = LmClient::new(&config, &dummy_log());
        let result = client.complete("sys", "user", 100).await;
        assert!(result.is_err());
    }
}
