use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::time::Duration;

use super::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};
use super::{LanguagePair, TextTranslator, TranslateFuture, TranslationOutcome};

pub(crate) const DEFAULT_BASE_URL: &str = "https://translate.googleapis.com/translate_a/single";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for the public `translate_a/single` JSON endpoint.
#[derive(Debug, Clone)]
pub struct RemoteTranslator {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl Default for RemoteTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteTranslator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        if !base_url.trim().is_empty() {
            self.base_url = base_url;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    async fn call(&self, text: &str, pair: &LanguagePair) -> Result<String> {
        let mut attempt = 0usize;
        let mut delay = RATE_LIMIT_BASE_DELAY;
        loop {
            attempt += 1;
            let response = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("client", "gtx"),
                    ("sl", pair.source.as_str()),
                    ("tl", pair.target.as_str()),
                    ("dt", "t"),
                    ("q", text),
                ])
                .timeout(self.timeout)
                .send()
                .await
                .with_context(|| "translation request failed")?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            if status.is_success() {
                return parse_response(&body);
            }
            if is_rate_limited(status, &body) && attempt < RATE_LIMIT_MAX_RETRIES {
                delay = wait_with_backoff("translate", attempt, delay, retry_after).await;
                continue;
            }
            return Err(anyhow!(
                "translation API error ({}): {}",
                status,
                body.chars().take(200).collect::<String>()
            ));
        }
    }
}

impl TextTranslator for RemoteTranslator {
    fn name(&self) -> &str {
        "remote"
    }

    fn translate<'a>(&'a self, text: &'a str, pair: &'a LanguagePair) -> TranslateFuture<'a> {
        Box::pin(async move {
            let translated = self.call(text, pair).await?;
            Ok(TranslationOutcome::Translated(translated))
        })
    }
}

/// The payload is `[[["translated", "source", ...], ...], ...]`; the first
/// element of every segment is concatenated.
fn parse_response(body: &str) -> Result<String> {
    let value: Value =
        serde_json::from_str(body).with_context(|| "translation response is not JSON")?;
    let segments = value
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("translation response has no segments"))?;
    let translated = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect::<String>();
    let translated = translated.trim();
    if translated.is_empty() {
        return Err(anyhow!("translation response is empty"));
    }
    Ok(translated.to_string())
}
