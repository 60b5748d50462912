use anyhow::{Context, Result, anyhow};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::debug_log::DebugLog;
use crate::filter::{is_blacklisted, is_garbage_translation, normalize_text};

mod local;
mod remote;
mod retry;
mod validate;

pub use local::{LoadFuture, LocalModelCache, LocalModelLoader, ModelKey, NoLocalModel};
pub use remote::RemoteTranslator;
pub use validate::is_hallucinated;

/// Result of one translation attempt. Rejection is an expected outcome of
/// quality gating, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Translated(String),
    Rejected,
}

impl TranslationOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            TranslationOutcome::Translated(text) => Some(text),
            TranslationOutcome::Rejected => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, TranslationOutcome::Rejected)
    }
}

pub type TranslateFuture<'a> = Pin<Box<dyn Future<Output = Result<TranslationOutcome>> + Send + 'a>>;

/// One translation backend: a remote service or an in-process model.
pub trait TextTranslator: Send + Sync {
    fn name(&self) -> &str;
    fn translate<'a>(&'a self, text: &'a str, pair: &'a LanguagePair) -> TranslateFuture<'a>;
}

/// Language pairs that have a dedicated local model.
const DEDICATED_PAIRS: &[(&str, &str)] = &[
    ("ja", "en"),
    ("zh", "en"),
    ("ko", "en"),
    ("fr", "en"),
    ("de", "en"),
    ("es", "en"),
    ("en", "ja"),
    ("en", "zh"),
    ("en", "ko"),
    ("en", "fr"),
    ("en", "de"),
    ("en", "es"),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn resolve(source: &str, target: &str) -> Self {
        Self {
            source: normalize_lang_tag(source),
            target: normalize_lang_tag(target),
        }
    }

    /// Dedicated pairs get their own model; everything else shares one.
    pub fn model_key(&self) -> ModelKey {
        let dedicated = DEDICATED_PAIRS
            .iter()
            .any(|(source, target)| *source == self.source && *target == self.target);
        if dedicated {
            ModelKey::Pair(self.source.clone(), self.target.clone())
        } else {
            ModelKey::Shared
        }
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// Reduces ISO 639-1/2/3 tags, script suffixes and tesseract pack names to a
/// two-letter code where one is known.
pub fn normalize_lang_tag(tag: &str) -> String {
    let lower = tag.trim().to_lowercase();
    let base = lower.split(['-', '_']).next().unwrap_or("").to_string();
    let mapped = match base.as_str() {
        "" | "auto" => "auto",
        "ja" | "jp" | "jpn" => "ja",
        "zh" | "zho" | "chi" | "cmn" => "zh",
        "ko" | "kor" => "ko",
        "en" | "eng" => "en",
        "fr" | "fra" | "fre" => "fr",
        "de" | "deu" | "ger" => "de",
        "es" | "spa" => "es",
        "it" | "ita" => "it",
        "pt" | "por" => "pt",
        "ru" | "rus" => "ru",
        "vi" | "vie" => "vi",
        "th" | "tha" => "th",
        other => other,
    };
    mapped.to_string()
}

/// Turns one source string into one translated string: blacklist, remote,
/// then the cached local model, validating whatever comes back.
pub struct Orchestrator {
    remote: Option<Arc<dyn TextTranslator>>,
    local: LocalModelCache,
    log: DebugLog,
}

impl Orchestrator {
    pub fn new(
        remote: Option<Arc<dyn TextTranslator>>,
        local: LocalModelCache,
        log: DebugLog,
    ) -> Self {
        Self { remote, local, log }
    }

    pub fn local_models(&self) -> &LocalModelCache {
        &self.local
    }

    pub async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<TranslationOutcome> {
        let text = normalize_text(text);
        if is_blacklisted(&text) {
            debug!("skipping blacklisted input '{}'", text);
            return Ok(TranslationOutcome::Rejected);
        }
        let pair = LanguagePair::resolve(source, target);

        match self.translate_remote(&text, &pair).await {
            Ok(outcome) => return Ok(self.validate(outcome)),
            Err(err) => self.log.warn(format!(
                "remote translation failed ({}), falling back to local model: {:#}",
                pair, err
            )),
        }

        let key = pair.model_key();
        let model = self
            .local
            .get_or_load(&key)
            .await
            .with_context(|| format!("failed to load local model {}", key))?;
        let outcome = model
            .translate(&text, &pair)
            .await
            .with_context(|| format!("local model {} failed", model.name()))?;
        Ok(self.validate(outcome))
    }

    async fn translate_remote(&self, text: &str, pair: &LanguagePair) -> Result<TranslationOutcome> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| anyhow!("no remote translator configured"))?;
        remote.translate(text, pair).await
    }

    fn validate(&self, outcome: TranslationOutcome) -> TranslationOutcome {
        match outcome {
            TranslationOutcome::Translated(text) if is_garbage_translation(&text) => {
                debug!("rejecting degenerate translation '{}'", text);
                TranslationOutcome::Rejected
            }
            other => other,
        }
    }
}
