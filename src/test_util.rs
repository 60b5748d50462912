use anyhow::anyhow;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::delivery::{Ack, DeliveryError, DeliveryFuture, MessageChannel, TabId, TranslateRequest};
use crate::recognition::{ImageSource, RecognitionResult, RecognizeFuture, Recognizer};
use crate::translate::{
    LanguagePair, LoadFuture, LocalModelLoader, ModelKey, TextTranslator, TranslateFuture,
    TranslationOutcome,
};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
    Panic(String),
}

/// Translator double with a default reply and optional per-input overrides.
pub(crate) struct FakeTranslator {
    reply: Reply,
    overrides: HashMap<String, Reply>,
    calls: AtomicUsize,
}

impl FakeTranslator {
    pub(crate) fn replying(text: &str) -> Self {
        Self::with_reply(Reply::Text(text.to_string()))
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self::with_reply(Reply::Fail(message.to_string()))
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            overrides: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn replying_to(mut self, input: &str, text: &str) -> Self {
        self.overrides
            .insert(input.to_string(), Reply::Text(text.to_string()));
        self
    }

    pub(crate) fn failing_on(mut self, input: &str, message: &str) -> Self {
        self.overrides
            .insert(input.to_string(), Reply::Fail(message.to_string()));
        self
    }

    pub(crate) fn panicking_on(mut self, input: &str, message: &str) -> Self {
        self.overrides
            .insert(input.to_string(), Reply::Panic(message.to_string()));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextTranslator for FakeTranslator {
    fn name(&self) -> &str {
        "fake"
    }

    fn translate<'a>(&'a self, text: &'a str, _pair: &'a LanguagePair) -> TranslateFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.overrides.get(text).unwrap_or(&self.reply) {
                Reply::Text(reply) => Ok(TranslationOutcome::Translated(reply.clone())),
                Reply::Fail(message) => Err(anyhow!("{}", message)),
                Reply::Panic(message) => panic!("{}", message),
            }
        })
    }
}

pub(crate) struct FakeLoader {
    reply: Reply,
    loads: AtomicUsize,
    fresh_downloads: AtomicUsize,
}

impl FakeLoader {
    pub(crate) fn replying(text: &str) -> Self {
        Self::with_reply(Reply::Text(text.to_string()))
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self::with_reply(Reply::Fail(message.to_string()))
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            loads: AtomicUsize::new(0),
            fresh_downloads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn fresh_downloads(&self) -> usize {
        self.fresh_downloads.load(Ordering::SeqCst)
    }
}

impl LocalModelLoader for FakeLoader {
    fn load<'a>(&'a self, _key: &'a ModelKey, fresh_download: bool) -> LoadFuture<'a> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if fresh_download {
                self.fresh_downloads.fetch_add(1, Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            match &self.reply {
                Reply::Text(text) => {
                    Ok(Arc::new(FakeTranslator::replying(text)) as Arc<dyn TextTranslator>)
                }
                Reply::Fail(message) => Err(anyhow!("{}", message)),
                Reply::Panic(message) => panic!("{}", message),
            }
        })
    }
}

#[derive(Debug, Clone)]
enum Recognition {
    Found(RecognitionResult),
    Fail(String),
    Panic(String),
}

pub(crate) struct FakeRecognizer {
    result: Recognition,
    delay: Duration,
    sources: Mutex<Vec<String>>,
}

impl FakeRecognizer {
    pub(crate) fn returning(result: RecognitionResult) -> Self {
        Self::with_result(Recognition::Found(result))
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self::with_result(Recognition::Fail(message.to_string()))
    }

    pub(crate) fn panicking(message: &str) -> Self {
        Self::with_result(Recognition::Panic(message.to_string()))
    }

    fn with_result(result: Recognition) -> Self {
        Self {
            result,
            delay: Duration::ZERO,
            sources: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `describe()` of every source the recognizer was handed.
    pub(crate) fn sources(&self) -> Vec<String> {
        self.sources.lock().clone()
    }
}

impl Recognizer for FakeRecognizer {
    fn recognize<'a>(
        &'a self,
        source: &'a ImageSource,
        _language_hint: &'a str,
    ) -> RecognizeFuture<'a> {
        Box::pin(async move {
            self.sources.lock().push(source.describe());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.result {
                Recognition::Found(result) => Ok(result.clone()),
                Recognition::Fail(message) => Err(anyhow!("{}", message)),
                Recognition::Panic(message) => panic!("{}", message),
            }
        })
    }
}

/// Channel that answers sends from a script and counts injections.
pub(crate) struct ScriptedChannel {
    sends: Mutex<VecDeque<Result<Ack, DeliveryError>>>,
    inject_result: Result<(), DeliveryError>,
    send_count: AtomicUsize,
    injections: AtomicUsize,
}

impl ScriptedChannel {
    pub(crate) fn new(sends: Vec<Result<Ack, DeliveryError>>) -> Self {
        Self {
            sends: Mutex::new(sends.into()),
            inject_result: Ok(()),
            send_count: AtomicUsize::new(0),
            injections: AtomicUsize::new(0),
        }
    }

    pub(crate) fn denying_injection(mut self, reason: &str) -> Self {
        self.inject_result = Err(DeliveryError::InjectionDenied(reason.to_string()));
        self
    }

    pub(crate) fn sends(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    pub(crate) fn injections(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }
}

impl MessageChannel for ScriptedChannel {
    fn send<'a>(&'a self, _tab: &'a TabId, _request: &'a TranslateRequest) -> DeliveryFuture<'a, Ack> {
        Box::pin(async move {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            self.sends
                .lock()
                .pop_front()
                .unwrap_or(Err(DeliveryError::NoReceiver))
        })
    }

    fn inject<'a>(&'a self, _tab: &'a TabId) -> DeliveryFuture<'a, ()> {
        Box::pin(async move {
            self.injections.fetch_add(1, Ordering::SeqCst);
            self.inject_result.clone()
        })
    }
}
