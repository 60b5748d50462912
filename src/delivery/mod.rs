use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use crate::debug_log::DebugLog;

mod bus;

pub use bus::{PageAgent, RequestHandler, TabBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "TRANSLATE_PAGE")]
    TranslatePage,
}

/// Message asking a tab to translate every image it shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub action: Action,
    pub source: String,
    pub target: String,
}

impl TranslateRequest {
    pub fn translate_page(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            action: Action::TranslatePage,
            source: source.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Started,
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStatus::Started => f.write_str("started"),
        }
    }
}

/// Sent back as soon as the receiver accepts the work, not when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: AckStatus,
}

impl Ack {
    pub fn started() -> Self {
        Self {
            status: AckStatus::Started,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("no receiver is listening in the tab")]
    NoReceiver,
    #[error("injection denied: {0}")]
    InjectionDenied(String),
    #[error("delivery failed: {0}")]
    Other(String),
    #[error("no receiver after {attempts} attempt(s)")]
    Exhausted { attempts: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type DeliveryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DeliveryError>> + Send + 'a>>;

/// Transport between the trigger and a tab's page context.
pub trait MessageChannel: Send + Sync {
    fn send<'a>(&'a self, tab: &'a TabId, request: &'a TranslateRequest) -> DeliveryFuture<'a, Ack>;
    /// Installs the receiver into the tab.
    fn inject<'a>(&'a self, tab: &'a TabId) -> DeliveryFuture<'a, ()>;
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub max_attempts: usize,
    pub inject_delay: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            inject_delay: Duration::from_millis(500),
        }
    }
}

/// Sends a request, injecting the receiver once if the tab has none yet.
pub struct Deliverer {
    channel: Arc<dyn MessageChannel>,
    config: DeliveryConfig,
    log: DebugLog,
}

impl Deliverer {
    pub fn new(channel: Arc<dyn MessageChannel>, config: DeliveryConfig, log: DebugLog) -> Self {
        Self {
            channel,
            config,
            log,
        }
    }

    pub async fn deliver(&self, tab: &TabId, request: &TranslateRequest) -> Result<Ack, DeliveryError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut injected = false;
        for attempt in 1..=max_attempts {
            self.log.info(format!(
                "sending {}->{} request to tab {} (attempt {}/{})",
                request.source, request.target, tab, attempt, max_attempts
            ));
            match self.channel.send(tab, request).await {
                Ok(ack) => {
                    self.log
                        .success(format!("tab {} acknowledged: {}", tab, ack.status));
                    return Ok(ack);
                }
                Err(DeliveryError::NoReceiver) => {
                    self.log.warn(format!("no receiver in tab {}", tab));
                    if attempt == max_attempts {
                        break;
                    }
                    if !injected {
                        self.log.info(format!("injecting page agent into tab {}", tab));
                        if let Err(err) = self.channel.inject(tab).await {
                            self.log
                                .error(format!("could not inject into tab {}: {}", tab, err));
                            return Err(err);
                        }
                        injected = true;
                    }
                    sleep(self.config.inject_delay).await;
                }
                Err(err) => {
                    self.log
                        .error(format!("sending to tab {} failed: {}", tab, err));
                    return Err(err);
                }
            }
        }
        let err = DeliveryError::Exhausted {
            attempts: max_attempts,
        };
        self.log.error(format!("giving up on tab {}: {}", tab, err));
        Err(err)
    }
}
