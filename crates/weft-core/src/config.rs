//! Engine options and the live configuration channel.
//!
//! The engine consumes parsed [`Options`] only; where they come from
//! (environment, files, a remote config service) is the host process's
//! concern. A [`ConfigHandle`] carries the current options plus a
//! broadcast channel of JSON-Patch-shaped changes. The engine reacts to
//! exactly one path at runtime: `/count`, the worker loop target.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Parsed engine options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Crawler name, used in loop names and diagnostics.
    pub name: String,

    /// Target number of concurrent worker loops.
    pub count: usize,

    /// Delay before polling again when the queues are exhausted.
    #[serde(rename = "pollingDelayMs")]
    pub polling_delay_ms: u64,

    /// TTL for per-URL leases. Chosen comfortably above realistic
    /// cycle times; renewal is not modeled.
    #[serde(rename = "processingTtlMs")]
    pub processing_ttl_ms: u64,

    /// Broker-level queue name prefix.
    #[serde(rename = "queuePrefix")]
    pub queue_prefix: String,

    /// Org allowlist, lowercased. Empty allows everything.
    #[serde(rename = "orgFilter")]
    pub org_filter: HashSet<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: "crawler".to_owned(),
            count: 1,
            polling_delay_ms: 2_000,
            processing_ttl_ms: 60_000,
            queue_prefix: "crawler".to_owned(),
            org_filter: HashSet::new(),
        }
    }
}

impl Options {
    /// Parses options from the process environment.
    ///
    /// Recognized variables: `CRAWLER_NAME`, `CRAWLER_COUNT`,
    /// `CRAWLER_POLLING_DELAY_MS`, `CRAWLER_PROCESSING_TTL_MS`,
    /// `CRAWLER_QUEUE_PREFIX`, `CRAWLER_ORG_FILTER` (comma-separated).
    /// Unset or unparsable variables fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    fn from_vars(vars: impl Iterator<Item = (String, String)>) -> Self {
        let mut options = Self::default();
        for (key, value) in vars {
            match key.as_str() {
                "CRAWLER_NAME" => options.name = value,
                "CRAWLER_COUNT" => {
                    if let Ok(count) = value.parse() {
                        options.count = count;
                    }
                }
                "CRAWLER_POLLING_DELAY_MS" => {
                    if let Ok(delay) = value.parse() {
                        options.polling_delay_ms = delay;
                    }
                }
                "CRAWLER_PROCESSING_TTL_MS" => {
                    if let Ok(ttl) = value.parse() {
                        options.processing_ttl_ms = ttl;
                    }
                }
                "CRAWLER_QUEUE_PREFIX" => options.queue_prefix = value,
                "CRAWLER_ORG_FILTER" => {
                    options.org_filter = value
                        .split(',')
                        .map(str::trim)
                        .filter(|org| !org.is_empty())
                        .map(str::to_lowercase)
                        .collect();
                }
                _ => {}
            }
        }
        options
    }
}

/// One JSON-Patch operation from the configuration source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    /// Patch verb (`replace`, `add`, …). The engine applies values
    /// regardless of verb.
    pub op: String,

    /// Pointer into the options document, e.g. `/count`.
    pub path: String,

    /// New value, absent for removals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Shared, live engine configuration.
///
/// Cloning is cheap: clones share the options and the change channel.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Options>>,
    tx: broadcast::Sender<Vec<PatchOp>>,
}

impl ConfigHandle {
    /// Creates a handle over the given options.
    pub fn new(options: Options) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(RwLock::new(options)),
            tx,
        }
    }

    /// Returns a snapshot of the current options.
    #[must_use]
    pub fn current(&self) -> Options {
        let guard = self.inner.read();
        guard.expect("should not be poisoned").clone()
    }

    /// Subscribes to configuration changes.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<PatchOp>> {
        self.tx.subscribe()
    }

    /// Applies a patch and notifies subscribers.
    ///
    /// Unknown paths are carried to subscribers untouched; the options
    /// themselves only change for recognized paths.
    pub fn apply(&self, patch: Vec<PatchOp>) {
        {
            let guard = self.inner.write();
            let mut options = guard.expect("should not be poisoned");
            for op in &patch {
                match op.path.as_str() {
                    "/count" => {
                        if let Some(count) = op.value.as_ref().and_then(Value::as_u64) {
                            options.count = count as usize;
                        }
                    }
                    "/pollingDelayMs" => {
                        if let Some(delay) = op.value.as_ref().and_then(Value::as_u64) {
                            options.polling_delay_ms = delay;
                        }
                    }
                    "/processingTtlMs" => {
                        if let Some(ttl) = op.value.as_ref().and_then(Value::as_u64) {
                            options.processing_ttl_ms = ttl;
                        }
                    }
                    _ => {}
                }
            }
        }
        // No subscribers is fine; changes still apply.
        let _ = self.tx.send(patch);
    }
}

impl fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigHandle").finish_non_exhaustive()
    }
}
