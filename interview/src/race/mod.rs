//! Redundant-request race over an unreliable capability.
//!
//! Each attempt dispatches `redundancy` identical requests concurrently. On
//! the structured path the first output that salvages into a schema-valid
//! value wins; on the unstructured path the first request to finish at all
//! decides the call. Losing requests are cancelled through a shared
//! [`CancellationToken`], aborted, and drained before the call returns, so no
//! in-flight work outlives the race.
//!
//! The cache is shared by every call on one race. Each call checks its own
//! pending key before dispatching and stores its one winning response under
//! that key. Two concurrent calls with the same fingerprint may both miss and
//! both dispatch; the later store overwrites the earlier one with an equally
//! valid response.

pub mod cache;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::salvage::{OutputSchema, parse_structured};
use crate::error::EngineError;
use crate::io::capability::{Capability, CapabilityRequest, Role};
use crate::race::cache::{PendingKey, ResponseCache};

/// Default number of parallel requests per attempt.
pub const DEFAULT_REDUNDANCY: usize = 3;
/// Whole-race attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceSettings {
    pub redundancy: usize,
    pub max_attempts: u32,
    pub use_cache: bool,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            redundancy: DEFAULT_REDUNDANCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            use_cache: false,
        }
    }
}

type Dispatched = JoinSet<(usize, anyhow::Result<String>)>;

pub struct ResponseRace {
    role: Role,
    capability: Arc<dyn Capability>,
    settings: RaceSettings,
    cache: Mutex<ResponseCache>,
}

impl ResponseRace {
    pub fn new(role: Role, capability: Arc<dyn Capability>, settings: RaceSettings) -> Self {
        Self {
            role,
            capability,
            settings: RaceSettings {
                redundancy: settings.redundancy.max(1),
                max_attempts: settings.max_attempts.max(1),
                ..settings
            },
            cache: Mutex::new(ResponseCache::new()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn settings(&self) -> RaceSettings {
        self.settings
    }

    /// Number of responses cached so far.
    pub fn cached_responses(&self) -> usize {
        self.lock_cache().len()
    }

    /// First schema-valid result across up to `max_attempts` races.
    #[instrument(skip_all, fields(role = %self.role, redundancy = self.settings.redundancy))]
    pub async fn request_structured<T: DeserializeOwned>(
        &self,
        request: &CapabilityRequest,
        schema: &OutputSchema,
    ) -> Result<T, EngineError> {
        let (key, cached) = self.check(request);
        if let Some(raw) = cached {
            match parse_structured::<T>(&raw, Some(schema)) {
                Ok(value) => {
                    debug!("structured cache hit");
                    return Ok(value);
                }
                Err(err) => warn!(err = %err, "ignoring cached response that no longer parses"),
            }
        }

        let request = Arc::new(request.clone());
        for attempt in 1..=self.settings.max_attempts {
            match self.race_structured::<T>(&request, schema).await {
                Ok((raw, value)) => {
                    info!(attempt, "race won");
                    self.store(key, raw);
                    return Ok(value);
                }
                Err(err) => warn!(attempt, err = %err, "race attempt produced no valid result"),
            }
        }

        Err(EngineError::ExhaustedRetries {
            role: self.role.to_string(),
            redundancy: self.settings.redundancy,
            attempts: self.settings.max_attempts,
        })
    }

    /// Text of whichever request finishes first. Fails if that request failed.
    #[instrument(skip_all, fields(role = %self.role, redundancy = self.settings.redundancy))]
    pub async fn request_unstructured(
        &self,
        request: &CapabilityRequest,
    ) -> Result<String, EngineError> {
        let (key, cached) = self.check(request);
        if let Some(raw) = cached {
            debug!("unstructured cache hit");
            return Ok(raw);
        }

        let token = CancellationToken::new();
        let mut dispatched = self.dispatch(&Arc::new(request.clone()), &token);
        let first = dispatched.join_next().await;
        drain(token, dispatched).await;

        let failed = |message: String| EngineError::Capability {
            role: self.role.to_string(),
            message,
        };
        match first {
            Some(Ok((index, Ok(text)))) => {
                debug!(index, "first request completed");
                self.store(key, text.clone());
                Ok(text)
            }
            Some(Ok((index, Err(err)))) => {
                warn!(index, err = %format!("{err:#}"), "first completed request failed");
                Err(failed(format!("{err:#}")))
            }
            Some(Err(join_err)) => Err(failed(join_err.to_string())),
            None => Err(failed("no request was dispatched".to_string())),
        }
    }

    async fn race_structured<T: DeserializeOwned>(
        &self,
        request: &Arc<CapabilityRequest>,
        schema: &OutputSchema,
    ) -> Result<(String, T), EngineError> {
        let token = CancellationToken::new();
        let mut dispatched = self.dispatch(request, &token);
        let mut winner = None;

        while let Some(joined) = dispatched.join_next().await {
            match joined {
                Ok((index, Ok(raw))) => match parse_structured::<T>(&raw, Some(schema)) {
                    Ok(value) => {
                        debug!(index, "valid result");
                        winner = Some((raw, value));
                        break;
                    }
                    Err(err) => debug!(index, err = %err, "discarding invalid output"),
                },
                Ok((index, Err(err))) => {
                    warn!(index, err = %format!("{err:#}"), "request failed");
                }
                Err(join_err) => warn!(err = %join_err, "request task failed"),
            }
        }
        drain(token, dispatched).await;

        winner.ok_or_else(|| EngineError::StructuredParseFailure {
            role: self.role.to_string(),
            redundancy: self.settings.redundancy,
        })
    }

    fn dispatch(&self, request: &Arc<CapabilityRequest>, token: &CancellationToken) -> Dispatched {
        let mut dispatched = JoinSet::new();
        for index in 0..self.settings.redundancy {
            let capability = Arc::clone(&self.capability);
            let request = Arc::clone(request);
            let cancelled = token.child_token();
            dispatched.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    () = cancelled.cancelled() => Err(anyhow!("request cancelled")),
                    result = capability.invoke(&request) => result,
                };
                (index, outcome)
            });
        }
        dispatched
    }

    /// Pending cache key for the request plus any response already stored
    /// under it. No key when caching is off.
    fn check(&self, request: &CapabilityRequest) -> (Option<PendingKey>, Option<String>) {
        if !self.settings.use_cache {
            return (None, None);
        }
        let cache = self.lock_cache();
        let (key, hit) = cache.check(&request.prompt, &request.params);
        let raw = if hit {
            cache.get(&key).ok().map(str::to_string)
        } else {
            None
        };
        (Some(key), raw)
    }

    fn store(&self, key: Option<PendingKey>, raw: String) {
        if let Some(key) = key {
            self.lock_cache().store(key, raw);
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, ResponseCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Signal, abort and join every request still in flight.
async fn drain(token: CancellationToken, mut dispatched: Dispatched) {
    token.cancel();
    dispatched.abort_all();
    let mut drained = 0usize;
    while dispatched.join_next().await.is_some() {
        drained += 1;
    }
    if drained > 0 {
        debug!(drained, "cancelled losing requests");
    }
}
