//! Scheduled polling of one source.
//!
//! The [`Scheduler`] runs one fetch-compare-store cycle at a time, then
//! waits for the configured interval plus fresh random jitter.  The wait and
//! the in-flight fetch are the only suspension points and both stop as soon
//! as the shutdown token is cancelled.
//!
//! ```text
//! Idle -> Fetching -> Stored | Unchanged | Failed -> Waiting -> Fetching ...
//!                          (any state) -> Stopped
//! ```
//!
//! ## For contributors
//!
//! Only this module decides what an error means.  Fetchers and the store
//! return errors untouched; here they are logged and either retried on the
//! next cycle or returned from [`Scheduler::run`] (see
//! [`CollectorError::is_fatal`]).  There is deliberately no extra retry or
//! backoff: the next cycle is the retry.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::CollectorConfig;
use crate::error::{CollectorError, FetchError};
use crate::fetch::{FetchOptions, FetcherRegistry};
use crate::request::Attempt;
use crate::store::{DedupStore, Fingerprint, StoreOutcome};

/// Where the scheduler currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Stored,
    Unchanged,
    Failed,
    Waiting,
    Stopped,
}

/// The scheduler's working set, touched only between awaits of one task.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub phase: Phase,
    pub next_fire: Option<Instant>,
    pub last_fingerprint: Option<Fingerprint>,
    pub once: bool,
}

/// Counters returned when a run ends without a fatal error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub stored: u64,
    pub unchanged: u64,
    pub failed: u64,
}

/// Runs fetch cycles for a single source.
pub struct Scheduler {
    config: CollectorConfig,
    registry: FetcherRegistry,
    store: DedupStore,
    source_key: String,
    state: ScheduleState,
    rng: StdRng,
}

impl Scheduler {
    pub fn new(config: CollectorConfig, registry: FetcherRegistry) -> Self {
        let store = DedupStore::new(&config.storage_root);
        let source_key = config.source.key();
        let state = ScheduleState {
            phase: Phase::Idle,
            next_fire: None,
            last_fingerprint: None,
            once: config.once,
        };
        Self {
            config,
            registry,
            store,
            source_key,
            state,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Replace the jitter source, e.g. with a seeded generator.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    /// Run until `shutdown` is cancelled, or for exactly one cycle in once
    /// mode.
    ///
    /// In once mode any cycle error is returned.  In recurring mode only fatal
    /// errors are; a cancelled shutdown always ends with `Ok`.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<RunSummary, CollectorError> {
        let mut summary = RunSummary::default();
        info!(
            source = %self.config.source,
            root = %self.store.root().display(),
            once = self.config.once,
            interval = ?self.config.interval,
            jitter = ?self.config.jitter,
            "collector started"
        );

        match self.store.latest(&self.source_key) {
            Ok(Some(latest)) => {
                debug!(fingerprint = %latest.fingerprint, file = %latest.file, "resuming after stored artifact");
                self.state.last_fingerprint = Some(latest.fingerprint.clone());
            }
            Ok(None) => {}
            Err(e) => warn!("could not read stored state yet: {e}"),
        }

        loop {
            if shutdown.is_cancelled() {
                return Ok(self.stop(summary));
            }

            // Once mode has no next cycle, so neither jitter nor an interval
            // bound applies.
            let delay = if self.state.once {
                Duration::ZERO
            } else {
                jittered_interval(self.config.interval, self.config.jitter, &mut self.rng)
            };
            self.state.next_fire = (!self.state.once).then(|| Instant::now() + delay);

            let result = self.cycle(shutdown, delay).await;
            summary.cycles += 1;
            match result {
                Ok(outcome) if outcome.stored => summary.stored += 1,
                Ok(_) => summary.unchanged += 1,
                Err(CollectorError::Fetch(FetchError::Cancelled)) if shutdown.is_cancelled() => {
                    return Ok(self.stop(summary));
                }
                Err(e) => {
                    summary.failed += 1;
                    self.state.phase = Phase::Failed;
                    if e.is_fatal(self.state.once) {
                        error!(error = %e, "cycle failed, stopping");
                        self.state.phase = Phase::Stopped;
                        return Err(e);
                    }
                    let network = matches!(&e, CollectorError::Fetch(f) if f.is_network());
                    warn!(error = %e, network, "cycle failed, retrying next interval");
                }
            }

            if self.state.once {
                return Ok(self.stop(summary));
            }

            self.state.phase = Phase::Waiting;
            debug!(delay = ?delay, "waiting for next cycle");
            let next_fire = self.state.next_fire.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(self.stop(summary)),
                _ = tokio::time::sleep_until(next_fire) => {}
            }
        }
    }

    /// One fetch-compare-store sequence under a fresh attempt identity.
    ///
    /// The fetch deadline is `delay` (the time until the next cycle is due),
    /// tightened by the configured fetch timeout.  A zero `delay` leaves only
    /// the fetch timeout.
    async fn cycle(
        &mut self,
        shutdown: &CancellationToken,
        delay: Duration,
    ) -> Result<StoreOutcome, CollectorError> {
        let attempt = Attempt::new(self.config.app_name.as_str(), shutdown);
        let span = info_span!("cycle", request_id = %attempt.id());

        async {
            self.state.phase = Phase::Fetching;

            let mut options = FetchOptions::builder().attempt(&attempt);
            if let Some(deadline) = deadline(delay, self.config.fetch_timeout) {
                options = options.timeout(deadline);
            }
            let options = options.build().map_err(FetchError::from)?;

            let bytes = self
                .registry
                .fetch(&attempt, &self.config.source, &options)
                .await?;
            let outcome = self.store.store_if_changed(&self.source_key, &bytes)?;

            self.state.last_fingerprint = Some(outcome.fingerprint.clone());
            if outcome.stored {
                self.state.phase = Phase::Stored;
                info!(
                    path = %outcome.path.display(),
                    bytes = bytes.len(),
                    fingerprint = %outcome.fingerprint,
                    "stored new artifact"
                );
            } else {
                self.state.phase = Phase::Unchanged;
                info!(fingerprint = %outcome.fingerprint, "content unchanged");
            }
            Ok::<_, CollectorError>(outcome)
        }
        .instrument(span)
        .await
    }

    fn stop(&mut self, summary: RunSummary) -> RunSummary {
        self.state.phase = Phase::Stopped;
        self.state.next_fire = None;
        info!(
            cycles = summary.cycles,
            stored = summary.stored,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "collector stopped"
        );
        summary
    }
}

/// `base` shifted by a uniform random offset in `[-jitter, +jitter]`,
/// clamped at zero.  Each call draws independently.
pub fn jittered_interval(base: Duration, jitter: Duration, rng: &mut impl Rng) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let jitter = jitter.as_nanos() as i128;
    let offset = rng.random_range(-jitter..=jitter);
    let nanos = (base.as_nanos() as i128 + offset).max(0);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Fetch deadline: the time until the next cycle, capped by `timeout`.
/// A zero `delay` (once mode) sets no interval bound.
fn deadline(delay: Duration, timeout: Option<Duration>) -> Option<Duration> {
    let interval_bound = (!delay.is_zero()).then_some(delay);
    match (interval_bound, timeout) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
