//! Success ping delivery with bounded, linearly backed-off retries.
//!
//! Delivery failure never reaches the caller as an error. The monitoring
//! service notices the missing heartbeat on its own, so a failed ping is only
//! reported as `false` and, in verbose mode, as log lines.

use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NotifierConfig;
use crate::error::{ConfigError, DeliveryError};
use crate::transport::{HttpTransport, Sleeper, ThreadSleeper, Transport};

/// Only this status counts as a delivered ping.
const STATUS_OK: u16 = 200;

/// Base step of the linear backoff between attempts.
const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Delay slept after a failed `attempt` (1-based) before the next one.
pub fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_STEP * attempt
}

/// Sends success pings for one monitored job.
#[derive(Clone)]
pub struct Notifier {
    config: NotifierConfig,
    ping_url: String,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
}

impl Notifier {
    /// Create a notifier that pings over HTTP and sleeps the calling thread
    /// between attempts.
    pub fn new(config: NotifierConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new()?;
        Self::with_parts(config, Arc::new(transport), Arc::new(ThreadSleeper))
    }

    /// Create a notifier with custom delivery seams.
    pub fn with_parts(
        config: NotifierConfig,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ping_url: config.ping_url(),
            config,
            transport,
            sleeper,
        })
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn ping_url(&self) -> &str {
        &self.ping_url
    }

    /// Send the success ping, retrying up to `max_attempts` times.
    ///
    /// Returns `true` as soon as one attempt gets HTTP 200 back, `false`
    /// once every attempt has failed.
    pub fn ping(&self) -> bool {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            if self.config.verbose {
                tracing::info!(attempt, max_attempts, "Ping attempt");
            }

            let result = match self.transport.get(&self.ping_url, self.config.timeout) {
                Ok(STATUS_OK) => Ok(()),
                Ok(status) => Err(DeliveryError::Status(status)),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    if self.config.verbose {
                        tracing::info!(attempt, "Ping sent successfully");
                    }
                    return true;
                }
                Err(e) => {
                    if self.config.verbose {
                        tracing::warn!(attempt, error = %e, "Ping attempt failed");
                    }
                }
            }

            if attempt < max_attempts {
                let delay = backoff_delay(attempt);
                if self.config.verbose {
                    tracing::info!(delay_ms = delay.as_millis() as u64, "Waiting before retry");
                }
                self.sleeper.sleep(delay);
            }
        }

        if self.config.verbose {
            tracing::warn!(max_attempts, "All ping attempts failed");
        }
        false
    }

    /// Wrap a job so that every successful run is followed by a ping.
    ///
    /// The wrapper hands its argument to `job` and returns exactly what `job`
    /// returned. An `Err` (or a panic) skips the ping. Jobs taking several
    /// arguments receive them as a tuple.
    pub fn wrap<A, T, E, F>(&self, mut job: F) -> impl FnMut(A) -> Result<T, E> + use<A, T, E, F>
    where
        F: FnMut(A) -> Result<T, E>,
    {
        let notifier = self.clone();
        move |args| {
            if notifier.config.verbose {
                tracing::info!(job = type_name::<F>(), "Starting wrapped job");
            }

            let output = job(args)?;

            if notifier.config.verbose {
                tracing::info!(job = type_name::<F>(), "Wrapped job completed, sending ping");
            }
            notifier.ping();

            Ok(output)
        }
    }

    /// Open a scope that pings when resolved successfully with [`Scope::exit`].
    pub fn enter(&self) -> Scope<'_> {
        if self.config.verbose {
            tracing::info!("Entering monitored scope");
        }
        Scope {
            notifier: self,
            resolved: false,
        }
    }

    /// Run `block` inside a scope: ping if it returns `Ok`, pass its result
    /// through either way.
    pub fn run<T, E>(&self, block: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let scope = self.enter();
        scope.exit(block())
    }

    /// Like [`run`](Notifier::run), but a successful block also reports
    /// whether the ping was delivered.
    pub fn run_reported<T, E>(&self, block: impl FnOnce() -> Result<T, E>) -> Result<(T, bool), E> {
        let scope = self.enter();
        scope.complete(block())
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .field("max_attempts", &self.config.max_attempts)
            .field("verbose", &self.config.verbose)
            .finish_non_exhaustive()
    }
}

/// A monitored block in progress.
///
/// Dropping a scope without calling [`exit`](Scope::exit), e.g. on an early
/// `?` return or a panic, counts as a failed exit and sends no ping.
#[must_use = "a scope only pings when resolved with `exit`"]
pub struct Scope<'a> {
    notifier: &'a Notifier,
    resolved: bool,
}

impl Scope<'_> {
    /// Close the scope with the block's outcome, which is returned unchanged.
    pub fn exit<T, E>(self, outcome: Result<T, E>) -> Result<T, E> {
        self.complete(outcome).map(|(value, _)| value)
    }

    /// Close the scope, pairing a successful outcome with the delivery result.
    pub fn complete<T, E>(mut self, outcome: Result<T, E>) -> Result<(T, bool), E> {
        self.resolved = true;
        let verbose = self.notifier.config.verbose;

        match outcome {
            Ok(value) => {
                if verbose {
                    tracing::info!("Scope completed successfully, sending ping");
                }
                Ok((value, self.notifier.ping()))
            }
            Err(e) => {
                if verbose {
                    tracing::info!(error_type = type_name::<E>(), "Scope exited with error");
                }
                Err(e)
            }
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.notifier.config.verbose {
            tracing::warn!("Scope abandoned without exit, skipping ping");
        }
    }
}

/// Ping once with a fresh, default-configured notifier.
///
/// An unusable configuration (e.g. an empty token) counts as a failed ping.
pub fn ping(token: impl Into<String>, timeout: Duration) -> bool {
    let config = NotifierConfig::new(token).with_timeout(timeout);
    match Notifier::new(config) {
        Ok(notifier) => notifier.ping(),
        Err(e) => {
            tracing::debug!(error = %e, "Cannot build notifier, ping skipped");
            false
        }
    }
}

/// Build a default-configured notifier and wrap `job` with it.
pub fn monitored<A, T, E, F>(
    token: impl Into<String>,
    timeout: Duration,
    job: F,
) -> Result<impl FnMut(A) -> Result<T, E>, ConfigError>
where
    F: FnMut(A) -> Result<T, E>,
{
    let notifier = Notifier::new(NotifierConfig::new(token).with_timeout(timeout))?;
    Ok(notifier.wrap(job))
}
