//! Shared application state for Axum handlers.
//!
//! Holds the configuration, the backend client and the rate limiter. All of
//! them are cheap to clone and safe to use from concurrent handlers.
//!
//! # Structured Concurrency
//!
//! The rate limiter's idle-client sweeper runs as a background task managed
//! by `tokio_util::task::TaskTracker` and `CancellationToken`. Call
//! `shutdown()` to stop it before application exit.

use std::sync::Arc;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::{KeyedLimiter, SlidingWindowLimiter};
use crate::services::UpstreamClient;

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Client for the chat backend
    pub upstream: UpstreamClient,
    /// Per-client admission control, `None` when disabled
    pub limiter: Option<Arc<dyn KeyedLimiter>>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create state with the sliding-window limiter described by `config`.
    ///
    /// Must be called inside a Tokio runtime when rate limiting is enabled,
    /// since the sweeper task is spawned here.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the backend client or limiter cannot
    /// be built from `config`.
    pub fn new(config: Config) -> AppResult<Self> {
        let limiter: Option<Arc<dyn KeyedLimiter>> = if config.rate_limiting_enabled() {
            let limiter =
                SlidingWindowLimiter::new(config.rate_limit_requests, config.rate_limit_window)
                    .map_err(|e| AppError::ConfigError(format!("Invalid rate limit: {e}")))?;
            Some(Arc::new(limiter))
        } else {
            None
        };

        Self::with_limiter(config, limiter)
    }

    /// Create state with an explicit limiter, e.g. one driven by a fake clock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the backend client cannot be built.
    pub fn with_limiter(
        config: Config,
        limiter: Option<Arc<dyn KeyedLimiter>>,
    ) -> AppResult<Self> {
        let upstream = UpstreamClient::new(&config)?;

        let state = Self {
            config: Arc::new(config),
            upstream,
            limiter,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if let Some(limiter) = &state.limiter {
            state.spawn_sweeper_task(limiter.clone());
        }

        Ok(state)
    }

    /// Spawn the task that forgets clients with no recent requests.
    ///
    /// Without it the limiter would hold one entry for every address ever seen.
    fn spawn_sweeper_task(&self, limiter: Arc<dyn KeyedLimiter>) {
        let period = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let before = limiter.tracked_keys();
                        limiter.retain_recent();
                        let after = limiter.tracked_keys();
                        metrics::set_tracked_clients(after);
                        trace!(before, after, "Swept idle rate limit entries");
                    }
                }
            }

            debug!("Rate limit sweeper shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// Signals cancellation, closes the tracker, then waits for every task.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }
}
