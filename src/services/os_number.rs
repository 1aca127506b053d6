//! OS number allocation and conflict recovery.
//!
//! Numbers are unique per `(owner, sector)` among non-deleted orders. The
//! database's partial unique index is the only real guarantee; the checks
//! here give early feedback and pick replacement numbers when a save loses
//! a race.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ExistingOrderSummary, OrderScope, OsNumbered};

/// Linear probe window used when the oracle cannot help.
pub const PROBE_LIMIT: i32 = 100;

/// Lookups the allocator needs from the order store.
#[async_trait]
pub trait OrderNumberStore: Send + Sync {
    /// Non-deleted order holding `os_number`, ignoring `exclude`.
    async fn find_active_by_number(
        &self,
        scope: OrderScope,
        os_number: i32,
        exclude: Option<Uuid>,
    ) -> AppResult<Option<ExistingOrderSummary>>;

    /// Atomic next-number oracle. Never returns a number held by a
    /// non-deleted order.
    async fn next_number(&self, scope: OrderScope) -> AppResult<i32>;

    /// Highest number held by a non-deleted order.
    async fn highest_number(&self, scope: OrderScope) -> AppResult<Option<i32>>;
}

/// Outcome of checking a requested number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reservation {
    Valid,
    /// The number was taken; `new_number` is free at the time of checking.
    Reassigned {
        existing: ExistingOrderSummary,
        new_number: i32,
    },
}

/// A save attempt that hit a number conflict and was retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Retried {
    pub attempt: u32,
    pub new_number: i32,
}

/// Result of [`OsNumberAllocator::save_with_retry`].
#[derive(Debug)]
pub enum SaveOutcome<R> {
    Succeeded {
        record: R,
        os_number: Option<i32>,
        retries: Vec<Retried>,
    },
    Failed {
        error: AppError,
        attempts: u32,
        retries: Vec<Retried>,
    },
}

/// Whether a save error is a uniqueness violation worth retrying.
pub fn is_unique_violation(err: &AppError) -> bool {
    match err {
        AppError::Conflict(_) => true,
        AppError::Database(msg) => msg.contains("duplicate key") || msg.contains("23505"),
        _ => false,
    }
}

/// Allocates OS numbers against an [`OrderNumberStore`].
pub struct OsNumberAllocator<S: ?Sized> {
    store: Arc<S>,
    max_retries: u32,
    backoff_ms: (u64, u64),
}

impl<S: ?Sized> Clone for OsNumberAllocator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            max_retries: self.max_retries,
            backoff_ms: self.backoff_ms,
        }
    }
}

impl<S: OrderNumberStore + ?Sized> OsNumberAllocator<S> {
    pub fn new(store: Arc<S>, max_retries: u32) -> Self {
        Self {
            store,
            max_retries: max_retries.max(1),
            backoff_ms: (100, 300),
        }
    }

    /// Override the randomized delay between save attempts.
    pub fn with_backoff_ms(mut self, min: u64, max: u64) -> Self {
        self.backoff_ms = (min.min(max), max);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn check_number_exists(
        &self,
        scope: OrderScope,
        candidate: i32,
        exclude: Option<Uuid>,
    ) -> AppResult<Option<ExistingOrderSummary>> {
        self.store
            .find_active_by_number(scope, candidate, exclude)
            .await
    }

    /// Ask the oracle. Failures are logged and reported as `None`.
    pub async fn next_number_from_oracle(&self, scope: OrderScope) -> Option<i32> {
        match self.store.next_number(scope).await {
            Ok(number) => Some(number),
            Err(e) => {
                warn!(
                    "OS number oracle unavailable for {} orders: {}",
                    scope.sector, e
                );
                None
            }
        }
    }

    /// First free number at or above `starting_from`.
    ///
    /// Uses the oracle when it answers above `starting_from`, otherwise
    /// probes upward. Fails with `Conflict` if the whole probe window is
    /// taken.
    pub async fn find_next_available(&self, scope: OrderScope, starting_from: i32) -> AppResult<i32> {
        let starting_from = starting_from.max(1);
        let oracle = self.next_number_from_oracle(scope).await;
        if let Some(number) = oracle
            && number > starting_from
        {
            return Ok(number);
        }

        let start = oracle.unwrap_or(starting_from).max(starting_from);
        for candidate in start..start.saturating_add(PROBE_LIMIT) {
            if self
                .check_number_exists(scope, candidate, None)
                .await?
                .is_none()
            {
                debug!("Probed free OS number {}", candidate);
                return Ok(candidate);
            }
        }

        Err(AppError::Conflict(format!(
            "No free OS number between {} and {}",
            start,
            start.saturating_add(PROBE_LIMIT - 1)
        )))
    }

    /// Suggested number for a new order.
    pub async fn suggest_number(&self, scope: OrderScope) -> AppResult<i32> {
        if let Some(number) = self.next_number_from_oracle(scope).await {
            return Ok(number);
        }
        let highest = self.store.highest_number(scope).await?.unwrap_or(0);
        self.find_next_available(scope, highest.saturating_add(1))
            .await
    }

    /// Check a requested number, proposing a replacement if it is taken.
    pub async fn validate_and_reserve(
        &self,
        scope: OrderScope,
        candidate: i32,
        exclude: Option<Uuid>,
    ) -> AppResult<Reservation> {
        match self.check_number_exists(scope, candidate, exclude).await? {
            None => Ok(Reservation::Valid),
            Some(existing) => {
                let new_number = self
                    .find_next_available(scope, candidate.saturating_add(1))
                    .await?;
                info!(
                    "OS number {} already used by {}; proposing {}",
                    candidate, existing.client_name, new_number
                );
                Ok(Reservation::Reassigned {
                    existing,
                    new_number,
                })
            }
        }
    }

    /// Run `save` until it succeeds, renumbering the payload after each
    /// uniqueness violation. Makes at most `max_retries` attempts; any other
    /// error ends the loop immediately.
    pub async fn save_with_retry<P, R, F, Fut>(
        &self,
        scope: OrderScope,
        mut payload: P,
        mut save: F,
    ) -> SaveOutcome<R>
    where
        P: OsNumbered + Clone,
        F: FnMut(P) -> Fut,
        Fut: Future<Output = AppResult<R>>,
    {
        let mut retries = Vec::new();

        for attempt in 1..=self.max_retries {
            let error = match save(payload.clone()).await {
                Ok(record) => {
                    return SaveOutcome::Succeeded {
                        record,
                        os_number: payload.os_number(),
                        retries,
                    };
                }
                Err(e) => e,
            };

            if !is_unique_violation(&error) {
                warn!("Save failed on attempt {}: {}", attempt, error);
                return SaveOutcome::Failed {
                    error,
                    attempts: attempt,
                    retries,
                };
            }

            let Some(current) = payload.os_number() else {
                return SaveOutcome::Failed {
                    error,
                    attempts: attempt,
                    retries,
                };
            };

            if attempt == self.max_retries {
                warn!(
                    "Giving up on OS number after {} conflicting attempts",
                    attempt
                );
                return SaveOutcome::Failed {
                    error: AppError::Conflict(format!(
                        "Could not assign a free OS number after {} attempts",
                        attempt
                    )),
                    attempts: attempt,
                    retries,
                };
            }

            let new_number = match self
                .find_next_available(scope, current.saturating_add(1))
                .await
            {
                Ok(number) => number,
                Err(error) => {
                    return SaveOutcome::Failed {
                        error,
                        attempts: attempt,
                        retries,
                    };
                }
            };

            info!(
                "OS number {} taken on attempt {}; retrying with {}",
                current, attempt, new_number
            );
            tokio::time::sleep(self.jitter()).await;

            payload.set_os_number(new_number);
            retries.push(Retried {
                attempt,
                new_number,
            });
        }

        // max_retries >= 1, so the loop always returns.
        SaveOutcome::Failed {
            error: AppError::Conflict("No save attempts were made".to_string()),
            attempts: 0,
            retries,
        }
    }

    fn jitter(&self) -> Duration {
        let (min, max) = self.backoff_ms;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}
