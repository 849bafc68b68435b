//! crates/hostline_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! call ledger and free-target automaton to be independent of the specific
//! storage engine and token scheme behind them.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::{
    AuthContext, Call, CallState, FreeTarget, HostAccount, RateQuote, Transaction, UserAccount,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error taxonomy shared by every port operation.
///
/// The first six variants are surfaced to API callers as structured 4xx
/// responses; `Conflict` and `Unexpected` stay internal (optimistic-write
/// retries and 5xx respectively).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Write conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Call Storage
//=========================================================================================

/// The fields written alongside a call state transition. Everything is applied
/// in one atomic compare-and-swap keyed on the expected current state.
#[derive(Debug, Clone, Copy)]
pub struct CallTransition {
    pub to: CallState,
    /// Resets the billing clock (used by accept).
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub coins_spent: Option<i64>,
}

impl CallTransition {
    pub fn to(state: CallState) -> Self {
        Self {
            to: state,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            coins_spent: None,
        }
    }

    pub fn restarting_clock(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn ending(mut self, at: DateTime<Utc>, duration_seconds: i64, coins_spent: i64) -> Self {
        self.ended_at = Some(at);
        self.duration_seconds = Some(duration_seconds);
        self.coins_spent = Some(coins_spent);
        self
    }
}

#[async_trait]
pub trait CallStore: Send + Sync {
    async fn insert_call(&self, call: Call) -> PortResult<Call>;

    async fn get_call(&self, call_id: Uuid) -> PortResult<Call>;

    /// Atomically moves a call from `from` to `transition.to`, persisting the
    /// transition fields in the same write. This is the single-writer guard
    /// for settlement: exactly one concurrent caller wins.
    ///
    /// Fails `NotFound` if the call does not exist and `InvalidState` if its
    /// current state is not `from`.
    async fn transition_call(
        &self,
        call_id: Uuid,
        from: CallState,
        transition: CallTransition,
    ) -> PortResult<Call>;

    /// Sets the rating exactly once: the write is conditional on the call
    /// being `Completed` with no rating yet, and fails `InvalidState` otherwise.
    async fn set_rating(
        &self,
        call_id: Uuid,
        rating: i32,
        feedback: Option<String>,
    ) -> PortResult<Call>;

    /// Returns `Ongoing` calls whose billing clock started before `cutoff`.
    /// Feeds the idle-call sweeper.
    async fn list_stale_ongoing(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Call>>;
}

//=========================================================================================
// Host and User Account Storage
//=========================================================================================

#[async_trait]
pub trait HostStore: Send + Sync {
    async fn get_host(&self, host_id: Uuid) -> PortResult<HostAccount>;

    /// Resolves the host profile owned by a user account.
    async fn get_host_by_user(&self, user_id: Uuid) -> PortResult<HostAccount>;

    /// Credits call earnings: `total_earnings += earnings`, `total_calls += 1`.
    async fn credit_call_earnings(&self, host_id: Uuid, earnings: i64) -> PortResult<()>;

    /// Adds earned beans to the host's lifetime level-progress accumulator,
    /// creating the accumulator row if it does not exist yet.
    async fn add_lifetime_beans(&self, host_id: Uuid, beans: i64) -> PortResult<()>;

    /// Folds one new rating into the host's running average:
    /// `(old_avg * old_count + rating) / (old_count + 1)`, one decimal.
    async fn apply_rating(&self, host_id: Uuid, rating: i32) -> PortResult<()>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> PortResult<UserAccount>;

    /// Atomically debits coins, returning the new balance. The balance check
    /// and the decrement are one operation, so a concurrent debit on the same
    /// account can never push the balance negative. Fails
    /// `InsufficientBalance` without mutating anything when funds are short.
    async fn debit_coins(&self, user_id: Uuid, amount: i64) -> PortResult<i64>;

    /// Atomically credits coins, returning the new balance.
    async fn credit_coins(&self, user_id: Uuid, amount: i64) -> PortResult<i64>;
}

//=========================================================================================
// Settlement Ledger and Leaderboard
//=========================================================================================

/// Append-only transaction log. Entries are never mutated after insertion
/// (status updates for pending gateway purchases live outside this core).
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn append(&self, tx: Transaction) -> PortResult<()>;

    async fn list_for_call(&self, call_id: Uuid) -> PortResult<Vec<Transaction>>;
}

/// Weekly activity accumulators, keyed by user and the ISO week's Monday.
#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    async fn accrue_weekly(
        &self,
        user_id: Uuid,
        week_start: NaiveDate,
        duration_seconds: i64,
        calls: i64,
    ) -> PortResult<()>;
}

//=========================================================================================
// Free Target Storage
//=========================================================================================

#[async_trait]
pub trait FreeTargetStore: Send + Sync {
    async fn get_free_target(&self, host_id: Uuid) -> PortResult<Option<FreeTarget>>;

    async fn insert_free_target(&self, target: FreeTarget) -> PortResult<FreeTarget>;

    /// Persists the document if its stored version still equals
    /// `expected_version`, bumping the version in the same write. Fails
    /// `Conflict` when another writer got there first; callers reload and
    /// retry under their own bounded loop.
    async fn save_free_target(&self, target: &FreeTarget, expected_version: i64)
        -> PortResult<()>;
}

//=========================================================================================
// Rate Resolution and Token Verification
//=========================================================================================

/// Resolves the effective per-minute billing rate for a host: the charm
/// level's rate when level data exists (`RateKind::Leveled`), otherwise the
/// host's stored static rate (`RateKind::Static`).
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn resolve_rate(&self, host: &HostAccount) -> PortResult<RateQuote>;
}

/// External collaborator: turns an opaque access token into an identity, or
/// fails the request.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> PortResult<AuthContext>;
}
