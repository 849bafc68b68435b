//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the storage ports from the `hostline_core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.
//!
//! The concurrency contracts of the ports map directly onto conditional
//! single-statement updates here: state transitions are compare-and-swaps on
//! the `state` column, debits are guarded decrements, and free-target saves
//! are guarded by a version column.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use hostline_core::domain::{
    Call, CallState, FreeTarget, HostAccount, HostStatus, Transaction, UserAccount, UserRole,
};
use hostline_core::ports::{
    AccountStore, CallStore, CallTransition, FreeTargetStore, HostStore, LeaderboardStore,
    PortError, PortResult, TransactionLog,
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the core storage ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_call_state(raw: &str) -> PortResult<CallState> {
    match raw {
        "initiated" => Ok(CallState::Initiated),
        "ongoing" => Ok(CallState::Ongoing),
        "completed" => Ok(CallState::Completed),
        "cancelled" => Ok(CallState::Cancelled),
        "failed" => Ok(CallState::Failed),
        other => Err(PortError::Unexpected(format!(
            "unknown call state in database: {other}"
        ))),
    }
}

fn parse_host_status(raw: &str) -> PortResult<HostStatus> {
    match raw {
        "pending" => Ok(HostStatus::Pending),
        "approved" => Ok(HostStatus::Approved),
        "rejected" => Ok(HostStatus::Rejected),
        other => Err(PortError::Unexpected(format!(
            "unknown host status in database: {other}"
        ))),
    }
}

fn parse_role(raw: &str) -> PortResult<UserRole> {
    match raw {
        "user" => Ok(UserRole::User),
        "admin" => Ok(UserRole::Admin),
        other => Err(PortError::Unexpected(format!(
            "unknown user role in database: {other}"
        ))),
    }
}

fn status_str(status: hostline_core::domain::TransactionStatus) -> &'static str {
    match status {
        hostline_core::domain::TransactionStatus::Pending => "pending",
        hostline_core::domain::TransactionStatus::Completed => "completed",
        hostline_core::domain::TransactionStatus::Failed => "failed",
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const CALL_COLUMNS: &str = "id, caller_id, host_id, state, started_at, ended_at, \
                            duration_seconds, coins_spent, rating, feedback, created_at";

#[derive(FromRow)]
struct CallRecord {
    id: Uuid,
    caller_id: Uuid,
    host_id: Uuid,
    state: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: i64,
    coins_spent: i64,
    rating: Option<i32>,
    feedback: Option<String>,
    created_at: DateTime<Utc>,
}

impl CallRecord {
    fn to_domain(self) -> PortResult<Call> {
        Ok(Call {
            id: self.id,
            caller_id: self.caller_id,
            host_id: self.host_id,
            state: parse_call_state(&self.state)?,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_seconds: self.duration_seconds,
            coins_spent: self.coins_spent,
            rating: self.rating,
            feedback: self.feedback,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct HostRecord {
    id: Uuid,
    user_id: Uuid,
    status: String,
    is_online: bool,
    rate_per_minute: i64,
    total_earnings: i64,
    total_calls: i64,
    rating_avg: f64,
    rating_count: i64,
}

impl HostRecord {
    fn to_domain(self) -> PortResult<HostAccount> {
        Ok(HostAccount {
            id: self.id,
            user_id: self.user_id,
            status: parse_host_status(&self.status)?,
            is_online: self.is_online,
            rate_per_minute: self.rate_per_minute,
            total_earnings: self.total_earnings,
            total_calls: self.total_calls,
            rating_avg: self.rating_avg,
            rating_count: self.rating_count,
        })
    }
}

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    role: String,
    coin_balance: i64,
}

impl UserRecord {
    fn to_domain(self) -> PortResult<UserAccount> {
        Ok(UserAccount {
            id: self.id,
            role: parse_role(&self.role)?,
            coin_balance: self.coin_balance,
        })
    }
}

#[derive(FromRow)]
struct FreeTargetRecord {
    doc: Json<FreeTarget>,
    version: i64,
}

//=========================================================================================
// `CallStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CallStore for DbAdapter {
    async fn insert_call(&self, call: Call) -> PortResult<Call> {
        sqlx::query(
            "INSERT INTO calls (id, caller_id, host_id, state, started_at, ended_at, \
             duration_seconds, coins_spent, rating, feedback, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(call.id)
        .bind(call.caller_id)
        .bind(call.host_id)
        .bind(call.state.as_str())
        .bind(call.started_at)
        .bind(call.ended_at)
        .bind(call.duration_seconds)
        .bind(call.coins_spent)
        .bind(call.rating)
        .bind(call.feedback.clone())
        .bind(call.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(call)
    }

    async fn get_call(&self, call_id: Uuid) -> PortResult<Call> {
        let record = sqlx::query_as::<_, CallRecord>(&format!(
            "SELECT {CALL_COLUMNS} FROM calls WHERE id = $1"
        ))
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Call {} not found", call_id)))?;
        record.to_domain()
    }

    async fn transition_call(
        &self,
        call_id: Uuid,
        from: CallState,
        transition: CallTransition,
    ) -> PortResult<Call> {
        // One conditional UPDATE: only the writer that observes `from` wins.
        let updated = sqlx::query_as::<_, CallRecord>(&format!(
            "UPDATE calls SET \
                 state = $3, \
                 started_at = COALESCE($4, started_at), \
                 ended_at = COALESCE($5, ended_at), \
                 duration_seconds = COALESCE($6, duration_seconds), \
                 coins_spent = COALESCE($7, coins_spent) \
             WHERE id = $1 AND state = $2 \
             RETURNING {CALL_COLUMNS}"
        ))
        .bind(call_id)
        .bind(from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.started_at)
        .bind(transition.ended_at)
        .bind(transition.duration_seconds)
        .bind(transition.coins_spent)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match updated {
            Some(record) => record.to_domain(),
            // Lost the swap or no such call; re-read to tell which.
            None => {
                let current = self.get_call(call_id).await?;
                Err(PortError::InvalidState(format!(
                    "call is {}, expected {}",
                    current.state.as_str(),
                    from.as_str()
                )))
            }
        }
    }

    async fn set_rating(
        &self,
        call_id: Uuid,
        rating: i32,
        feedback: Option<String>,
    ) -> PortResult<Call> {
        let updated = sqlx::query_as::<_, CallRecord>(&format!(
            "UPDATE calls SET rating = $2, feedback = $3 \
             WHERE id = $1 AND state = 'completed' AND rating IS NULL \
             RETURNING {CALL_COLUMNS}"
        ))
        .bind(call_id)
        .bind(rating)
        .bind(feedback)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match updated {
            Some(record) => record.to_domain(),
            None => {
                // Distinguish a missing call from an unratable one.
                self.get_call(call_id).await?;
                Err(PortError::InvalidState(
                    "call is not completed or is already rated".into(),
                ))
            }
        }
    }

    async fn list_stale_ongoing(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Call>> {
        let records = sqlx::query_as::<_, CallRecord>(&format!(
            "SELECT {CALL_COLUMNS} FROM calls \
             WHERE state = 'ongoing' AND started_at < $1 \
             ORDER BY started_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }
}

//=========================================================================================
// `HostStore` Trait Implementation
//=========================================================================================

const HOST_COLUMNS: &str = "id, user_id, status, is_online, rate_per_minute, \
                            total_earnings, total_calls, rating_avg, rating_count";

#[async_trait]
impl HostStore for DbAdapter {
    async fn get_host(&self, host_id: Uuid) -> PortResult<HostAccount> {
        let record = sqlx::query_as::<_, HostRecord>(&format!(
            "SELECT {HOST_COLUMNS} FROM hosts WHERE id = $1"
        ))
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Host {} not found", host_id)))?;
        record.to_domain()
    }

    async fn get_host_by_user(&self, user_id: Uuid) -> PortResult<HostAccount> {
        let record = sqlx::query_as::<_, HostRecord>(&format!(
            "SELECT {HOST_COLUMNS} FROM hosts WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("No host profile for user {}", user_id)))?;
        record.to_domain()
    }

    async fn credit_call_earnings(&self, host_id: Uuid, earnings: i64) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE hosts SET total_earnings = total_earnings + $2, \
             total_calls = total_calls + 1 WHERE id = $1",
        )
        .bind(host_id)
        .bind(earnings)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Host {} not found", host_id)));
        }
        Ok(())
    }

    async fn add_lifetime_beans(&self, host_id: Uuid, beans: i64) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO level_progress (host_id, lifetime_beans) VALUES ($1, $2) \
             ON CONFLICT (host_id) \
             DO UPDATE SET lifetime_beans = level_progress.lifetime_beans + EXCLUDED.lifetime_beans",
        )
        .bind(host_id)
        .bind(beans)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn apply_rating(&self, host_id: Uuid, rating: i32) -> PortResult<()> {
        // The running average is recomputed inside the database so concurrent
        // ratings serialize on the row instead of racing a read-modify-write.
        let result = sqlx::query(
            "UPDATE hosts SET \
                 rating_avg = ROUND((((rating_avg * rating_count) + $2) / (rating_count + 1))::numeric, 1)::float8, \
                 rating_count = rating_count + 1 \
             WHERE id = $1",
        )
        .bind(host_id)
        .bind(f64::from(rating))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Host {} not found", host_id)));
        }
        Ok(())
    }
}

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for DbAdapter {
    async fn get_user(&self, user_id: Uuid) -> PortResult<UserAccount> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, role, coin_balance FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        record.to_domain()
    }

    async fn debit_coins(&self, user_id: Uuid, amount: i64) -> PortResult<i64> {
        // The balance guard and the decrement are one statement, so the
        // check-then-act can never race another debit on the same account.
        let new_balance: Option<(i64,)> = sqlx::query_as(
            "UPDATE users SET coin_balance = coin_balance - $2 \
             WHERE id = $1 AND coin_balance >= $2 \
             RETURNING coin_balance",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match new_balance {
            Some((balance,)) => Ok(balance),
            None => {
                let user = self.get_user(user_id).await?;
                Err(PortError::InsufficientBalance(format!(
                    "balance {} < {}",
                    user.coin_balance, amount
                )))
            }
        }
    }

    async fn credit_coins(&self, user_id: Uuid, amount: i64) -> PortResult<i64> {
        let new_balance: Option<(i64,)> = sqlx::query_as(
            "UPDATE users SET coin_balance = coin_balance + $2 WHERE id = $1 \
             RETURNING coin_balance",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        new_balance
            .map(|(balance,)| balance)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }
}

//=========================================================================================
// `TransactionLog` and `LeaderboardStore` Trait Implementations
//=========================================================================================

#[async_trait]
impl TransactionLog for DbAdapter {
    async fn append(&self, tx: Transaction) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO transactions (id, user_id, tx_type, amount, status, call_id, \
             description, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(tx.id)
        .bind(tx.user_id)
        .bind(tx.tx_type.as_str())
        .bind(tx.amount)
        .bind(status_str(tx.status))
        .bind(tx.call_id)
        .bind(tx.description)
        .bind(tx.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn list_for_call(&self, call_id: Uuid) -> PortResult<Vec<Transaction>> {
        #[derive(FromRow)]
        struct TxRecord {
            id: Uuid,
            user_id: Uuid,
            tx_type: String,
            amount: i64,
            status: String,
            call_id: Option<Uuid>,
            description: String,
            created_at: DateTime<Utc>,
        }

        let records = sqlx::query_as::<_, TxRecord>(
            "SELECT id, user_id, tx_type, amount, status, call_id, description, created_at \
             FROM transactions WHERE call_id = $1 ORDER BY created_at ASC",
        )
        .bind(call_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records
            .into_iter()
            .map(|r| {
                Ok(Transaction {
                    id: r.id,
                    user_id: r.user_id,
                    tx_type: parse_tx_type(&r.tx_type)?,
                    amount: r.amount,
                    status: parse_tx_status(&r.status)?,
                    call_id: r.call_id,
                    description: r.description,
                    created_at: r.created_at,
                })
            })
            .collect()
    }
}

fn parse_tx_type(raw: &str) -> PortResult<hostline_core::domain::TransactionType> {
    use hostline_core::domain::TransactionType::*;
    match raw {
        "purchase" => Ok(Purchase),
        "call_debit" => Ok(CallDebit),
        "call_credit" => Ok(CallCredit),
        "withdrawal" => Ok(Withdrawal),
        "refund" => Ok(Refund),
        "gift_debit" => Ok(GiftDebit),
        "gift_credit" => Ok(GiftCredit),
        other => Err(PortError::Unexpected(format!(
            "unknown transaction type in database: {other}"
        ))),
    }
}

fn parse_tx_status(raw: &str) -> PortResult<hostline_core::domain::TransactionStatus> {
    use hostline_core::domain::TransactionStatus::*;
    match raw {
        "pending" => Ok(Pending),
        "completed" => Ok(Completed),
        "failed" => Ok(Failed),
        other => Err(PortError::Unexpected(format!(
            "unknown transaction status in database: {other}"
        ))),
    }
}

#[async_trait]
impl LeaderboardStore for DbAdapter {
    async fn accrue_weekly(
        &self,
        user_id: Uuid,
        week_start: NaiveDate,
        duration_seconds: i64,
        calls: i64,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO leaderboard_weekly (user_id, week_start, duration_seconds, calls) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, week_start) DO UPDATE SET \
                 duration_seconds = leaderboard_weekly.duration_seconds + EXCLUDED.duration_seconds, \
                 calls = leaderboard_weekly.calls + EXCLUDED.calls",
        )
        .bind(user_id)
        .bind(week_start)
        .bind(duration_seconds)
        .bind(calls)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `FreeTargetStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl FreeTargetStore for DbAdapter {
    async fn get_free_target(&self, host_id: Uuid) -> PortResult<Option<FreeTarget>> {
        let record = sqlx::query_as::<_, FreeTargetRecord>(
            "SELECT doc, version FROM free_targets WHERE host_id = $1",
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(|r| {
            let mut target = r.doc.0;
            // The column is authoritative for optimistic concurrency.
            target.version = r.version;
            target
        }))
    }

    async fn insert_free_target(&self, target: FreeTarget) -> PortResult<FreeTarget> {
        let result = sqlx::query(
            "INSERT INTO free_targets (host_id, doc, version) VALUES ($1, $2, $3) \
             ON CONFLICT (host_id) DO NOTHING",
        )
        .bind(target.host_id)
        .bind(Json(&target))
        .bind(target.version)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::Conflict(format!(
                "free target for host {} already exists",
                target.host_id
            )));
        }
        Ok(target)
    }

    async fn save_free_target(
        &self,
        target: &FreeTarget,
        expected_version: i64,
    ) -> PortResult<()> {
        let mut doc = target.clone();
        doc.version = expected_version + 1;
        let result = sqlx::query(
            "UPDATE free_targets SET doc = $2, version = version + 1 \
             WHERE host_id = $1 AND version = $3",
        )
        .bind(target.host_id)
        .bind(Json(&doc))
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::Conflict(format!(
                "free target for host {} was modified concurrently",
                target.host_id
            )));
        }
        Ok(())
    }
}
