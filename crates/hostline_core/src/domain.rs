//! crates/hostline_core/src/domain.rs
//!
//! Defines the pure, core data structures for the call marketplace.
//! These structs are independent of any database or serialization format
//! (serde derives exist only so document-shaped values can be stored as JSON).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Users, Hosts, and Authentication
//=========================================================================================

/// The role attached to an authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
}

/// The identity resolved from an access token by the `TokenVerifier` port.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// A platform user. `coin_balance` is mutated only through settlement-backed
/// debit/credit operations and never goes negative.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub id: Uuid,
    pub role: UserRole,
    pub coin_balance: i64,
}

/// Moderation status of a host profile. Only `Approved` hosts can receive calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Pending,
    Approved,
    Rejected,
}

/// A service-provider profile, distinct from its owning user account.
///
/// `total_earnings` only increases through settlement from the call ledger
/// (or a free-target bonus) and is never negative.
#[derive(Debug, Clone)]
pub struct HostAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: HostStatus,
    pub is_online: bool,
    /// The host's static per-minute rate in coins, used when no charm-level
    /// rate applies.
    pub rate_per_minute: i64,
    pub total_earnings: i64,
    pub total_calls: i64,
    pub rating_avg: f64,
    pub rating_count: i64,
}

//=========================================================================================
// Calls
//=========================================================================================

/// The call state machine. Transitions are strictly forward:
/// `Initiated -> Ongoing -> Completed`, with error exits
/// `Initiated -> Cancelled` and `Initiated | Ongoing -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initiated,
    Ongoing,
    Completed,
    Cancelled,
    Failed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Initiated => "initiated",
            CallState::Ongoing => "ongoing",
            CallState::Completed => "completed",
            CallState::Cancelled => "cancelled",
            CallState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Cancelled | CallState::Failed
        )
    }
}

/// One attempted or completed video session. Never deleted.
///
/// `started_at` is set at initiation and reset at acceptance, so the billing
/// clock starts when the host picks up, not while the phone is ringing.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: Uuid,
    pub caller_id: Uuid,
    /// References the host profile, not the host's user account.
    pub host_id: Uuid,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Whole seconds, finalized once at call end.
    pub duration_seconds: i64,
    /// Finalized exactly once, at the `Ongoing -> Completed` transition.
    pub coins_spent: i64,
    /// 1-5, settable once and only while `Completed`.
    pub rating: Option<i32>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Rates and Settlement
//=========================================================================================

/// How a per-minute rate was resolved for billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateKind {
    /// The host has charm-level data; the level's rate applies.
    Leveled(i32),
    /// No level data; the host's stored static rate applies.
    Static,
}

/// The effective billing rate for one settlement.
#[derive(Debug, Clone, Copy)]
pub struct RateQuote {
    pub coins_per_minute: i64,
    pub kind: RateKind,
}

/// The outcome of a successful call settlement, returned to the caller.
#[derive(Debug, Clone, Copy)]
pub struct SettlementSummary {
    pub coins_spent: i64,
    pub duration_seconds: i64,
    pub duration_minutes: i64,
    pub new_caller_balance: i64,
    pub host_earnings: i64,
    pub rate_used: i64,
}

//=========================================================================================
// Settlement Ledger
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    CallDebit,
    CallCredit,
    Withdrawal,
    Refund,
    GiftDebit,
    GiftCredit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::CallDebit => "call_debit",
            TransactionType::CallCredit => "call_credit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Refund => "refund",
            TransactionType::GiftDebit => "gift_debit",
            TransactionType::GiftCredit => "gift_credit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// An append-only settlement ledger entry. Immutable once its status reaches
/// a terminal value; the only allowed mutation is `Pending -> Completed|Failed`.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tx_type: TransactionType,
    pub amount: i64,
    pub status: TransactionStatus,
    pub call_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Builds a completed ledger entry for one side of a call settlement.
    pub fn for_call(
        user_id: Uuid,
        tx_type: TransactionType,
        amount: i64,
        call_id: Uuid,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tx_type,
            amount,
            status: TransactionStatus::Completed,
            call_id: Some(call_id),
            description: description.into(),
            created_at: now,
        }
    }
}

//=========================================================================================
// Free Target (weekly/daily quota tracker)
//=========================================================================================

/// Status of one day inside a free-target week.
/// Transitions `Pending -> Completed | Failed | AdminOverride` only, except an
/// admin override can force any status at any time with an audit note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    Pending,
    Completed,
    Failed,
    AdminOverride,
}

/// One calendar day's quota tracking inside a week. Exactly one per date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayTarget {
    pub date: NaiveDate,
    pub status: DayStatus,
    /// Accumulated call duration in seconds.
    pub total_call_duration: i64,
    pub disconnect_count: i32,
    pub timer_active: bool,
    pub timer_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub override_note: Option<String>,
    pub override_by: Option<Uuid>,
}

impl DayTarget {
    pub fn pending(date: NaiveDate) -> Self {
        Self {
            date,
            status: DayStatus::Pending,
            total_call_duration: 0,
            disconnect_count: 0,
            timer_active: false,
            timer_started_at: None,
            completed_at: None,
            override_note: None,
            override_by: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekStatus {
    Pending,
    Completed,
    Failed,
}

/// A Monday-to-Sunday tracking week of exactly 7 `DayTarget`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeekTarget {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Vec<DayTarget>,
    pub completed_days: i32,
    pub status: WeekStatus,
}

impl WeekTarget {
    /// Builds a fresh week of 7 pending days starting at the given Monday.
    pub fn starting(monday: NaiveDate) -> Self {
        let days = (0..7)
            .map(|offset| DayTarget::pending(monday + chrono::Duration::days(offset)))
            .collect();
        Self {
            start_date: monday,
            end_date: monday + chrono::Duration::days(6),
            days,
            completed_days: 0,
            status: WeekStatus::Pending,
        }
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayTarget> {
        self.days.iter().find(|d| d.date == date)
    }

    pub fn day_mut(&mut self, date: NaiveDate) -> Option<&mut DayTarget> {
        self.days.iter_mut().find(|d| d.date == date)
    }
}

/// One entry in the rolling disconnect log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectEvent {
    pub at: DateTime<Utc>,
    pub call_id: Uuid,
}

pub const DEFAULT_TARGET_DURATION_PER_DAY: i64 = 28_800;
pub const DEFAULT_MAX_DISCONNECTS: i32 = 3;
pub const DEFAULT_DISCONNECT_WINDOW: i64 = 600;

/// The per-host free-target document: daily duration quotas tracked across a
/// rolling week, with a disconnect-failure rule and admin override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeTarget {
    pub host_id: Uuid,
    pub is_enabled: bool,
    /// Daily quota in seconds. Default 28800 (8 hours).
    pub target_duration_per_day: i64,
    pub max_disconnects_allowed: i32,
    /// Rolling window in seconds for counting disconnects.
    pub disconnect_time_window: i64,
    pub current_week: WeekTarget,
    pub week_history: Vec<WeekTarget>,
    pub disconnect_log: Vec<DisconnectEvent>,
    pub weeks_completed: i64,
    pub weeks_failed: i64,
    /// Optimistic-concurrency version, bumped on every save.
    pub version: i64,
}

impl FreeTarget {
    /// Creates a fresh document for a host, tracking the week that starts at
    /// the given Monday.
    pub fn new(host_id: Uuid, monday: NaiveDate) -> Self {
        Self {
            host_id,
            is_enabled: false,
            target_duration_per_day: DEFAULT_TARGET_DURATION_PER_DAY,
            max_disconnects_allowed: DEFAULT_MAX_DISCONNECTS,
            disconnect_time_window: DEFAULT_DISCONNECT_WINDOW,
            current_week: WeekTarget::starting(monday),
            week_history: Vec::new(),
            disconnect_log: Vec::new(),
            weeks_completed: 0,
            weeks_failed: 0,
            version: 0,
        }
    }
}
