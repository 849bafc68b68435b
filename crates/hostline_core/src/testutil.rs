//! crates/hostline_core/src/testutil.rs
//!
//! In-memory fake implementations of the storage ports, shared by the ledger
//! and free-target unit tests. The fakes reproduce the concurrency contracts
//! of the real adapters (compare-and-swap transitions, conditional debits,
//! versioned saves) over Mutex-held maps.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::billing::merge_rating;
use crate::domain::{
    Call, CallState, FreeTarget, HostAccount, HostStatus, RateKind, RateQuote, Transaction,
    UserAccount, UserRole,
};
use crate::ports::{
    AccountStore, CallStore, CallTransition, FreeTargetStore, HostStore, LeaderboardStore,
    PortError, PortResult, RateSource, TransactionLog,
};

//=========================================================================================
// Calls
//=========================================================================================

#[derive(Default)]
pub struct FakeCalls {
    calls: Mutex<HashMap<Uuid, Call>>,
}

#[async_trait]
impl CallStore for FakeCalls {
    async fn insert_call(&self, call: Call) -> PortResult<Call> {
        self.calls.lock().unwrap().insert(call.id, call.clone());
        Ok(call)
    }

    async fn get_call(&self, call_id: Uuid) -> PortResult<Call> {
        self.calls
            .lock()
            .unwrap()
            .get(&call_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("call {call_id}")))
    }

    async fn transition_call(
        &self,
        call_id: Uuid,
        from: CallState,
        transition: CallTransition,
    ) -> PortResult<Call> {
        let mut calls = self.calls.lock().unwrap();
        let call = calls
            .get_mut(&call_id)
            .ok_or_else(|| PortError::NotFound(format!("call {call_id}")))?;
        if call.state != from {
            return Err(PortError::InvalidState(format!(
                "call is {}, expected {}",
                call.state.as_str(),
                from.as_str()
            )));
        }
        call.state = transition.to;
        if let Some(at) = transition.started_at {
            call.started_at = at;
        }
        if let Some(at) = transition.ended_at {
            call.ended_at = Some(at);
        }
        if let Some(d) = transition.duration_seconds {
            call.duration_seconds = d;
        }
        if let Some(c) = transition.coins_spent {
            call.coins_spent = c;
        }
        Ok(call.clone())
    }

    async fn set_rating(
        &self,
        call_id: Uuid,
        rating: i32,
        feedback: Option<String>,
    ) -> PortResult<Call> {
        let mut calls = self.calls.lock().unwrap();
        let call = calls
            .get_mut(&call_id)
            .ok_or_else(|| PortError::NotFound(format!("call {call_id}")))?;
        if call.state != CallState::Completed || call.rating.is_some() {
            return Err(PortError::InvalidState("call not ratable".into()));
        }
        call.rating = Some(rating);
        call.feedback = feedback;
        Ok(call.clone())
    }

    async fn list_stale_ongoing(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Call>> {
        Ok(self
            .calls
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.state == CallState::Ongoing && c.started_at < cutoff)
            .cloned()
            .collect())
    }
}

//=========================================================================================
// Hosts
//=========================================================================================

#[derive(Default)]
pub struct FakeHosts {
    hosts: Mutex<HashMap<Uuid, HostAccount>>,
    beans: Mutex<HashMap<Uuid, i64>>,
}

impl FakeHosts {
    pub fn with_host(self, host: HostAccount) -> Self {
        self.hosts.lock().unwrap().insert(host.id, host);
        self
    }

    pub fn snapshot(&self, host_id: Uuid) -> HostAccount {
        self.hosts.lock().unwrap().get(&host_id).cloned().unwrap()
    }

    pub fn lifetime_beans(&self, host_id: Uuid) -> i64 {
        self.beans.lock().unwrap().get(&host_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HostStore for FakeHosts {
    async fn get_host(&self, host_id: Uuid) -> PortResult<HostAccount> {
        self.hosts
            .lock()
            .unwrap()
            .get(&host_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("host {host_id}")))
    }

    async fn get_host_by_user(&self, user_id: Uuid) -> PortResult<HostAccount> {
        self.hosts
            .lock()
            .unwrap()
            .values()
            .find(|h| h.user_id == user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("no host owned by user {user_id}")))
    }

    async fn credit_call_earnings(&self, host_id: Uuid, earnings: i64) -> PortResult<()> {
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts
            .get_mut(&host_id)
            .ok_or_else(|| PortError::NotFound(format!("host {host_id}")))?;
        host.total_earnings += earnings;
        host.total_calls += 1;
        Ok(())
    }

    async fn add_lifetime_beans(&self, host_id: Uuid, beans: i64) -> PortResult<()> {
        *self.beans.lock().unwrap().entry(host_id).or_insert(0) += beans;
        Ok(())
    }

    async fn apply_rating(&self, host_id: Uuid, rating: i32) -> PortResult<()> {
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts
            .get_mut(&host_id)
            .ok_or_else(|| PortError::NotFound(format!("host {host_id}")))?;
        host.rating_avg = merge_rating(host.rating_avg, host.rating_count, rating);
        host.rating_count += 1;
        Ok(())
    }
}

/// A convenience builder for an approved, online host.
pub fn approved_host(user_id: Uuid, rate_per_minute: i64) -> HostAccount {
    HostAccount {
        id: Uuid::new_v4(),
        user_id,
        status: HostStatus::Approved,
        is_online: true,
        rate_per_minute,
        total_earnings: 0,
        total_calls: 0,
        rating_avg: 0.0,
        rating_count: 0,
    }
}

//=========================================================================================
// Accounts
//=========================================================================================

#[derive(Default)]
pub struct FakeAccounts {
    users: Mutex<HashMap<Uuid, UserAccount>>,
}

impl FakeAccounts {
    pub fn with_user(self, user_id: Uuid, coin_balance: i64) -> Self {
        self.users.lock().unwrap().insert(
            user_id,
            UserAccount {
                id: user_id,
                role: UserRole::User,
                coin_balance,
            },
        );
        self
    }

    pub fn balance(&self, user_id: Uuid) -> i64 {
        self.users.lock().unwrap().get(&user_id).unwrap().coin_balance
    }
}

#[async_trait]
impl AccountStore for FakeAccounts {
    async fn get_user(&self, user_id: Uuid) -> PortResult<UserAccount> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))
    }

    async fn debit_coins(&self, user_id: Uuid, amount: i64) -> PortResult<i64> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))?;
        if user.coin_balance < amount {
            return Err(PortError::InsufficientBalance(format!(
                "balance {} < {}",
                user.coin_balance, amount
            )));
        }
        user.coin_balance -= amount;
        Ok(user.coin_balance)
    }

    async fn credit_coins(&self, user_id: Uuid, amount: i64) -> PortResult<i64> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))?;
        user.coin_balance += amount;
        Ok(user.coin_balance)
    }
}

//=========================================================================================
// Transactions and Leaderboard
//=========================================================================================

#[derive(Default)]
pub struct FakeTransactions {
    entries: Mutex<Vec<Transaction>>,
}

impl FakeTransactions {
    pub fn all(&self) -> Vec<Transaction> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionLog for FakeTransactions {
    async fn append(&self, tx: Transaction) -> PortResult<()> {
        self.entries.lock().unwrap().push(tx);
        Ok(())
    }

    async fn list_for_call(&self, call_id: Uuid) -> PortResult<Vec<Transaction>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.call_id == Some(call_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeLeaderboard {
    /// (user, week) -> (seconds, calls)
    pub entries: Mutex<HashMap<(Uuid, NaiveDate), (i64, i64)>>,
}

#[async_trait]
impl LeaderboardStore for FakeLeaderboard {
    async fn accrue_weekly(
        &self,
        user_id: Uuid,
        week_start: NaiveDate,
        duration_seconds: i64,
        calls: i64,
    ) -> PortResult<()> {
        let mut entries = self.entries.lock().unwrap();
        let slot = entries.entry((user_id, week_start)).or_insert((0, 0));
        slot.0 += duration_seconds;
        slot.1 += calls;
        Ok(())
    }
}

//=========================================================================================
// Free Targets and Rates
//=========================================================================================

#[derive(Default)]
pub struct FakeFreeTargets {
    targets: Mutex<HashMap<Uuid, FreeTarget>>,
}

#[async_trait]
impl FreeTargetStore for FakeFreeTargets {
    async fn get_free_target(&self, host_id: Uuid) -> PortResult<Option<FreeTarget>> {
        Ok(self.targets.lock().unwrap().get(&host_id).cloned())
    }

    async fn insert_free_target(&self, target: FreeTarget) -> PortResult<FreeTarget> {
        let mut map = self.targets.lock().unwrap();
        if map.contains_key(&target.host_id) {
            return Err(PortError::Conflict("target already exists".into()));
        }
        map.insert(target.host_id, target.clone());
        Ok(target)
    }

    async fn save_free_target(
        &self,
        target: &FreeTarget,
        expected_version: i64,
    ) -> PortResult<()> {
        let mut map = self.targets.lock().unwrap();
        let stored = map
            .get_mut(&target.host_id)
            .ok_or_else(|| PortError::NotFound("free target".into()))?;
        if stored.version != expected_version {
            return Err(PortError::Conflict("version mismatch".into()));
        }
        let mut updated = target.clone();
        updated.version = expected_version + 1;
        *stored = updated;
        Ok(())
    }
}

/// Resolves leveled rates for the hosts it knows about and falls back to the
/// host's static rate otherwise, mirroring the real rate source.
#[derive(Default)]
pub struct FakeRates {
    leveled: Mutex<HashMap<Uuid, (i32, i64)>>,
}

impl FakeRates {
    pub fn with_level(self, host_id: Uuid, level: i32, coins_per_minute: i64) -> Self {
        self.leveled.lock().unwrap().insert(host_id, (level, coins_per_minute));
        self
    }
}

#[async_trait]
impl RateSource for FakeRates {
    async fn resolve_rate(&self, host: &HostAccount) -> PortResult<RateQuote> {
        if let Some(&(level, rate)) = self.leveled.lock().unwrap().get(&host.id) {
            return Ok(RateQuote {
                coins_per_minute: rate,
                kind: RateKind::Leveled(level),
            });
        }
        Ok(RateQuote {
            coins_per_minute: host.rate_per_minute,
            kind: RateKind::Static,
        })
    }
}
