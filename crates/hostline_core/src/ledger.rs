//! crates/hostline_core/src/ledger.rs
//!
//! The call ledger: the `initiated -> ongoing -> completed` state machine and
//! the settlement algorithm that runs at call end. All money movement, level
//! progression, leaderboard accrual, and free-target notification flow through
//! `end_call`, guarded so settlement happens at most once per call no matter
//! which party (or the idle sweeper) triggers the end.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::{billed_minutes, host_earnings, week_start};
use crate::domain::{
    AuthContext, Call, CallState, HostAccount, HostStatus, SettlementSummary, Transaction,
    TransactionType, UserRole,
};
use crate::free_target::FreeTargetService;
use crate::ports::{
    AccountStore, CallStore, CallTransition, HostStore, LeaderboardStore, PortError, PortResult,
    RateSource, TransactionLog,
};

/// Coordinates the call state machine against the storage ports.
pub struct CallLedger {
    calls: Arc<dyn CallStore>,
    hosts: Arc<dyn HostStore>,
    accounts: Arc<dyn AccountStore>,
    transactions: Arc<dyn TransactionLog>,
    leaderboard: Arc<dyn LeaderboardStore>,
    rates: Arc<dyn RateSource>,
    free_targets: Arc<FreeTargetService>,
    /// Host share of call revenue in percent; the platform keeps the rest.
    host_share_percent: i64,
}

impl CallLedger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        calls: Arc<dyn CallStore>,
        hosts: Arc<dyn HostStore>,
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionLog>,
        leaderboard: Arc<dyn LeaderboardStore>,
        rates: Arc<dyn RateSource>,
        free_targets: Arc<FreeTargetService>,
        host_share_percent: i64,
    ) -> Self {
        Self {
            calls,
            hosts,
            accounts,
            transactions,
            leaderboard,
            rates,
            free_targets,
            host_share_percent,
        }
    }

    //-------------------------------------------------------------------------------------
    // Initiate
    //-------------------------------------------------------------------------------------

    /// Creates a call in `Initiated` state. The host must be approved and
    /// online, and the caller must be able to afford at least one minute at
    /// the host's static rate.
    pub async fn initiate_call(
        &self,
        caller: AuthContext,
        host_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<Call> {
        let host = self.hosts.get_host(host_id).await?;
        if host.status != HostStatus::Approved {
            return Err(PortError::Unavailable("host is not approved".into()));
        }
        if !host.is_online {
            return Err(PortError::Unavailable("host is not online".into()));
        }

        let account = self.accounts.get_user(caller.user_id).await?;
        if account.coin_balance < host.rate_per_minute {
            return Err(PortError::InsufficientBalance(format!(
                "balance {} cannot cover one minute at {} coins",
                account.coin_balance, host.rate_per_minute
            )));
        }

        let call = Call {
            id: Uuid::new_v4(),
            caller_id: caller.user_id,
            host_id,
            state: CallState::Initiated,
            started_at: now,
            ended_at: None,
            duration_seconds: 0,
            coins_spent: 0,
            rating: None,
            feedback: None,
            created_at: now,
        };
        let call = self.calls.insert_call(call).await?;
        info!(call_id = %call.id, caller = %caller.user_id, host = %host_id, "call initiated");
        Ok(call)
    }

    //-------------------------------------------------------------------------------------
    // Accept
    //-------------------------------------------------------------------------------------

    /// Host accepts a ringing call: `Initiated -> Ongoing`, and the billing
    /// clock restarts at the acceptance instant, not at the ring.
    pub async fn accept_call(
        &self,
        requester: AuthContext,
        call_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<Call> {
        let call = self.calls.get_call(call_id).await?;
        let host = self.hosts.get_host(call.host_id).await?;
        if host.user_id != requester.user_id {
            return Err(PortError::Forbidden(
                "only the call's host can accept it".into(),
            ));
        }

        let call = self
            .calls
            .transition_call(
                call_id,
                CallState::Initiated,
                CallTransition::to(CallState::Ongoing).restarting_clock(now),
            )
            .await?;
        info!(call_id = %call.id, "call accepted");
        Ok(call)
    }

    //-------------------------------------------------------------------------------------
    // End
    //-------------------------------------------------------------------------------------

    /// Ends a call. Either party (or an admin) may end; a still-ringing call
    /// is cancelled for free, an ongoing call is settled.
    ///
    /// Settlement order: duration is computed exactly once, the
    /// `Ongoing -> Completed` compare-and-swap picks the single settlement
    /// winner, and only the winner moves money. A caller who cannot cover the
    /// final bill gets the call marked `Failed` (persisted first) and an
    /// `InsufficientBalance` error, with no coins moved at all.
    pub async fn end_call(
        &self,
        requester: AuthContext,
        call_id: Uuid,
        was_disconnected: bool,
        now: DateTime<Utc>,
    ) -> PortResult<(Call, SettlementSummary)> {
        let call = self.calls.get_call(call_id).await?;
        let host = self.hosts.get_host(call.host_id).await?;
        self.authorize_end(&call, &host, requester)?;

        if call.state.is_terminal() {
            return Err(PortError::InvalidState(format!(
                "call already ended (state: {})",
                call.state.as_str()
            )));
        }

        if call.state == CallState::Initiated {
            return self.cancel_unanswered(&call, now).await;
        }

        // Ongoing: settle. Duration is derived once from millisecond
        // timestamps, floored to whole seconds, and reused everywhere below.
        let duration_seconds = ((now - call.started_at).num_milliseconds() / 1000).max(0);
        let duration_minutes = billed_minutes(duration_seconds);
        let quote = self.rates.resolve_rate(&host).await?;
        let coins = duration_minutes * quote.coins_per_minute;

        let balance = self.accounts.get_user(call.caller_id).await?.coin_balance;
        if balance < coins {
            // No free calls: the session is marked failed and persisted
            // before the error surfaces, and no coins move.
            let failed = self
                .calls
                .transition_call(
                    call_id,
                    CallState::Ongoing,
                    CallTransition::to(CallState::Failed).ending(now, duration_seconds, coins),
                )
                .await?;
            warn!(call_id = %failed.id, coins, balance, "settlement failed: insufficient balance");
            self.notify_free_target(&host, call_id, duration_seconds, was_disconnected, now)
                .await;
            return Err(PortError::InsufficientBalance(format!(
                "call cost {coins} coins but balance is {balance}"
            )));
        }

        // The compare-and-swap below is the at-most-once settlement guard: a
        // concurrent End on the same call loses here with InvalidState and
        // never reaches the money path.
        let completed = self
            .calls
            .transition_call(
                call_id,
                CallState::Ongoing,
                CallTransition::to(CallState::Completed).ending(now, duration_seconds, coins),
            )
            .await?;

        let new_balance = match self.accounts.debit_coins(call.caller_id, coins).await {
            Ok(balance) => balance,
            Err(PortError::InsufficientBalance(msg)) => {
                // The balance dropped between the check and the debit. Flip
                // the call to failed so history shows what happened.
                let _ = self
                    .calls
                    .transition_call(
                        call_id,
                        CallState::Completed,
                        CallTransition::to(CallState::Failed),
                    )
                    .await;
                self.notify_free_target(&host, call_id, duration_seconds, was_disconnected, now)
                    .await;
                return Err(PortError::InsufficientBalance(msg));
            }
            Err(e) => return Err(e),
        };

        self.transactions
            .append(Transaction::for_call(
                call.caller_id,
                TransactionType::CallDebit,
                coins,
                call_id,
                format!("Video call ({duration_minutes} min)"),
                now,
            ))
            .await?;

        let earnings = host_earnings(coins, self.host_share_percent);
        self.hosts.credit_call_earnings(host.id, earnings).await?;
        self.transactions
            .append(Transaction::for_call(
                host.user_id,
                TransactionType::CallCredit,
                earnings,
                call_id,
                format!("Call earnings ({duration_minutes} min)"),
                now,
            ))
            .await?;
        self.hosts.add_lifetime_beans(host.id, earnings).await?;

        let week = week_start(now.date_naive());
        self.leaderboard
            .accrue_weekly(call.caller_id, week, duration_seconds, 1)
            .await?;
        self.leaderboard
            .accrue_weekly(host.user_id, week, duration_seconds, 1)
            .await?;

        self.notify_free_target(&host, call_id, duration_seconds, was_disconnected, now)
            .await;

        info!(
            call_id = %call_id,
            coins, earnings, duration_seconds, "call settled"
        );
        Ok((
            completed,
            SettlementSummary {
                coins_spent: coins,
                duration_seconds,
                duration_minutes,
                new_caller_balance: new_balance,
                host_earnings: earnings,
                rate_used: quote.coins_per_minute,
            },
        ))
    }

    /// An End on a call the host never accepted: `Initiated -> Cancelled`,
    /// nothing billed.
    async fn cancel_unanswered(
        &self,
        call: &Call,
        now: DateTime<Utc>,
    ) -> PortResult<(Call, SettlementSummary)> {
        let cancelled = self
            .calls
            .transition_call(
                call.id,
                CallState::Initiated,
                CallTransition::to(CallState::Cancelled).ending(now, 0, 0),
            )
            .await?;
        let balance = self.accounts.get_user(call.caller_id).await?.coin_balance;
        info!(call_id = %call.id, "unanswered call cancelled");
        Ok((
            cancelled,
            SettlementSummary {
                coins_spent: 0,
                duration_seconds: 0,
                duration_minutes: 0,
                new_caller_balance: balance,
                host_earnings: 0,
                rate_used: 0,
            },
        ))
    }

    fn authorize_end(
        &self,
        call: &Call,
        host: &HostAccount,
        requester: AuthContext,
    ) -> PortResult<()> {
        let is_party =
            requester.user_id == call.caller_id || requester.user_id == host.user_id;
        if !is_party && !requester.is_admin() {
            return Err(PortError::Forbidden(
                "requester is not a party to this call".into(),
            ));
        }
        Ok(())
    }

    /// Free-target bookkeeping rides along with call end but never vetoes the
    /// settlement result; failures are logged and dropped.
    async fn notify_free_target(
        &self,
        host: &HostAccount,
        call_id: Uuid,
        duration_seconds: i64,
        was_disconnected: bool,
        now: DateTime<Utc>,
    ) {
        match self
            .free_targets
            .record_call(host.id, call_id, duration_seconds, was_disconnected, now)
            .await
        {
            Ok(_) => {}
            Err(e) => warn!(host = %host.id, error = %e, "free-target update failed"),
        }
    }

    //-------------------------------------------------------------------------------------
    // Rate
    //-------------------------------------------------------------------------------------

    /// Caller rates a completed call, once. The host's running average moves
    /// to `(old_avg * old_count + rating) / (old_count + 1)`, one decimal.
    pub async fn rate_call(
        &self,
        requester: AuthContext,
        call_id: Uuid,
        rating: i32,
        feedback: Option<String>,
    ) -> PortResult<Call> {
        if !(1..=5).contains(&rating) {
            return Err(PortError::Validation(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }

        let call = self.calls.get_call(call_id).await?;
        if call.caller_id != requester.user_id {
            return Err(PortError::Forbidden("only the caller can rate".into()));
        }
        if call.state != CallState::Completed {
            return Err(PortError::InvalidState(format!(
                "only completed calls can be rated (state: {})",
                call.state.as_str()
            )));
        }
        if call.rating.is_some() {
            return Err(PortError::InvalidState("call already rated".into()));
        }

        // The conditional write guards against a concurrent duplicate rating.
        let rated = self.calls.set_rating(call_id, rating, feedback).await?;
        self.hosts.apply_rating(call.host_id, rating).await?;
        Ok(rated)
    }

    //-------------------------------------------------------------------------------------
    // Idle sweep
    //-------------------------------------------------------------------------------------

    /// Force-ends `Ongoing` calls whose billing clock started more than
    /// `idle_timeout_secs` ago, settling them through the normal end path with
    /// the disconnect flag set. Returns how many calls were swept.
    pub async fn sweep_stale_calls(
        &self,
        idle_timeout_secs: i64,
        now: DateTime<Utc>,
    ) -> PortResult<usize> {
        let cutoff = now - chrono::Duration::seconds(idle_timeout_secs);
        let stale = self.calls.list_stale_ongoing(cutoff).await?;
        let sweeper = AuthContext {
            user_id: Uuid::nil(),
            role: UserRole::Admin,
        };

        let mut swept = 0;
        for call in stale {
            match self.end_call(sweeper, call.id, true, now).await {
                Ok(_) => {
                    info!(call_id = %call.id, "stale ongoing call force-ended");
                    swept += 1;
                }
                // A racing explicit End already settled it; that is fine.
                Err(PortError::InvalidState(_)) => {}
                Err(PortError::InsufficientBalance(_)) => {
                    // The sweep still flipped the call to failed.
                    swept += 1;
                }
                Err(e) => warn!(call_id = %call.id, error = %e, "failed to sweep stale call"),
            }
        }
        Ok(swept)
    }
}

//=========================================================================================
// Tests
//=========================================================================================
