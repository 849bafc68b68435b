//! crates/hostline_core/src/free_target.rs
//!
//! The free-target automaton: a per-host daily/weekly quota tracker driven by
//! call-duration and disconnect events, with lazy week rollover and admin
//! override.
//!
//! The state machine itself is pure mutation over the `FreeTarget` document.
//! `FreeTargetService` wraps it with load / mutate / versioned-save against
//! the `FreeTargetStore` port, retrying on write conflicts so concurrent
//! updates for the same host serialize instead of losing writes.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

use crate::billing::week_start;
use crate::domain::{DayStatus, DayTarget, DisconnectEvent, FreeTarget, WeekStatus, WeekTarget};
use crate::ports::{FreeTargetStore, PortError, PortResult};

/// Attempts for an optimistic save before giving up.
const MAX_SAVE_RETRIES: usize = 3;

/// What a duration-accrual event did to today's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOutcome {
    /// Duration added; the day is still pending.
    Accrued { total: i64 },
    /// The accrual pushed the day over its quota.
    DayCompleted,
    /// The disconnect threshold force-failed the day; no duration was added.
    DayFailed,
    /// Today is not pending (already completed/failed/overridden); nothing
    /// was recorded.
    Ignored,
}

//=========================================================================================
// Pure State-Machine Mutations
//=========================================================================================

impl FreeTarget {
    /// Lazily rolls the tracking week forward. Any read or write goes through
    /// this first: if `now` has passed the current week's end date, the week
    /// is finalized (failed unless it already completed), archived, counted,
    /// and replaced by the fresh week containing `now`.
    ///
    /// Returns `true` if a rollover happened, so read paths know to persist.
    pub fn ensure_current_week(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today <= self.current_week.end_date {
            return false;
        }

        let mut finished = std::mem::replace(
            &mut self.current_week,
            WeekTarget::starting(week_start(today)),
        );
        if finished.status != WeekStatus::Completed {
            finished.status = WeekStatus::Failed;
        }
        match finished.status {
            WeekStatus::Completed => self.weeks_completed += 1,
            _ => self.weeks_failed += 1,
        }
        self.week_history.push(finished);
        true
    }

    /// Records one disconnect against the rolling window and today's counter.
    ///
    /// Returns `true` when this disconnect crossed the allowed threshold and
    /// force-failed the day. A failed day is terminal: the caller must not
    /// accrue the triggering call's duration afterwards.
    pub fn record_disconnect(&mut self, now: DateTime<Utc>, call_id: Uuid) -> bool {
        let window_floor = now - chrono::Duration::seconds(self.disconnect_time_window);
        self.disconnect_log.retain(|e| e.at > window_floor);
        self.disconnect_log.push(DisconnectEvent { at: now, call_id });

        let max_allowed = self.max_disconnects_allowed;
        let in_window = self.disconnect_log.len() as i32;
        let Some(day) = self.current_week.day_mut(now.date_naive()) else {
            return false;
        };
        day.disconnect_count += 1;

        if day.status == DayStatus::Pending && in_window >= max_allowed {
            day.status = DayStatus::Failed;
            return true;
        }
        false
    }

    /// Adds call seconds to today's total. Completion is detected here too,
    /// not only on explicit timer stop: crossing the quota marks the day
    /// completed and bumps the week's counter exactly once. Accrual onto a
    /// non-pending day is ignored.
    pub fn accrue_duration(&mut self, now: DateTime<Utc>, seconds: i64) -> DayOutcome {
        let quota = self.target_duration_per_day;
        let Some(day) = self.current_week.day_mut(now.date_naive()) else {
            return DayOutcome::Ignored;
        };
        if day.status != DayStatus::Pending {
            return DayOutcome::Ignored;
        }

        day.total_call_duration += seconds;
        if day.total_call_duration >= quota {
            day.status = DayStatus::Completed;
            day.completed_at = Some(now);
            self.current_week.completed_days += 1;
            if self.current_week.completed_days >= 7 {
                self.current_week.status = WeekStatus::Completed;
            }
            DayOutcome::DayCompleted
        } else {
            DayOutcome::Accrued {
                total: day.total_call_duration,
            }
        }
    }

    /// Arms today's timer. Only valid on a pending day with no timer running.
    pub fn start_timer(&mut self, now: DateTime<Utc>) -> PortResult<DayTarget> {
        let day = self
            .current_week
            .day_mut(now.date_naive())
            .ok_or_else(|| PortError::NotFound("no target for today".into()))?;
        if day.status != DayStatus::Pending {
            return Err(PortError::InvalidState(format!(
                "today's target is not pending (status: {:?})",
                day.status
            )));
        }
        if day.timer_active {
            return Err(PortError::InvalidState("timer already running".into()));
        }
        day.timer_active = true;
        day.timer_started_at = Some(now);
        Ok(day.clone())
    }

    /// Disarms today's timer and settles the day if its accumulated duration
    /// already meets the quota.
    pub fn stop_timer(&mut self, now: DateTime<Utc>) -> PortResult<DayTarget> {
        let quota = self.target_duration_per_day;
        let mut completed_now = false;
        let snapshot = {
            let day = self
                .current_week
                .day_mut(now.date_naive())
                .ok_or_else(|| PortError::NotFound("no target for today".into()))?;
            if !day.timer_active {
                return Err(PortError::InvalidState("timer is not running".into()));
            }
            day.timer_active = false;
            day.timer_started_at = None;
            if day.status == DayStatus::Pending && day.total_call_duration >= quota {
                day.status = DayStatus::Completed;
                day.completed_at = Some(now);
                completed_now = true;
            }
            day.clone()
        };
        if completed_now {
            self.current_week.completed_days += 1;
            if self.current_week.completed_days >= 7 {
                self.current_week.status = WeekStatus::Completed;
            }
        }
        Ok(snapshot)
    }

    /// Admin override: force-sets a day's status by date, in the current week
    /// or any archived week, stamping the audit fields. The containing week's
    /// `completed_days` is adjusted when the transition crosses into or out
    /// of `Completed`.
    pub fn override_day(
        &mut self,
        date: NaiveDate,
        status: DayStatus,
        note: Option<String>,
        admin_id: Uuid,
    ) -> PortResult<DayTarget> {
        let week = if self.current_week.day(date).is_some() {
            &mut self.current_week
        } else {
            self.week_history
                .iter_mut()
                .find(|w| w.day(date).is_some())
                .ok_or_else(|| PortError::NotFound(format!("no target day on {date}")))?
        };

        let (snapshot, was_completed) = match week.day_mut(date) {
            Some(day) => {
                let was_completed = day.status == DayStatus::Completed;
                day.status = status;
                day.override_note = note;
                day.override_by = Some(admin_id);
                (day.clone(), was_completed)
            }
            None => return Err(PortError::NotFound(format!("no target day on {date}"))),
        };

        let now_completed = status == DayStatus::Completed;
        if now_completed && !was_completed {
            week.completed_days += 1;
        } else if was_completed && !now_completed {
            week.completed_days -= 1;
        }
        Ok(snapshot)
    }

    /// Seconds still missing from today's quota.
    pub fn time_remaining(&self, date: NaiveDate) -> i64 {
        self.current_week
            .day(date)
            .map(|d| (self.target_duration_per_day - d.total_call_duration).max(0))
            .unwrap_or(self.target_duration_per_day)
    }
}

//=========================================================================================
// FreeTargetService (store-backed wrapper)
//=========================================================================================

/// Serializes per-host mutations through load / mutate / versioned-save with
/// bounded conflict retry.
pub struct FreeTargetService {
    store: Arc<dyn FreeTargetStore>,
}

impl FreeTargetService {
    pub fn new(store: Arc<dyn FreeTargetStore>) -> Self {
        Self { store }
    }

    /// Runs one mutation against a host's document. The week is rolled over
    /// before the mutation, matching the lazy-rollover rule for every write.
    async fn mutate<T>(
        &self,
        host_id: Uuid,
        now: DateTime<Utc>,
        f: impl Fn(&mut FreeTarget) -> PortResult<T>,
    ) -> PortResult<T> {
        for _ in 0..MAX_SAVE_RETRIES {
            let mut target = self
                .store
                .get_free_target(host_id)
                .await?
                .ok_or_else(|| PortError::NotFound(format!("no free target for host {host_id}")))?;
            target.ensure_current_week(now);
            let expected = target.version;
            let out = f(&mut target)?;
            match self.store.save_free_target(&target, expected).await {
                Ok(()) => return Ok(out),
                Err(PortError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortError::Conflict(format!(
            "free target for host {host_id} kept changing; gave up after {MAX_SAVE_RETRIES} attempts"
        )))
    }

    /// Admin toggle. Enabling a host that has never had a target creates the
    /// document.
    pub async fn toggle(
        &self,
        host_id: Uuid,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> PortResult<FreeTarget> {
        if self.store.get_free_target(host_id).await?.is_none() {
            let mut fresh = FreeTarget::new(host_id, week_start(now.date_naive()));
            fresh.is_enabled = enabled;
            info!(%host_id, enabled, "creating free target document");
            return self.store.insert_free_target(fresh).await;
        }
        self.mutate(host_id, now, |t| {
            t.is_enabled = enabled;
            Ok(t.clone())
        })
        .await
    }

    pub async fn start_timer(&self, host_id: Uuid, now: DateTime<Utc>) -> PortResult<DayTarget> {
        self.mutate(host_id, now, |t| {
            if !t.is_enabled {
                return Err(PortError::InvalidState("free target is not enabled".into()));
            }
            t.start_timer(now)
        })
        .await
    }

    pub async fn stop_timer(&self, host_id: Uuid, now: DateTime<Utc>) -> PortResult<DayTarget> {
        self.mutate(host_id, now, |t| {
            if !t.is_enabled {
                return Err(PortError::InvalidState("free target is not enabled".into()));
            }
            t.stop_timer(now)
        })
        .await
    }

    /// Applies one finished call to today's target: the disconnect rule runs
    /// first, and the call's duration is accrued only if the day survived it.
    ///
    /// Returns `None` when the host has no enabled target, so the call ledger
    /// can treat the whole program as absent.
    pub async fn record_call(
        &self,
        host_id: Uuid,
        call_id: Uuid,
        duration_seconds: i64,
        was_disconnected: bool,
        now: DateTime<Utc>,
    ) -> PortResult<Option<(FreeTarget, DayOutcome)>> {
        match self.store.get_free_target(host_id).await? {
            Some(t) if t.is_enabled => {}
            _ => return Ok(None),
        }
        let out = self
            .mutate(host_id, now, |t| {
                if !t.is_enabled {
                    return Ok((t.clone(), DayOutcome::Ignored));
                }
                if was_disconnected && t.record_disconnect(now, call_id) {
                    return Ok((t.clone(), DayOutcome::DayFailed));
                }
                let outcome = t.accrue_duration(now, duration_seconds);
                Ok((t.clone(), outcome))
            })
            .await?;
        Ok(Some(out))
    }

    pub async fn override_day(
        &self,
        host_id: Uuid,
        date: NaiveDate,
        status: DayStatus,
        note: Option<String>,
        admin_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<DayTarget> {
        self.mutate(host_id, now, |t| {
            t.override_day(date, status, note.clone(), admin_id)
        })
        .await
    }

    /// Read path for the daily-target endpoint. Reads still trigger the lazy
    /// rollover, but only persist when a rollover actually happened.
    pub async fn current(&self, host_id: Uuid, now: DateTime<Utc>) -> PortResult<FreeTarget> {
        for _ in 0..MAX_SAVE_RETRIES {
            let mut target = self
                .store
                .get_free_target(host_id)
                .await?
                .ok_or_else(|| PortError::NotFound(format!("no free target for host {host_id}")))?;
            let expected = target.version;
            if !target.ensure_current_week(now) {
                return Ok(target);
            }
            match self.store.save_free_target(&target, expected).await {
                Ok(()) => return Ok(target),
                Err(PortError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortError::Conflict(format!(
            "free target for host {host_id} kept changing; gave up after {MAX_SAVE_RETRIES} attempts"
        )))
    }
}

//=========================================================================================
// Tests
//=========================================================================================

#[cfg(test)]
mod tests {

    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn enabled_target(host_id: Uuid, now: DateTime<Utc>) -> FreeTarget {
        let mut t = FreeTarget::new(host_id, week_start(now.date_naive()));
        t.is_enabled = true;
        t
    }

    //-------------------------------------------------------------------------------------
    // Pure automaton
    //-------------------------------------------------------------------------------------

    #[test]
    fn rollover_archives_the_old_week_and_builds_a_fresh_one() {
        let host = Uuid::new_v4();
        // Week of Monday 2024-06-03; read again on Wednesday of the next week.
        let t0 = at(2024, 6, 5, 10, 0);
        let later = at(2024, 6, 12, 9, 0);
        let mut target = enabled_target(host, t0);
        target.accrue_duration(t0, 120);

        assert!(target.ensure_current_week(later));

        assert_eq!(target.week_history.len(), 1);
        assert_eq!(target.week_history[0].status, WeekStatus::Failed);
        assert_eq!(target.weeks_failed, 1);

        let week = &target.current_week;
        assert_eq!(week.start_date, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_eq!(week.end_date, NaiveDate::from_ymd_opt(2024, 6, 16).unwrap());
        assert_eq!(week.days.len(), 7);
        assert!(week.days.iter().all(|d| d.status == DayStatus::Pending));
        // Consecutive Monday-to-Sunday dates, one per day.
        for (i, day) in week.days.iter().enumerate() {
            assert_eq!(day.date, week.start_date + chrono::Duration::days(i as i64));
        }
    }

    #[test]
    fn rollover_is_a_noop_inside_the_week() {
        let host = Uuid::new_v4();
        let t0 = at(2024, 6, 5, 10, 0);
        let mut target = enabled_target(host, t0);
        assert!(!target.ensure_current_week(at(2024, 6, 9, 23, 0)));
        assert!(target.week_history.is_empty());
    }

    #[test]
    fn disconnect_threshold_force_fails_the_day() {
        let host = Uuid::new_v4();
        let mut target = enabled_target(host, at(2024, 6, 5, 10, 0));
        target.max_disconnects_allowed = 3;
        target.disconnect_time_window = 600;

        assert!(!target.record_disconnect(at(2024, 6, 5, 10, 0), Uuid::new_v4()));
        assert!(!target.record_disconnect(at(2024, 6, 5, 10, 3), Uuid::new_v4()));
        // Third disconnect within 600s crosses the threshold.
        assert!(target.record_disconnect(at(2024, 6, 5, 10, 6), Uuid::new_v4()));

        let day = target.current_week.day(NaiveDate::from_ymd_opt(2024, 6, 5).unwrap());
        assert_eq!(day.unwrap().status, DayStatus::Failed);
        assert_eq!(day.unwrap().disconnect_count, 3);

        // A failed day accrues nothing further.
        assert_eq!(target.accrue_duration(at(2024, 6, 5, 11, 0), 500), DayOutcome::Ignored);
        assert_eq!(day_total(&target, 2024, 6, 5), 0);
    }

    #[test]
    fn disconnects_outside_the_window_are_pruned() {
        let host = Uuid::new_v4();
        let mut target = enabled_target(host, at(2024, 6, 5, 10, 0));
        target.max_disconnects_allowed = 3;
        target.disconnect_time_window = 600;

        assert!(!target.record_disconnect(at(2024, 6, 5, 9, 0), Uuid::new_v4()));
        assert!(!target.record_disconnect(at(2024, 6, 5, 9, 2), Uuid::new_v4()));
        // An hour later the first two have aged out; this is 1-of-3, not 3-of-3.
        assert!(!target.record_disconnect(at(2024, 6, 5, 10, 30), Uuid::new_v4()));
        assert_eq!(target.disconnect_log.len(), 1);
    }

    #[test]
    fn quota_completion_bumps_completed_days_exactly_once() {
        let host = Uuid::new_v4();
        let now = at(2024, 6, 5, 10, 0);
        let mut target = enabled_target(host, now);

        assert_eq!(target.accrue_duration(now, 28_000), DayOutcome::Accrued { total: 28_000 });
        assert_eq!(target.current_week.completed_days, 0);

        assert_eq!(target.accrue_duration(now, 900), DayOutcome::DayCompleted);
        assert_eq!(target.current_week.completed_days, 1);

        // Further accrual on a completed day is ignored and does not re-count.
        assert_eq!(target.accrue_duration(now, 1_000), DayOutcome::Ignored);
        assert_eq!(target.current_week.completed_days, 1);
        assert_eq!(day_total(&target, 2024, 6, 5), 28_900);
    }

    #[test]
    fn timer_start_and_stop_enforce_day_state() {
        let host = Uuid::new_v4();
        let now = at(2024, 6, 5, 8, 0);
        let mut target = enabled_target(host, now);

        assert!(matches!(target.stop_timer(now), Err(PortError::InvalidState(_))));

        let day = target.start_timer(now).unwrap();
        assert!(day.timer_active);
        assert!(matches!(target.start_timer(now), Err(PortError::InvalidState(_))));

        // Quota already met: stop settles the day.
        target.current_week.day_mut(now.date_naive()).unwrap().total_call_duration = 30_000;
        let day = target.stop_timer(at(2024, 6, 5, 18, 0)).unwrap();
        assert!(!day.timer_active);
        assert_eq!(day.status, DayStatus::Completed);
        assert_eq!(target.current_week.completed_days, 1);
    }

    #[test]
    fn admin_override_adjusts_completed_days_in_both_directions() {
        let host = Uuid::new_v4();
        let now = at(2024, 6, 5, 10, 0);
        let admin = Uuid::new_v4();
        let mut target = enabled_target(host, now);
        target.accrue_duration(now, 29_000);
        assert_eq!(target.current_week.completed_days, 1);

        // Out of completed.
        let date = now.date_naive();
        let day = target
            .override_day(date, DayStatus::Failed, Some("missed review".into()), admin)
            .unwrap();
        assert_eq!(day.status, DayStatus::Failed);
        assert_eq!(day.override_by, Some(admin));
        assert_eq!(target.current_week.completed_days, 0);

        // Into completed.
        target
            .override_day(date, DayStatus::Completed, None, admin)
            .unwrap();
        assert_eq!(target.current_week.completed_days, 1);

        assert!(matches!(
            target.override_day(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), DayStatus::Completed, None, admin),
            Err(PortError::NotFound(_))
        ));
    }

    #[test]
    fn admin_override_reaches_archived_weeks() {
        let host = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let t0 = at(2024, 6, 5, 10, 0);
        let mut target = enabled_target(host, t0);
        target.ensure_current_week(at(2024, 6, 12, 9, 0));

        let old_date = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        let day = target
            .override_day(old_date, DayStatus::AdminOverride, Some("backfill".into()), admin)
            .unwrap();
        assert_eq!(day.status, DayStatus::AdminOverride);
        assert_eq!(target.week_history[0].day(old_date).unwrap().status, DayStatus::AdminOverride);
    }

    fn day_total(target: &FreeTarget, y: i32, m: u32, d: u32) -> i64 {
        target
            .current_week
            .day(NaiveDate::from_ymd_opt(y, m, d).unwrap())
            .unwrap()
            .total_call_duration
    }

    //-------------------------------------------------------------------------------------
    // Store-backed service
    //-------------------------------------------------------------------------------------

    use crate::testutil::FakeFreeTargets;

    #[tokio::test]
    async fn record_call_applies_disconnect_rule_before_accrual() {
        let host = Uuid::new_v4();
        let store = Arc::new(FakeFreeTargets::default());
        let service = FreeTargetService::new(store.clone());
        let now = at(2024, 6, 5, 10, 0);
        service.toggle(host, true, now).await.unwrap();

        // Two prior disconnects in the window.
        for minute in [1, 3] {
            service
                .record_call(host, Uuid::new_v4(), 60, true, at(2024, 6, 5, 10, minute))
                .await
                .unwrap();
        }

        // The third disconnect fails the day; its 400s must NOT be accrued.
        let (target, outcome) = service
            .record_call(host, Uuid::new_v4(), 400, true, at(2024, 6, 5, 10, 6))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, DayOutcome::DayFailed);
        let day = target.current_week.day(now.date_naive()).unwrap();
        assert_eq!(day.status, DayStatus::Failed);
        assert_eq!(day.total_call_duration, 120);
    }

    #[tokio::test]
    async fn record_call_is_a_noop_without_an_enabled_target() {
        let host = Uuid::new_v4();
        let service = FreeTargetService::new(Arc::new(FakeFreeTargets::default()));
        let res = service
            .record_call(host, Uuid::new_v4(), 600, false, at(2024, 6, 5, 10, 0))
            .await
            .unwrap();
        assert!(res.is_none());
    }

    #[tokio::test]
    async fn reads_after_week_end_persist_the_rollover() {
        let host = Uuid::new_v4();
        let store = Arc::new(FakeFreeTargets::default());
        let service = FreeTargetService::new(store.clone());
        service.toggle(host, true, at(2024, 6, 5, 10, 0)).await.unwrap();

        let target = service.current(host, at(2024, 6, 12, 9, 0)).await.unwrap();
        assert_eq!(target.week_history.len(), 1);

        // The rollover was durably written, not just computed on the fly.
        let stored = store.get_free_target(host).await.unwrap().unwrap();
        assert_eq!(stored.week_history.len(), 1);
        assert_eq!(
            stored.current_week.start_date,
            NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
        );
    }
}
