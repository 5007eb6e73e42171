//! Periodic recap batches: frequent promotion of WAITING placeholders and a
//! monthly pass over the previous month. Items fail independently.

use std::{sync::Arc, time::Duration};

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{
    error::{ServiceError, ServiceResult},
    store::{DiaryStore, RecapStore},
};

use super::recap::{
    next_month, previous_month, GenerateRecapRequest, Promotion, RecapService, RecapTarget,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// First day of a month at `hour`, strictly after `now`.
pub fn next_monthly_run(now: NaiveDateTime, hour: u32) -> Option<NaiveDateTime> {
    let at = NaiveTime::from_hms_opt(hour, 0, 0)?;
    let this_month = now.date().with_day(1)?.and_time(at);
    if this_month > now {
        return Some(this_month);
    }
    let (first_of_next, _) = next_month(now.date())?;
    Some(first_of_next.and_time(at))
}

/// Next monthly firing time, kept across loop iterations so a wakeup that
/// lands after the deadline still fires for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthlyDeadline {
    hour: u32,
    next: Option<NaiveDateTime>,
}

impl MonthlyDeadline {
    pub fn new(now: NaiveDateTime, hour: u32) -> Self {
        Self {
            hour,
            next: next_monthly_run(now, hour),
        }
    }

    pub fn next(&self) -> Option<NaiveDateTime> {
        self.next
    }

    /// Time left until the deadline; zero once it has passed.
    pub fn remaining(&self, now: NaiveDateTime) -> Option<Duration> {
        self.next.map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Returns the date the deadline fell on when it is due, and moves the
    /// deadline to the following month.
    pub fn take_due(&mut self, now: NaiveDateTime) -> Option<NaiveDate> {
        let due = self.next.filter(|next| now >= *next)?;
        self.next = next_monthly_run(now, self.hour);
        Some(due.date())
    }
}

pub struct RecapScheduler {
    service: Arc<RecapService>,
    diaries: Arc<dyn DiaryStore>,
    recaps: Arc<dyn RecapStore>,
    waiting_interval: Duration,
    monthly_hour: u32,
}

impl RecapScheduler {
    pub fn new(
        service: Arc<RecapService>,
        diaries: Arc<dyn DiaryStore>,
        recaps: Arc<dyn RecapStore>,
        waiting_interval: Duration,
        monthly_hour: u32,
    ) -> Self {
        Self {
            service,
            diaries,
            recaps,
            waiting_interval,
            monthly_hour,
        }
    }

    pub async fn promote_waiting(&self) -> ServiceResult<BatchReport> {
        let waiting = self.recaps.waiting_recaps().await?;
        let mut report = BatchReport::default();
        if waiting.is_empty() {
            return Ok(report);
        }
        info!(count = waiting.len(), "promoting waiting recaps");

        for recap in &waiting {
            report.processed += 1;
            match self.service.promote(recap).await {
                Ok(Promotion::Generated(_)) => report.succeeded += 1,
                Ok(Promotion::Skipped) => {
                    info!(recap_id = recap.id, "no diaries in period yet; leaving recap waiting");
                    report.skipped += 1;
                }
                Ok(Promotion::Superseded) => report.skipped += 1,
                Err(err) => {
                    error!(recap_id = recap.id, error = %err, "failed to promote waiting recap");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Generates recaps for every pet with diaries in the month before `today`.
    pub async fn generate_monthly(&self, today: NaiveDate) -> ServiceResult<BatchReport> {
        let (start, end) =
            previous_month(today).ok_or_else(|| ServiceError::invalid("date out of range"))?;
        let owners = self.diaries.active_pets(start, end).await?;
        let mut report = BatchReport::default();
        info!(%start, %end, pets = owners.len(), "monthly recap batch started");

        for owner in owners {
            report.processed += 1;

            let mut pet_name = None;
            if let Some(pets) = self.service.pets() {
                match pets.find_pet(owner.pet_id).await {
                    Ok(Some(profile)) => pet_name = Some(profile.pet_name),
                    Ok(None) => {
                        info!(pet_id = owner.pet_id, "pet no longer exists; skipping");
                        report.skipped += 1;
                        continue;
                    }
                    Err(err) => warn!(pet_id = owner.pet_id, error = %err, "pet lookup failed"),
                }
            }

            let request = GenerateRecapRequest {
                target: RecapTarget {
                    pet_id: owner.pet_id,
                    user_id: owner.user_id,
                    period_start: start,
                    period_end: end,
                },
                pet_name,
            };
            match self.service.generate(request).await {
                Ok(_) => report.succeeded += 1,
                Err(err) => {
                    warn!(pet_id = owner.pet_id, error = %err, "monthly recap failed; skipping");
                    report.failed += 1;
                }
            }
        }

        info!(?report, "monthly recap batch finished");
        Ok(report)
    }

    /// Runs both batches until the future is dropped.
    pub async fn run(&self) {
        info!(
            waiting_interval_secs = self.waiting_interval.as_secs(),
            monthly_hour = self.monthly_hour,
            "recap scheduler started"
        );
        let mut ticker = interval(self.waiting_interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut monthly = MonthlyDeadline::new(Local::now().naive_local(), self.monthly_hour);
        if monthly.next().is_none() {
            warn!(
                monthly_hour = self.monthly_hour,
                "invalid monthly hour; monthly batch disabled"
            );
        }

        loop {
            let until_monthly = monthly.remaining(Local::now().naive_local());

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.promote_waiting().await {
                        error!(error = %err, "waiting recap batch failed");
                    }
                }
                _ = sleep(until_monthly.unwrap_or_default()), if until_monthly.is_some() => {}
            }

            if let Some(reference) = monthly.take_due(Local::now().naive_local()) {
                if let Err(err) = self.generate_monthly(reference).await {
                    error!(error = %err, "monthly recap batch failed");
                }
            }
        }
    }
}
