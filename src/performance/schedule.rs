use std::sync::Arc;

use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, Weekday};
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::wallet::fetch_wallet_summary;
use super::PerformanceTracker;
use crate::api::Exchange;
use crate::config::ConfigStore;
use crate::execution::RetryPolicy;
use crate::notify::Notifier;

const CHECK_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    DailyReport,
    WeeklyReport,
    WalletSummary,
}

#[derive(Debug, Clone, Copy)]
enum Cadence {
    Daily(NaiveTime),
    Weekly(Weekday, NaiveTime),
}

impl Cadence {
    /// First firing strictly after `after`
    fn next_after(&self, after: NaiveDateTime) -> NaiveDateTime {
        match *self {
            Cadence::Daily(at) => {
                let today = after.date().and_time(at);
                if today > after {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
            Cadence::Weekly(weekday, at) => {
                let days_ahead = (weekday.num_days_from_monday() as i64
                    - after.weekday().num_days_from_monday() as i64)
                    .rem_euclid(7);
                let candidate = after.date().and_time(at) + ChronoDuration::days(days_ahead);
                if candidate > after {
                    candidate
                } else {
                    candidate + ChronoDuration::days(7)
                }
            }
        }
    }
}

/// Wall-clock job table: daily report 18:00, weekly report Monday 10:00,
/// wallet summary 08:00 and 22:00 (local time)
#[derive(Debug, Clone)]
pub struct Timetable {
    entries: Vec<(Job, Cadence, NaiveDateTime)>,
}

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

impl Timetable {
    pub fn new(now: NaiveDateTime) -> Self {
        let cadences = [
            (Job::DailyReport, Cadence::Daily(at(18, 0))),
            (Job::WeeklyReport, Cadence::Weekly(Weekday::Mon, at(10, 0))),
            (Job::WalletSummary, Cadence::Daily(at(8, 0))),
            (Job::WalletSummary, Cadence::Daily(at(22, 0))),
        ];
        Self {
            entries: cadences
                .into_iter()
                .map(|(job, cadence)| (job, cadence, cadence.next_after(now)))
                .collect(),
        }
    }

    /// Jobs whose time has come; each fires once and is rescheduled
    pub fn due(&mut self, now: NaiveDateTime) -> Vec<Job> {
        let mut jobs = Vec::new();
        for (job, cadence, next) in &mut self.entries {
            if *next <= now {
                jobs.push(*job);
                *next = cadence.next_after(now);
            }
        }
        jobs
    }
}

/// Fires the periodic reports and sends them through the notifier
pub struct ReportScheduler {
    pub performance: Arc<PerformanceTracker>,
    pub notifier: Arc<dyn Notifier>,
    pub exchange: Arc<dyn Exchange>,
    pub config: Arc<ConfigStore>,
    pub retry: RetryPolicy,
}

impl ReportScheduler {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut timetable = Timetable::new(Local::now().naive_local());
        let mut ticker = interval(Duration::from_secs(CHECK_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("⏰ Report scheduler started (daily 18:00, weekly Mon 10:00, wallet 08:00/22:00)");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for job in timetable.due(Local::now().naive_local()) {
                        self.fire(job).await;
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Report scheduler stopping");
                    break;
                }
            }
        }
    }

    pub async fn fire(&self, job: Job) {
        let message = match job {
            Job::DailyReport => self.performance.daily_report(),
            Job::WeeklyReport => self.performance.weekly_report(),
            Job::WalletSummary => {
                let symbols = self.config.symbols();
                Ok(fetch_wallet_summary(self.exchange.as_ref(), &symbols, &self.retry).await)
            }
        };

        match message {
            Ok(message) => self.notifier.send(&message).await,
            Err(e) => tracing::error!("{:?} failed: {}", job, e),
        }
    }
}
