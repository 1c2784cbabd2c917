//! Periodic maintenance on the core task.
//!
//! Each [`Task`] has its own period. [`Scheduler::tick`] sleeps until the
//! earliest one is due and returns it; the server loop then calls
//! [`run_task`] with the router. A task that returns an error is fatal.

use crate::clock::Clock;
use crate::config::NetworkConfig;
use crate::endpoint::Outbox;
use crate::error::DmrlinkError;
use crate::report::{ReportHub, BRIDGE_SND, CONFIG_SND};
use crate::router::Router;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Call-state sweep.
pub const STREAM_TRIM: Duration = Duration::from_secs(5);
/// Bridge timer rules.
pub const RULE_TIMER: Duration = Duration::from_secs(52);
/// Unused OpenBridge-created bridges.
pub const STAT_TRIM: Duration = Duration::from_secs(60);
/// Repeater options.
pub const OPTIONS: Duration = Duration::from_secs(26);
/// OpenBridge `BCKA`.
pub const OBP_KEEPALIVE: Duration = Duration::from_secs(10);
/// OpenBridge `BCVE`.
pub const VERSION_ANNOUNCE: Duration = Duration::from_secs(60);
/// Voice ident.
pub const IDENT: Duration = Duration::from_secs(914);
/// Subscriber map trim and save.
pub const SUBSCRIBERS: Duration = Duration::from_secs(3600);

/// One kind of periodic work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Keepalives and timeouts of every system.
    Maintain,
    /// Stream timeouts.
    StreamTrim,
    /// Bridge activation timers.
    RuleTimer,
    /// STAT bridge cleanup.
    StatTrim,
    /// Applies repeater options.
    Options,
    /// OpenBridge keepalive.
    ObpKeepalive,
    /// OpenBridge version announcement.
    VersionAnnounce,
    /// Voice ident.
    Ident,
    /// Subscriber map trim and save.
    Subscribers,
    /// Snapshot push to report clients.
    Reports,
}

impl Task {
    /// Name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Maintain => "maintenance",
            Self::StreamTrim => "stream trimmer",
            Self::RuleTimer => "rule timer",
            Self::StatTrim => "stat trimmer",
            Self::Options => "options",
            Self::ObpKeepalive => "openbridge keepalive",
            Self::VersionAnnounce => "version announce",
            Self::Ident => "voice ident",
            Self::Subscribers => "subscriber map",
            Self::Reports => "reports",
        }
    }
}

#[derive(Debug)]
struct Entry {
    task: Task,
    period: Duration,
    next: Instant,
}

/// The periodic timers.
#[derive(Debug)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    /// Timers for `cfg`; the first run of each task is one period away.
    #[must_use]
    pub fn new(cfg: &NetworkConfig) -> Self {
        let mut periods = vec![
            (Task::Maintain, Duration::from_secs(cfg.global.ping_time.max(1))),
            (Task::StreamTrim, STREAM_TRIM),
            (Task::RuleTimer, RULE_TIMER),
            (Task::StatTrim, STAT_TRIM),
            (Task::Options, OPTIONS),
            (Task::ObpKeepalive, OBP_KEEPALIVE),
            (Task::VersionAnnounce, VERSION_ANNOUNCE),
            (Task::Ident, IDENT),
            (Task::Subscribers, SUBSCRIBERS),
        ];
        if cfg.reports.enabled {
            periods.push((Task::Reports, Duration::from_secs(cfg.reports.interval.max(1))));
        }
        Self::with_periods(&periods)
    }

    /// Timers with explicit periods.
    #[must_use]
    pub fn with_periods(periods: &[(Task, Duration)]) -> Self {
        let now = Instant::now();
        let entries = periods
            .iter()
            .map(|&(task, period)| Entry {
                task,
                period,
                next: now + period,
            })
            .collect();
        Self { entries }
    }

    /// Period of `task`, if scheduled.
    #[must_use]
    pub fn period(&self, task: Task) -> Option<Duration> {
        self.entries.iter().find(|e| e.task == task).map(|e| e.period)
    }

    /// Waits for the next due task. Cancel safe: nothing changes until the
    /// sleep completes. A task that fell behind runs once, not once per
    /// missed period.
    pub async fn tick(&mut self) -> Task {
        let Some(idx) = (0..self.entries.len()).min_by_key(|&i| self.entries[i].next) else {
            return std::future::pending().await;
        };
        tokio::time::sleep_until(self.entries[idx].next).await;
        let now = Instant::now();
        let entry = &mut self.entries[idx];
        entry.next += entry.period;
        if entry.next <= now {
            entry.next = now + entry.period;
        }
        entry.task
    }
}

/// What tasks need beyond the router.
#[derive(Debug, Clone)]
pub struct TaskEnv {
    /// Subscriber map file.
    pub sub_map: Option<PathBuf>,
    /// Report feed.
    pub reports: ReportHub,
}

/// Runs `task` against the router.
///
/// # Errors
///
/// Returns [`DmrlinkError::Fatal`] naming the task when it fails; the
/// relay stops.
pub fn run_task(
    task: Task,
    router: &mut Router,
    env: &TaskEnv,
    clock: Clock,
    out: &mut Outbox,
) -> Result<(), DmrlinkError> {
    let fatal = |e: DmrlinkError| DmrlinkError::Fatal {
        task: task.name(),
        reason: e.to_string(),
    };
    match task {
        Task::Maintain => router.maintain(clock, out),
        Task::StreamTrim => router.trim_streams(clock, out),
        Task::RuleTimer => {
            debug!("(ROUTER) rule timer loop starting");
            router.rule_timer(clock, out);
        }
        Task::StatTrim => router.stat_trim(out),
        Task::Options => router.apply_options(clock, out),
        Task::ObpKeepalive => router.obp_keepalive(clock, out),
        Task::VersionAnnounce => router.announce_versions(clock, out),
        Task::Ident => router.ident(clock, out),
        Task::Subscribers => {
            let trimmed = router.trim_subscribers(clock);
            info!("(ROUTER) subscriber map trimmed, {} removed, {} kept", trimmed, router.subscribers().len());
            if let Some(path) = &env.sub_map {
                router.save_subscribers(path).map_err(fatal)?;
            }
        }
        Task::Reports => {
            push_config(router, &env.reports, CONFIG_SND).map_err(fatal)?;
            push_bridges(router, &env.reports, clock, BRIDGE_SND).map_err(fatal)?;
        }
    }
    Ok(())
}

/// Pushes the configuration snapshot with `opcode`.
///
/// # Errors
///
/// Returns an error if the snapshot does not serialize.
pub fn push_config(router: &Router, hub: &ReportHub, opcode: u8) -> Result<(), DmrlinkError> {
    let json = serde_json::to_vec(&router.config_snapshot())?;
    hub.push_config(json, opcode);
    Ok(())
}

/// Pushes the bridge snapshot with `opcode`.
///
/// # Errors
///
/// Returns an error if the snapshot does not serialize.
pub fn push_bridges(router: &Router, hub: &ReportHub, clock: Clock, opcode: u8) -> Result<(), DmrlinkError> {
    let json = serde_json::to_vec(&router.bridge_snapshot(clock.mono))?;
    hub.push_bridges(json, opcode);
    Ok(())
}
