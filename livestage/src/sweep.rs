//! Lifecycle sweep: move due events along `scheduled -> live -> finished`.

use crate::{
    db::{self, from_ts, to_ts, DbPool},
    error::Result,
    events,
};
use rusqlite::Connection;
use serde::Serialize;
use stagecore::{EventStatus, Lifecycle, Transition};
use time::OffsetDateTime;
use tokio::{
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub transitioned: usize,
    /// Records another writer changed between our read and our write.
    pub skipped: usize,
    pub failed: usize,
}

struct Candidate {
    id: String,
    title: String,
    status: String,
    scheduled_at: i64,
    version: i64,
}

enum Outcome {
    Moved(Transition),
    Unchanged,
    LostRace,
}

/// One pass over every scheduled or live event whose start time has come.
///
/// Each transition is a compare-and-set on the status and version that were
/// read, so concurrent passes or a creator's edit in between never produce a
/// second transition or overwrite the edit. Per-record failures are logged and the pass continues.
pub fn run_sweep(
    conn: &Connection,
    lifecycle: &Lifecycle,
    now: OffsetDateTime,
) -> Result<SweepReport> {
    let mut stmt = conn.prepare(
        "SELECT id, title, status, scheduled_at, version FROM events \
         WHERE status IN ('scheduled', 'live') AND scheduled_at <= ?1 ORDER BY scheduled_at",
    )?;
    let rows: Vec<rusqlite::Result<Candidate>> = stmt
        .query_map([to_ts(now)], |row| {
            Ok(Candidate {
                id: row.get(0)?,
                title: row.get(1)?,
                status: row.get(2)?,
                scheduled_at: row.get(3)?,
                version: row.get(4)?,
            })
        })?
        .collect();

    let mut report = SweepReport::default();
    for row in rows {
        report.examined += 1;
        let candidate = match row {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "skipping unreadable event row");
                report.failed += 1;
                continue;
            }
        };
        match apply(conn, lifecycle, &candidate, now) {
            Ok(Outcome::Moved(t)) => {
                report.transitioned += 1;
                info!(
                    event = %candidate.id,
                    title = %candidate.title,
                    from = %t.from,
                    to = %t.to,
                    via_live = t.skips_live(),
                    "event {}",
                    match t.to {
                        EventStatus::Live => "is now live",
                        _ if t.skips_live() => "went live and finished",
                        _ => "finished",
                    }
                );
            }
            Ok(Outcome::Unchanged) => {}
            Ok(Outcome::LostRace) => {
                report.skipped += 1;
                debug!(event = %candidate.id, "event changed concurrently, leaving it for the next pass");
            }
            Err(e) => {
                report.failed += 1;
                error!(event = %candidate.id, error = %e, "failed to update event status");
            }
        }
    }
    info!(
        examined = report.examined,
        transitioned = report.transitioned,
        skipped = report.skipped,
        failed = report.failed,
        "lifecycle sweep complete"
    );
    Ok(report)
}

fn apply(
    conn: &Connection,
    lifecycle: &Lifecycle,
    candidate: &Candidate,
    now: OffsetDateTime,
) -> Result<Outcome> {
    let id: Uuid = db::parse_uuid(&candidate.id)?;
    let scheduled_date = from_ts(candidate.scheduled_at)?;
    let Some(t) = lifecycle.evaluate_raw(&candidate.status, scheduled_date, now) else {
        return Ok(Outcome::Unchanged);
    };
    if events::transition_status(conn, &id, t.from, t.to, candidate.version, now)? {
        Ok(Outcome::Moved(t))
    } else {
        Ok(Outcome::LostRace)
    }
}

/// Run a sweep on a pooled connection with the current time.
pub fn sweep_now(pool: &DbPool, lifecycle: &Lifecycle) -> Result<SweepReport> {
    let conn = pool.get()?;
    run_sweep(&conn, lifecycle, OffsetDateTime::now_utc())
}

/// Repeat the sweep every `every` until the task is aborted.
pub fn spawn_sweeper(pool: DbPool, lifecycle: Lifecycle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(e) = sweep_now(&pool, &lifecycle) {
                error!(error = %e, "lifecycle sweep failed");
            }
        }
    })
}
