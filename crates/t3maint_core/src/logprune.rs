use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct LogPruneOptions {
    pub days: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogPruneReport {
    pub cutoff_unix: u64,
    pub matched_rows: usize,
    pub deleted_rows: usize,
    pub dry_run: bool,
}

/// Deletes audit-log rows strictly older than the cutoff.
pub fn prune_log(connection: &Connection, options: &LogPruneOptions) -> Result<LogPruneReport> {
    if options.days == 0 {
        bail!("log prune requires a retention of at least one day");
    }
    let cutoff_unix = unix_timestamp()?.saturating_sub(options.days * 86_400);
    prune_log_before(connection, cutoff_unix, options.dry_run)
}

pub fn prune_log_before(
    connection: &Connection,
    cutoff_unix: u64,
    dry_run: bool,
) -> Result<LogPruneReport> {
    let cutoff = i64::try_from(cutoff_unix).context("cutoff does not fit into i64")?;
    let matched: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM sys_log WHERE tstamp < ?1",
            [cutoff],
            |row| row.get(0),
        )
        .context("failed to count prunable log rows")?;
    let matched_rows = usize::try_from(matched).context("count does not fit into usize")?;

    if dry_run {
        return Ok(LogPruneReport {
            cutoff_unix,
            matched_rows,
            deleted_rows: 0,
            dry_run: true,
        });
    }

    let deleted_rows = connection
        .execute("DELETE FROM sys_log WHERE tstamp < ?1", [cutoff])
        .context("failed to delete log rows")?;

    Ok(LogPruneReport {
        cutoff_unix,
        matched_rows,
        deleted_rows,
        dry_run: false,
    })
}

fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")
        .map(|duration| duration.as_secs())
}
