//! Status command for showing the stored session.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use journey_core::{SessionStore, SessionTail, Stage, SystemClock, UuidGenerator};

use crate::Config;
use crate::commands::open_store;

pub async fn run<W: Write>(writer: &mut W, config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let tail = store
        .load_last_session(&SystemClock, &UuidGenerator)
        .await
        .context("failed to load stored session")?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&tail)?)?;
        return Ok(());
    }
    render(writer, &config.database_path, tail.as_ref())
}

fn render<W: Write>(writer: &mut W, database_path: &Path, tail: Option<&SessionTail>) -> Result<()> {
    writeln!(writer, "Journey status")?;
    writeln!(writer, "Database: {}", database_path.display())?;

    let Some(tail) = tail else {
        writeln!(writer, "No session recorded.")?;
        return Ok(());
    };

    let build = if tail.is_release { "release" } else { "debug" };
    writeln!(writer, "Session: {}", tail.session_id)?;
    writeln!(writer, "App: {} {} ({build})", tail.app_id, tail.version)?;
    writeln!(writer, "Started: {}", timestamp(tail.start))?;
    writeln!(writer, "Last activity: {}", timestamp(tail.end))?;
    writeln!(writer, "Installed since: {}", timestamp(tail.since))?;
    writeln!(writer, "First launch: {}", yes_no(tail.first_launch))?;
    writeln!(
        writer,
        "Stage: {} (previous: {})",
        stage(&tail.current_stage),
        stage(&tail.previous_stage)
    )?;
    writeln!(writer, "Errors: {}", yes_no(tail.has_error))?;
    writeln!(writer, "Crashes: {}", yes_no(tail.has_crash))?;

    if tail.event_tally.is_empty() {
        writeln!(writer, "No events recorded.")?;
        return Ok(());
    }

    writeln!(writer, "Events:")?;
    for (name, count) in &tail.event_tally {
        writeln!(writer, "- {name}: {count}")?;
    }
    writeln!(writer, "Sequence: {}", tail.event_sequence.join(", "))?;
    match &tail.flushed_baseline {
        Some(baseline) => writeln!(writer, "Flushed: {} events", baseline.values().sum::<u64>())?,
        None => writeln!(writer, "Flushed: never")?,
    }

    Ok(())
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn stage(stage: &Stage) -> String {
    format!("{} {}", stage.number, stage.name)
}

const fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
