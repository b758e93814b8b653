//! Reporting commands: each run starts a session and records one report.

use std::sync::Arc;

use anyhow::{Context, Result};
use journey_client::IngestClient;
use journey_core::{Journey, StageNumber};

use crate::Config;
use crate::commands::open_store;

/// What to report once the session has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Only start the session.
    Start,
    Event { name: String, collapsible: bool },
    Error { name: String },
    Crash { name: String },
    Stage { stage: StageNumber, name: Option<String> },
    Flush,
}

pub async fn run(config: &Config, report: &Report) -> Result<()> {
    let store = open_store(config)?;
    let client = IngestClient::new(&config.ingest_url, config.request_timeout())
        .context("failed to create ingest client")?;
    let journey = Journey::new(Arc::new(store), Arc::new(client));
    run_with(&journey, config, report).await
}

/// Initializes `journey` from `config`, then records `report`.
pub async fn run_with(journey: &Journey, config: &Config, report: &Report) -> Result<()> {
    journey
        .initialize(
            &config.account_id,
            &config.app_id,
            &config.version,
            config.is_release,
        )
        .await
        .context("failed to initialize journey")?;

    match report {
        Report::Start => {}
        Report::Event { name, collapsible } => journey
            .report_event(name, *collapsible)
            .await
            .context("failed to report event")?,
        Report::Error { name } => journey
            .report_error(name)
            .await
            .context("failed to report error")?,
        Report::Crash { name } => journey
            .report_crash(name)
            .await
            .context("failed to report crash")?,
        Report::Stage { stage, name } => {
            let name = name.clone().unwrap_or_else(|| format!("stage{stage}"));
            journey
                .report_stage_transition(i64::from(stage.get()), &name)
                .await
                .context("failed to report stage transition")?;
        }
        Report::Flush => journey.flush_events().await,
    }
    Ok(())
}
