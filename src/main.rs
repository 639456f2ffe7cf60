//! Governance Action Sequencer - template runner
//!
//! Registers a process template from a JSON file and starts one run of it:
//!
//! ```text
//! governance-sequencer <template.json> [user-id]
//! ```
//!
//! Runs against Postgres when built with the `postgres` feature and
//! `DATABASE_URL` is set, otherwise against an in-memory repository.

use anyhow::Context;
use governance_sequencer::audit::TracingAuditLog;
use governance_sequencer::config::Settings;
use governance_sequencer::repository::{InMemoryRepository, MetadataRepository};
use governance_sequencer::telemetry::init_tracing;
use governance_sequencer::{GovernanceActionSequencer, InitiateProcessRequest, Originator, ProcessTemplate};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_tracing(&settings.logging)?;

    info!("🚀 Starting governance action sequencer...");

    let mut args = std::env::args().skip(1);
    let template_path = args
        .next()
        .context("usage: governance-sequencer <template.json> [user-id]")?;
    let user_id = args.next().unwrap_or_else(|| "governance-sequencer".to_string());

    let raw = std::fs::read_to_string(&template_path)
        .with_context(|| format!("Failed to read template {}", template_path))?;
    let template: ProcessTemplate =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse template {}", template_path))?;

    let repository = init_repository(&settings).await?;
    let sequencer = GovernanceActionSequencer::new(repository, Arc::new(TracingAuditLog), settings.sequencer.clone());

    let registered = sequencer.register_process_template(&user_id, &template).await?;
    info!(
        "📋 Registered '{}' as {}",
        template.qualified_name, registered.process_guid
    );

    let mut request = InitiateProcessRequest::new(template.qualified_name.clone());
    request.originator = Originator {
        service_name: Some(env!("CARGO_PKG_NAME").to_string()),
        engine_name: None,
    };
    let first = sequencer.initiate_process(&user_id, request).await?;

    let run = sequencer.get_run_actions(&user_id, first).await?;
    let summary: Vec<_> = run
        .iter()
        .map(|a| {
            serde_json::json!({
                "guid": a.guid,
                "qualifiedName": a.qualified_name,
                "status": a.status,
                "governanceEngineName": a.governance_engine_name,
                "startTime": a.start_time,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("✅ Run {} started with {} governance action(s)", first, run.len());
    Ok(())
}

#[cfg(feature = "postgres")]
async fn init_repository(settings: &Settings) -> anyhow::Result<Arc<dyn MetadataRepository>> {
    use governance_sequencer::repository::PostgresRepository;

    match &settings.database {
        Some(database) => {
            let repository = PostgresRepository::connect(database).await?;
            repository.create_tables().await?;
            info!("✅ Using Postgres repository at {}:{}", database.host, database.port);
            Ok(Arc::new(repository))
        }
        None => {
            warn!("⚠️  DATABASE_URL not set, using in-memory repository");
            Ok(Arc::new(InMemoryRepository::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn init_repository(settings: &Settings) -> anyhow::Result<Arc<dyn MetadataRepository>> {
    if settings.database.is_some() {
        warn!("⚠️  DATABASE_URL is set but the postgres feature is disabled, using in-memory repository");
    }
    Ok(Arc::new(InMemoryRepository::new()))
}
