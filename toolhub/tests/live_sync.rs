//! End-to-end synchronization against the live sources.
//!
//! Ignored by default: it needs network access to the public registry and
//! citation services, and optionally a code-host token from the environment.

use std::io::ErrorKind;

use dotenvy::dotenv;
use tempfile::tempdir;
use toolhub::{HubConfig, ToolHub};
use toolstore::store::RecordStore;
use toolstore::sync::SyncOutcome;

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires network access to the live registry and citation sources"]
async fn one_tool_synchronizes_end_to_end() -> anyhow::Result<()> {
    if let Err(err) = dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == ErrorKind::NotFound) {
            anyhow::bail!("failed to load .env file: {err}");
        }
    }

    let dir = tempdir()?;
    let mut config = HubConfig::new(dir.path());
    config.github_token = std::env::var("GITHUB_TOKEN").ok();
    let hub = ToolHub::new(config)?;

    let outcome = hub.synchronizer.sync_tool("signalp").await?;
    assert_eq!(outcome, SyncOutcome::Created);

    let tool = hub
        .store
        .get_tool("signalp")?
        .expect("tool should exist after synchronization");
    assert!(!tool.name.is_empty());
    assert!(tool.last_synced.is_some());

    // Immediately re-running is a same-day no-op.
    let second = hub.synchronizer.sync_tool("signalp").await?;
    assert_eq!(second, SyncOutcome::SkippedFresh);

    Ok(())
}
