//! CLI command implementations

use crate::output::print_output;
use crate::progress::RunProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, Result};
use console::style;
use serde::Serialize;
use shareget_core::ShareCore;
use shareget_types::{RunEvent, RunStatus};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

// ============================================================================
// Pull
// ============================================================================

/// Final summary of a pull
#[derive(Serialize)]
struct PullSummary {
    status: RunStatus,
    directory: PathBuf,
    received: u32,
    expected: Option<u32>,
    abandoned: u32,
    failed: u32,
}

impl fmt::Display for PullSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected = self
            .expected
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        writeln!(f, "  Status: {:?}", self.status)?;
        writeln!(f, "  Files: {}/{}", self.received, expected)?;
        if self.abandoned + self.failed > 0 {
            writeln!(
                f,
                "  Lost: {} abandoned, {} failed",
                self.abandoned, self.failed
            )?;
        }
        write!(f, "  Saved to: {}", self.directory.display())
    }
}

pub async fn pull(
    core: &ShareCore,
    endpoints: Vec<String>,
    dir: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let mut rx = core.subscribe();

    let run_id = match core.start_run(dir, &endpoints).await {
        Ok(id) => id,
        Err(e) if e.is_configuration() => {
            return Err(anyhow!(
                "{}. Pass --endpoint or add endpoints to {}",
                e,
                core.storage.settings_path().display()
            ));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::debug!("Run {} started", run_id);

    let mut progress = match format {
        OutputFormat::Json => None,
        OutputFormat::Human | OutputFormat::Table => Some(RunProgress::new()),
    };

    loop {
        let event = tokio::select! {
            received = rx.recv() => received,
            _ = tokio::signal::ctrl_c() => {
                core.cancel_run();
                continue;
            }
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Skipped {} progress events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match progress.as_mut() {
            Some(progress) => progress.handle_event(&event),
            None => println!("{}", serde_json::to_string(&event)?),
        }

        if event.is_terminal() && is_for_run(&event, run_id) {
            break;
        }
    }

    let snapshot = core
        .snapshot()
        .ok_or_else(|| anyhow!("run state disappeared"))?;
    let summary = PullSummary {
        status: snapshot.status,
        directory: snapshot.directory,
        received: snapshot.received,
        expected: snapshot.expected,
        abandoned: snapshot.abandoned,
        failed: snapshot.failed,
    };
    print_output(&summary, format)?;

    if summary.status == RunStatus::Completed {
        Ok(())
    } else {
        Err(anyhow!("run ended {:?}", summary.status))
    }
}

fn is_for_run(event: &RunEvent, run_id: Uuid) -> bool {
    match event {
        RunEvent::Completed { run_id: id, .. }
        | RunEvent::Incomplete { run_id: id, .. }
        | RunEvent::TimedOut { run_id: id }
        | RunEvent::Cancelled { run_id: id } => *id == run_id,
        _ => false,
    }
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    core: &ShareCore,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Path => {
            println!("{}", core.storage.settings_path().display());
        }

        ConfigAction::Show => {
            let settings = core.get_settings().await;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                OutputFormat::Table => {
                    use tabled::{Table, Tabled};

                    #[derive(Tabled)]
                    struct SettingRow {
                        key: &'static str,
                        value: String,
                    }

                    let mut rows = vec![
                        SettingRow {
                            key: "download_path",
                            value: settings.default_download_path.display().to_string(),
                        },
                        SettingRow {
                            key: "idle_abort_secs",
                            value: settings.idle_abort_secs.to_string(),
                        },
                        SettingRow {
                            key: "tick_interval_ms",
                            value: settings.tick_interval_ms.to_string(),
                        },
                        SettingRow {
                            key: "max_retries",
                            value: settings.max_retries.to_string(),
                        },
                        SettingRow {
                            key: "max_files",
                            value: settings.max_files.to_string(),
                        },
                    ];
                    rows.extend(settings.endpoints.iter().map(|e| SettingRow {
                        key: "endpoint",
                        value: e.clone(),
                    }));

                    println!("{}", Table::new(rows));
                }
                OutputFormat::Human => {
                    println!("{}", style("Settings").bold());
                    println!("  Download path: {}", settings.default_download_path.display());
                    println!("  Idle abort: {}s", settings.idle_abort_secs);
                    println!("  Retries per file: {}", settings.max_retries);
                    println!("  Largest share: {} files", settings.max_files);
                    if settings.endpoints.is_empty() {
                        println!("  Endpoints: {}", style("none configured").yellow());
                    } else {
                        println!("  Endpoints:");
                        for endpoint in &settings.endpoints {
                            println!("    {}", endpoint);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
