//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim: runtime setup and
//! output formatting for each subcommand.

use anyhow::Result;
use rapd_panel::config::PanelConfig;
use rapd_panel::dashboard;
use rapd_panel::merge::{Container, Panel};
use rapd_panel::poller::{PollEvent, PollTarget, Poller};
use rapd_panel::protocol::CloudReport;
use std::path::Path;
use tokio::sync::watch;
use tracing::info;

pub fn run_dashboard(
    database_url: &str,
    mut config: PanelConfig,
    port: Option<u16>,
    static_dir: Option<&Path>,
) -> Result<()> {
    if let Some(p) = port {
        config.server.port = p;
    }
    let static_dir = static_dir
        .map(Path::to_path_buf)
        .or_else(|| config.server.static_dir.clone());
    let port = config.server.port;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(dashboard::run(port, database_url, config, static_dir.as_deref()))
}

pub fn run_watch(
    target: PollTarget,
    config: PanelConfig,
    json: bool,
    await_download: bool,
) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            dashboard::shutdown_signal().await;
            let _ = tx.send(true);
        });

        let mut poller = Poller::new(target, config.poller)?;
        poller.set_awaiting_download(await_download);
        poller
            .run(rx, |panel, event| {
                if json {
                    println!("{}", event_json(event));
                } else if let Some(line) = describe(panel, event) {
                    println!("{}", line);
                }
            })
            .await
    })
}

pub fn check_config(config: &PanelConfig) -> Result<()> {
    config.validate()?;
    let text = toml::to_string_pretty(config)?;
    info!("configuration is valid");
    println!("{}", text);
    Ok(())
}

fn event_json(event: &PollEvent) -> String {
    let value = match event {
        PollEvent::Results(report) => serde_json::json!({
            "event": "results",
            "changed": report.changed,
            "load_waiting": report.load_waiting,
        }),
        PollEvent::Processes { added } => serde_json::json!({ "event": "processes", "added": added }),
        PollEvent::Rankings(batch) => serde_json::json!({ "event": "rankings", "runs": batch.runs }),
        PollEvent::Cloud(report) => serde_json::json!({ "event": "cloud", "report": report }),
        PollEvent::Status(status) => serde_json::json!({ "event": "status", "status": status }),
    };
    value.to_string()
}

/// One human-readable line per event that changed something.
fn describe(panel: &Panel, event: &PollEvent) -> Option<String> {
    match event {
        PollEvent::Results(report) if report.changed > 0 => {
            let counts: Vec<String> = Container::ALL
                .iter()
                .map(|c| format!("{:?}={}", c, panel.items(*c).len()).to_lowercase())
                .collect();
            Some(format!(
                "results: {} changed, cursor {} [{}]",
                report.changed,
                panel.cursor().0,
                counts.join(" ")
            ))
        }
        PollEvent::Processes { added } if *added > 0 => {
            Some(format!("processes: {} new in-process placeholders", added))
        }
        PollEvent::Rankings(batch) => Some(format!("rankings: {} new runs", batch.runs.len())),
        PollEvent::Cloud(CloudReport::Downloads { downloads, .. }) => {
            Some(format!("cloud: {} downloads ready", downloads.len()))
        }
        PollEvent::Status(s) => Some(format!(
            "status {}: dataserver {:?} ({}s), controller {:?} ({}s), cluster {:?} ({}s)",
            s.beamline,
            s.dataserver.level,
            s.dataserver.age_secs,
            s.controller.level,
            s.controller.age_secs,
            s.cluster.level,
            s.cluster.age_secs
        )),
        _ => None,
    }
}
