//! Renderers for finished tasks.

use anyhow::anyhow;
use ferry_core::TaskSnapshot;
use ferry_telemetry::Metrics;

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};

pub(crate) fn render_task(task: &TaskSnapshot, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(task)
                .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
            println!("{text}");
        }
        OutputFormat::Summary => print!("{}", summary(task)),
    }
    Ok(())
}

/// Prometheus text exposition of the agent's counters.
pub(crate) fn metrics_dump(metrics: &Metrics) -> CliResult<String> {
    metrics
        .render()
        .map_err(|err| CliError::failure(anyhow!("failed to render metrics: {err}")))
}

fn summary(task: &TaskSnapshot) -> String {
    let mut out = format!("task {} ({})\n", task.id, task.kind.as_str());
    out.push_str(&format!("command: {}\n", task.cmd.join(" ")));
    out.push_str(&format!("exit: {}\n", exit_label(task.exit_code)));
    out.push_str(&format!("progress: {:.1}%\n", f64::from(task.progress) / 10.0));
    for file in &task.manifest {
        out.push_str(&format!(
            "file: {}/{} ({} bytes)\n",
            file.root, file.key, file.length
        ));
    }
    if !task.stdout.is_empty() {
        out.push_str("--- stdout\n");
        out.push_str(&task.stdout);
        if !task.stdout.ends_with('\n') {
            out.push('\n');
        }
    }
    if !task.stderr.is_empty() {
        out.push_str("--- stderr\n");
        out.push_str(&task.stderr);
        if !task.stderr.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

fn exit_label(exit_code: Option<i32>) -> String {
    exit_code.map_or_else(|| "none".to_string(), |code| code.to_string())
}
