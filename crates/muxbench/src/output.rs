use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use muxbench_harness::RunReport;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct RunOutput<'a> {
    schema_id: &'a str,
    workers: u32,
    parallel: u32,
    payload_size: usize,
    messages: u32,
    elapsed_ms: f64,
    master_cpu_pct: f64,
    worker_cpu_pct: f64,
    messages_per_sec: f64,
    anomalies: u64,
}

pub fn print_run_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = RunOutput {
                schema_id: "https://schemas.3leaps.dev/muxbench/cli/v1/run-report.schema.json",
                workers: report.workers,
                parallel: report.parallel,
                payload_size: report.payload_size,
                messages: report.message_budget,
                elapsed_ms: report.elapsed_ms,
                master_cpu_pct: report.master_cpu_pct,
                worker_cpu_pct: report.worker_cpu_pct,
                messages_per_sec: report.messages_per_sec,
                anomalies: report.anomalies,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "WORKERS",
                    "PARALLEL",
                    "PAYLOAD",
                    "ELAPSED MS",
                    "MASTER CPU %",
                    "WORKERS CPU %",
                    "MSG/S",
                    "ANOMALIES",
                ])
                .add_row(vec![
                    report.workers.to_string(),
                    report.parallel.to_string(),
                    report.payload_size.to_string(),
                    format!("{:.0}", report.elapsed_ms),
                    format!("{:.0}", report.master_cpu_pct),
                    format!("{:.0}", report.worker_cpu_pct),
                    format!("{:.0}", report.messages_per_sec),
                    report.anomalies.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "test for {} workers, parallel={}, payload_size={}",
                report.workers, report.parallel, report.payload_size
            );
            println!("time: {:.0}ms", report.elapsed_ms);
            println!("master cpu usage: {:.0}%", report.master_cpu_pct);
            println!("workers cpu usage: {:.0}%", report.worker_cpu_pct);
            println!("result: {:.0} msg/s", report.messages_per_sec);
        }
    }
}
