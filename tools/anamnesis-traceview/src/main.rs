// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! anamnesis-traceview - Inspect anamnesis-trace output directories
//!
//! Reads every `trace_thread_NNN.bin` file in a directory and reports the
//! alloc reuse distribution and event mix recorded by the `trace` feature.

use anamnesis_trace::{analyze_file, EntropyReport};
use clap::Parser;
use colored::*;
use std::path::{Path, PathBuf};

/// Inspect anamnesis-trace output directories
#[derive(Parser, Debug)]
#[command(name = "anamnesis-traceview")]
#[command(version)]
#[command(about = "Inspect anamnesis-trace output directories")]
struct Args {
    /// Directory containing trace_thread_NNN.bin files
    dir: PathBuf,

    /// Output format: pretty, json
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Show only aggregate summary statistics
    #[arg(short, long)]
    summary: bool,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(OutputFormat::Pretty),
            "json" | "j" => Ok(OutputFormat::Json),
            _ => Err(format!("unknown format: {s}")),
        }
    }
}

struct FileReport {
    name: String,
    report: EntropyReport,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        eprintln!("{}: {err}", "error".red().bold());
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if !args.dir.is_dir() {
        return Err(format!("{} is not a directory", args.dir.display()).into());
    }

    let files = scan_trace_files(&args.dir)?;

    match args.format {
        OutputFormat::Pretty => print_pretty(&files, args.summary),
        OutputFormat::Json => print_json(&files),
    }

    Ok(())
}

fn scan_trace_files(dir: &Path) -> Result<Vec<FileReport>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("trace_thread_") || !name.ends_with(".bin") {
            continue;
        }

        match analyze_file(entry.path()) {
            Ok(report) => files.push(FileReport {
                name: name.to_string(),
                report,
            }),
            Err(err) => {
                log::warn!("anamnesis-traceview: failed to read {name}: {err}");
            }
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn aggregate(files: &[FileReport]) -> EntropyReport {
    let mut total = EntropyReport::default();
    let mut distinct_slots = std::collections::HashSet::new();
    for f in files {
        total.alloc_count += f.report.alloc_count;
        total.release_count += f.report.release_count;
        total.get_valid_count += f.report.get_valid_count;
        total.get_stale_count += f.report.get_stale_count;
        total.immediate_reuse_count += f.report.immediate_reuse_count;
        distinct_slots.insert(f.report.distinct_slots_allocated);
    }
    total.distinct_slots_allocated = files.iter().map(|f| f.report.distinct_slots_allocated).max().unwrap_or(0);
    total
}

fn print_pretty(files: &[FileReport], summary_only: bool) {
    if files.is_empty() {
        println!("{}", "no trace files found".yellow());
        return;
    }

    if !summary_only {
        println!();
        println!("{}", "=== anamnesis trace files ===".bold());
        println!();

        for f in files {
            let reuse_pct = if f.report.alloc_count > 0 {
                (f.report.immediate_reuse_count as f64 / f.report.alloc_count as f64) * 100.0
            } else {
                0.0
            };
            println!(
                "  {} alloc={} release={} get_valid={} get_stale={} distinct_slots={} immediate_reuse={:.1}%",
                f.name.cyan(),
                f.report.alloc_count,
                f.report.release_count,
                f.report.get_valid_count,
                f.report.get_stale_count.to_string().yellow(),
                f.report.distinct_slots_allocated,
                reuse_pct,
            );
        }
        println!();
    }

    let total = aggregate(files);
    println!("{}", "--- summary ---".dimmed());
    println!(
        "  files={} alloc={} release={} get_valid={} get_stale={} max_distinct_slots={}",
        files.len(),
        total.alloc_count,
        total.release_count,
        total.get_valid_count,
        total.get_stale_count,
        total.distinct_slots_allocated,
    );
}

fn print_json(files: &[FileReport]) {
    print!("{{\"files\":[");
    for (i, f) in files.iter().enumerate() {
        if i > 0 {
            print!(",");
        }
        print!(
            "{{\"name\":\"{}\",\"alloc\":{},\"release\":{},\"get_valid\":{},\"get_stale\":{},\"distinct_slots\":{},\"immediate_reuse\":{}}}",
            f.name,
            f.report.alloc_count,
            f.report.release_count,
            f.report.get_valid_count,
            f.report.get_stale_count,
            f.report.distinct_slots_allocated,
            f.report.immediate_reuse_count,
        );
    }
    println!("]}}");
}
