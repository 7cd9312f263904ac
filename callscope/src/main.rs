//! # callscope - Main Entry Point
//!
//! - **demo**: run the scripted workload on the virtual host, stream deltas
//!   to a replica thread and check it reconstructs the same snapshot
//! - **diff** / **apply**: delta tooling for snapshot files
//! - **facts**: decoding tables for record fact masks

use anyhow::{anyhow, Context, Result};
use callscope::aggregator::Aggregator;
use callscope::cli::{Args, Command, DemoArgs};
use callscope::config::MonitorConfig;
use callscope::demo::{DemoWorkload, APP_ORIGIN};
use callscope::domain::ConfigError;
use callscope::export::SnapshotExporter;
use callscope::host::VirtualHost;
use callscope_common::facts::tables::{all_tables, animation, eval, idle, scheduler, timer, worker};
use callscope_common::facts::{get_tags, FactTable};
use callscope_common::{CodecError, Delta, DeltaCodec, DeltaDecoder, FactMask, Snapshot};
use clap::Parser;
use crossbeam_channel::bounded;
use log::info;
use serde_json::Value;
use std::path::Path;
use std::rc::Rc;
use std::thread;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Deltas in flight to the replica before the producer blocks.
const REPLICA_QUEUE: usize = 16;

/// Rows shown per collection in the demo summary.
const SUMMARY_ROWS: usize = 5;

fn main() {
    env_logger::init();
    let args = Args::parse();
    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Demo(demo) => run_demo(&demo),
        Command::Diff { prev, next } => {
            let codec = DeltaCodec::default();
            let delta = codec.diff(&read_snapshot(&prev)?, &read_snapshot(&next)?);
            println!("{}", serde_json::to_string_pretty(&delta)?);
            Ok(())
        }
        Command::Apply { prev, delta } => {
            let text = std::fs::read_to_string(&delta)
                .with_context(|| format!("Failed to read {}", delta.display()))?;
            let delta: Delta = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a delta", delta.display()))?;
            let next = DeltaCodec::default().apply(&read_snapshot(&prev)?, &delta)?;
            let snapshot: Snapshot =
                serde_json::from_value(next).context("Delta does not produce a snapshot")?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Facts => {
            print_fact_tables();
            Ok(())
        }
    }
}

/// Read a snapshot file, validating its shape.
fn read_snapshot(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a snapshot", path.display()))?;
    Ok(serde_json::to_value(snapshot)?)
}

fn run_demo(args: &DemoArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    if config.origin.is_none() {
        config.origin = Some(APP_ORIGIN.to_owned());
    }

    let host = Rc::new(VirtualHost::new());
    let aggregator = Aggregator::new(Rc::clone(&host), config);
    aggregator.install();
    let mut workload = DemoWorkload::new(host, aggregator.globals());

    let (tx, rx) = bounded::<Delta>(REPLICA_QUEUE);
    let replica = thread::Builder::new()
        .name("replica".to_owned())
        .spawn(move || -> Result<Option<Snapshot>, CodecError> {
            let mut decoder = DeltaDecoder::default();
            let mut latest = None;
            for delta in rx {
                latest = Some(decoder.apply(&delta)?);
            }
            Ok(latest)
        })
        .context("Failed to start replica thread")?;

    let mut exporter = SnapshotExporter::default();
    for round in 0..args.rounds {
        workload.run_round(round).with_context(|| format!("Workload round {round} failed"))?;
        if let Some(delta) = exporter.record(aggregator.snapshot())? {
            tx.send(delta).context("Replica stopped receiving")?;
        }
    }
    drop(tx);

    let replica = replica
        .join()
        .map_err(|_| anyhow!("Replica thread panicked"))?
        .context("Replica could not apply a delta")?;
    let Some(snapshot) = exporter.latest() else {
        return Err(anyhow!("No snapshot was taken"));
    };
    if replica.as_ref() != Some(snapshot) {
        return Err(anyhow!("Replica diverged from the producer snapshot"));
    }
    info!("replica matches after {} deltas", exporter.delta_count());

    if let Some(path) = &args.export {
        exporter.export_to_file(path)?;
        info!("exported session to {}", path.display());
    }

    if args.headless {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    } else {
        print_summary(snapshot, exporter.delta_count(), aggregator.tracer().cached_traces());
    }
    Ok(())
}

/// Decoding table for a snapshot collection.
fn facts_for(collection: &str) -> Option<FactTable> {
    match collection {
        "setTimeout" | "clearTimeout" | "setInterval" | "clearInterval" => Some(timer::FACTS),
        "eval" => Some(eval::FACTS),
        "requestAnimationFrame" | "cancelAnimationFrame" => Some(animation::FACTS),
        "requestIdleCallback" | "cancelIdleCallback" => Some(idle::FACTS),
        "schedulerYield" | "schedulerPostTask" => Some(scheduler::FACTS),
        "worker" => Some(worker::FACTS),
        _ => None,
    }
}

fn print_summary(snapshot: &Snapshot, deltas: usize, cached: usize) {
    println!(
        "{} call sites, {} calls, {deltas} deltas replayed, {cached} traces cached",
        snapshot.record_count(),
        snapshot.total_calls()
    );

    let Ok(Value::Object(collections)) = serde_json::to_value(snapshot) else {
        return;
    };
    for (name, records) in &collections {
        let (Some(table), Some(records)) = (facts_for(name), records.as_array()) else {
            continue;
        };
        if records.is_empty() {
            continue;
        }
        println!("\n{name}");
        for record in records.iter().take(SUMMARY_ROWS) {
            let trace_id = record["traceId"].as_str().unwrap_or_default();
            let short = trace_id.get(..8).unwrap_or(trace_id);
            let mask = FactMask::from_bits(record["facts"].as_u64().unwrap_or(0));
            println!(
                "  {short:<8}  {:>5} calls  {:<12}  {}",
                record["calls"].as_u64().unwrap_or(0),
                record["domain"].as_str().unwrap_or("unknown"),
                get_tags(mask, table).join(" ")
            );
        }
    }

    println!("\npending:");
    for (kind, count) in &snapshot.online {
        println!("  {kind:<16} {count}");
    }
}

fn print_fact_tables() {
    for (name, table) in all_tables() {
        println!("{name}");
        for info in table {
            println!("  {:>4}  {:<20} {}", info.fact.value(), info.tag, info.detail);
        }
    }
}
