
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::time::Instant;

use clap::Parser;
use gadgetbench::*;
use gadgetbench_bcm2711::init_tracing;
use signal_hook::consts::{ SIGINT, SIGTERM };

/// Run a gadget continuously until interrupted.
///
/// Useful as a steady source of activity (for instance, to watch a divider
/// from another core). The gadget runs in batches of `--batch` iterations;
/// SIGINT or SIGTERM stops it after the current batch.
#[derive(Parser)]
struct Args {
    /// Built-in gadget to run
    #[arg(short, long, value_enum, default_value = "udiv")]
    gadget: GadgetKind,

    /// Set an operand register before the loop (repeatable)
    #[arg(long = "operand", value_name = "xN=VALUE")]
    operands: Vec<Binding>,

    /// Loop iterations per batch
    #[arg(short, long, default_value_t = 10_000_000)]
    batch: i64,

    #[command(flatten)]
    harness: HarnessArgs,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&stop))?;

    let gadget = args.gadget.gadget();
    let cfg = BenchmarkConfig::for_gadget(gadget.as_ref())
        .bind(&args.operands)
        .iterations(args.batch);
    cfg.validate()?;

    let mut harness = HarnessConfig::from_cmdline_args(&args.harness).emit()?;
    println!("[*] running '{}' until interrupted", gadget.name());

    let start = Instant::now();
    let batches = harness.spin(&cfg, || !stop.load(Ordering::Relaxed))?;
    println!("[*] stopped after {} batch(es) ({:.1?})", batches, start.elapsed());
    Ok(())
}
