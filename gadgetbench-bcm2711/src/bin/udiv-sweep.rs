
use clap::Parser;
use rand::prelude::*;
use gadgetbench::*;
use gadgetbench::exec::CortexA72;
use gadgetbench_bcm2711::init_tracing;

/// Sweep the integer divider across dividend magnitudes.
///
/// Context
/// =======
///
/// The Cortex-A72 divider terminates early: the latency of `udiv` depends
/// on how many significant bits the quotient has. For each dividend width,
/// this draws random dividends with exactly that many significant bits,
/// measures `udiv x20, x21, x22` with each one, and prints the measured
/// cycles/iteration next to the value predicted by the simulator's model.
///
#[derive(Parser)]
#[command(verbatim_doc_comment)]
struct Args {
    /// Divisor used for every measurement
    #[arg(long, default_value_t = 0x1234)]
    divisor: u64,

    /// Random dividends drawn per width
    #[arg(long, default_value_t = 4)]
    samples: usize,

    /// Step between dividend widths (in bits)
    #[arg(long, default_value_t = 4)]
    step: u32,

    /// Number of loop iterations per measurement
    #[arg(short, long, default_value_t = 100_000)]
    iterations: i64,

    /// Number of measurements per dividend
    #[arg(short, long, default_value_t = 8)]
    repetitions: usize,

    #[command(flatten)]
    harness: HarnessArgs,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    if args.divisor == 0 {
        anyhow::bail!("divisor must be non-zero");
    }
    if args.step == 0 {
        anyhow::bail!("step must be non-zero");
    }

    let mut harness = HarnessConfig::from_cmdline_args(&args.harness).emit()?;
    let mut rng = thread_rng();
    let gadget = UnsignedDivide::default();

    println!("[*] udiv latency sweep, divisor={:#x}", args.divisor);
    println!("  {:>5} {:>20} {:>10} {:>10}", "bits", "dividend", "measured", "model");

    let mut mismatches = 0;
    for bits in (args.step..=64).step_by(args.step as usize) {
        for _ in 0..args.samples {
            let dividend = random_width(&mut rng, bits);
            let cfg = BenchmarkConfig::for_gadget(&gadget)
                .operands(gadget.operands(dividend, args.divisor))
                .iterations(args.iterations)
                .repetitions(args.repetitions)
                .warmup(1);
            let res = harness.measure(&cfg)?;
            let model = CortexA72::divide_latency(dividend, args.divisor);
            let mark = if res.floor() == model { "" } else { " [!]" };
            if !mark.is_empty() {
                mismatches += 1;
            }
            println!("  {:>5} {:>#20x} {:>10.3} {:>10}{}",
                bits, dividend, res.to_f64(), model, mark
            );
        }
    }
    println!("[*] {} measurement(s) differ from the model", mismatches);
    Ok(())
}
