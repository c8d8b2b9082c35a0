
use clap::Parser;
use gadgetbench::*;
use gadgetbench_bcm2711::{ init_tracing, parse_word, report };

/// Measure the latency of a single gadget in a tight loop.
///
/// The gadget runs `--iterations` times back-to-back between two reads of
/// the cycle counter. Operand registers are loaded before the first read.
///
/// Examples:
///
///   gadget --gadget udiv --divide short
///   gadget --gadget udiv --operand x21=0x5678_1234_5678 --operand x22=0x1234
///   gadget --word 0x9ac808e6 --repetitions 32 --aggregate median
///
#[derive(Parser)]
#[command(verbatim_doc_comment)]
struct Args {
    /// Number of loop iterations per measurement
    #[arg(short, long, allow_negative_numbers = true,
        default_value_t = BenchmarkConfig::DEFAULT_ITERATIONS)]
    iterations: i64,

    /// Built-in gadget to measure
    #[arg(short, long, value_enum, default_value = "udiv")]
    gadget: GadgetKind,

    /// Measure these encoded instruction words instead of a built-in gadget
    #[arg(long = "word", value_name = "WORD", value_parser = parse_word,
        conflicts_with_all = ["gadget", "divide"])]
    words: Vec<u32>,

    /// Reference dividend/divisor pair (only for 'udiv' and 'sdiv')
    #[arg(long, value_enum)]
    divide: Option<DividerOperands>,

    /// Set an operand register before the loop (repeatable)
    #[arg(long = "operand", value_name = "xN=VALUE")]
    operands: Vec<Binding>,

    /// Number of measurements
    #[arg(short, long, default_value_t = 1)]
    repetitions: usize,

    /// How measurements are reduced to one result
    #[arg(long, value_enum, default_value = "min")]
    aggregate: Aggregation,

    /// Number of discarded measurements before the recorded ones
    #[arg(long, default_value_t = 0)]
    warmup: usize,

    /// Print the gadget registers after the last run
    #[arg(long)]
    gprs: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    harness: HarnessArgs,
}

impl Args {
    fn benchmark(&self) -> anyhow::Result<BenchmarkConfig> {
        let cfg = if self.words.is_empty() {
            let gadget = self.gadget.gadget();
            let cfg = BenchmarkConfig::for_gadget(gadget.as_ref());
            match self.divide {
                None => cfg,
                Some(d) => match self.gadget {
                    GadgetKind::Udiv | GadgetKind::Sdiv => {
                        let (n, m) = d.values();
                        let regs = ThreeReg::default();
                        cfg.bind(&[Binding(regs.rn, n), Binding(regs.rm, m)])
                    },
                    _ => anyhow::bail!(
                        "--divide only applies to 'udiv' and 'sdiv' gadgets"
                    ),
                },
            }
        } else {
            let gadget = RawGadget { words: self.words.clone() };
            BenchmarkConfig::for_gadget(&gadget)
        };

        let cfg = cfg.bind(&self.operands)
            .iterations(self.iterations)
            .repetitions(self.repetitions)
            .aggregation(self.aggregate)
            .warmup(self.warmup);
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = args.benchmark()?;

    let mut harness = HarnessConfig::from_cmdline_args(&args.harness).emit()?;
    let res = harness.measure(&cfg)?;
    report(&res, args.json)?;

    if args.gprs {
        eprintln!("{:?}", harness.gpr_state());
    }
    Ok(())
}
