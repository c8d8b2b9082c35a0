//! Harness and benchmark configuration.

use crate::counter::{ ClockCounter, CounterBackend, CycleCounter, SimClock };
use crate::error::{ HarnessError, Result };
use crate::exec::{ CortexA72, Executor, JitExecutor, Simulator };
use crate::gadget::Gadget;
use crate::harness::CycleHarness;
use crate::ir::{ Binding, GadgetProgram, OperandSet };
use crate::util::GadgetEnv;

/// The target platform for measured code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum TargetPlatform {
    /// Raspberry Pi 4 (Cortex-A72)
    Bcm2711,
    /// Software model of the Cortex-A72, runs anywhere
    Simulated,
}

/// How repeated measurements are reduced to a single delta.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Aggregation {
    /// Smallest observed delta
    #[default]
    Min,
    /// Lower median of the observed deltas
    Median,
}

/// Harness options shared by all binaries.
#[derive(Clone, Debug, clap::Args)]
pub struct HarnessArgs {
    /// Platform to run on
    #[arg(long, value_enum, default_value = "bcm2711")]
    pub platform: TargetPlatform,

    /// Cycle counter source (ignored when simulating)
    #[arg(long, value_enum, default_value = "pmccntr")]
    pub counter: CounterBackend,

    /// Pin to this core instead of the platform default
    #[arg(long)]
    pub core: Option<usize>,

    /// Don't pin to any core
    #[arg(long, conflicts_with = "core")]
    pub no_pin: bool,

    /// Print the assembled loop before running it
    #[arg(long)]
    pub disas: bool,
}

/// Configuration used to build a [CycleHarness].
#[derive(Clone, Copy, Debug)]
pub struct HarnessConfig {
    /// The target platform
    pub platform: TargetPlatform,

    /// Cycle counter source for native runs
    pub counter: CounterBackend,

    /// Optionally pin the caller to a specific core.
    ///
    /// Without pinning, the scheduler may migrate the thread between the
    /// two counter samples, which are then not comparable.
    pub pinned_core: Option<usize>,

    /// Print the assembled loop when it is prepared
    pub disas: bool,

    /// Cycles the simulator charges per iteration for loop control
    pub sim_loop_cycles: u64,
}

impl HarnessConfig {
    pub fn from_cmdline_args(args: &HarnessArgs) -> Self {
        let cfg = match args.platform {
            TargetPlatform::Bcm2711 => Self::default_bcm2711(),
            TargetPlatform::Simulated => Self::simulated(),
        };
        let pinned_core = match (args.no_pin, args.core) {
            (true, _) => None,
            (false, Some(core)) => Some(core),
            (false, None) => cfg.pinned_core,
        };
        cfg.counter(args.counter).pinned_core(pinned_core).disas(args.disas)
    }

    pub fn default_bcm2711() -> Self {
        Self {
            platform: TargetPlatform::Bcm2711,
            counter: CounterBackend::Pmccntr,
            pinned_core: Some(3),
            disas: false,
            sim_loop_cycles: 0,
        }
    }

    pub fn simulated() -> Self {
        Self {
            platform: TargetPlatform::Simulated,
            counter: CounterBackend::Pmccntr,
            pinned_core: None,
            disas: false,
            sim_loop_cycles: 0,
        }
    }
}

impl HarnessConfig {
    pub fn counter(mut self, x: CounterBackend) -> Self {
        self.counter = x;
        self
    }

    pub fn pinned_core(mut self, x: Option<usize>) -> Self {
        self.pinned_core = x;
        self
    }

    pub fn disas(mut self, x: bool) -> Self {
        self.disas = x;
        self
    }

    pub fn sim_loop_cycles(mut self, x: u64) -> Self {
        self.sim_loop_cycles = x;
        self
    }
}

/// A harness with its counter and executor chosen at runtime.
pub type DynHarness = CycleHarness<Box<dyn CycleCounter>, Box<dyn Executor>>;

impl HarnessConfig {
    /// Apply process-level settings (pinning) and wrap the given parts.
    pub fn build<C: CycleCounter, E: Executor>(self, counter: C, executor: E)
        -> Result<CycleHarness<C, E>>
    {
        match self.pinned_core {
            Some(core) => {
                GadgetEnv::pin_to_core(core)?;
                tracing::info!("pinned to core {}", core);
            },
            None => if self.platform != TargetPlatform::Simulated {
                tracing::warn!(
                    "not pinned; migrations between samples will add noise"
                );
            },
        }
        Ok(CycleHarness::new(counter, executor).disas(self.disas))
    }

    /// Create a [CycleHarness] for the configured platform.
    pub fn emit(self) -> Result<DynHarness> {
        match self.platform {
            TargetPlatform::Bcm2711 => {
                let counter = self.counter.build();
                let executor: Box<dyn Executor> = Box::new(JitExecutor::new()?);
                self.build(counter, executor)
            },
            TargetPlatform::Simulated => {
                let clock = SimClock::new();
                let counter: Box<dyn CycleCounter> =
                    Box::new(ClockCounter::new(clock.clone()));
                let executor: Box<dyn Executor> = Box::new(
                    Simulator::new(clock, CortexA72)
                        .loop_cycles(self.sim_loop_cycles)
                );
                self.build(counter, executor)
            },
        }
    }
}

/// One benchmark: what to run, with which operands, and how often.
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub program: GadgetProgram,
    pub operands: OperandSet,

    /// Loop iterations per measurement. Must be at least 1.
    pub iterations: i64,

    /// Number of measurements reduced into the result
    pub repetitions: usize,

    /// How measurements are reduced
    pub aggregation: Aggregation,

    /// Measurements taken and discarded before the recorded ones
    pub warmup: usize,
}

impl BenchmarkConfig {
    /// Default number of loop iterations.
    pub const DEFAULT_ITERATIONS: i64 = 1000 * 1000;

    pub fn new(program: GadgetProgram) -> Self {
        Self {
            program,
            operands: OperandSet::new(),
            iterations: Self::DEFAULT_ITERATIONS,
            repetitions: 1,
            aggregation: Aggregation::Min,
            warmup: 0,
        }
    }

    /// Use a gadget along with its default operands.
    pub fn for_gadget(gadget: &dyn Gadget) -> Self {
        Self::new(GadgetProgram::from_gadget(gadget))
            .operands(gadget.default_operands())
    }

    pub fn operands(mut self, x: OperandSet) -> Self {
        self.operands = x;
        self
    }

    /// Override individual operands.
    pub fn bind(mut self, bindings: &[Binding]) -> Self {
        for Binding(reg, val) in bindings {
            self.operands.insert(*reg, *val);
        }
        self
    }

    pub fn iterations(mut self, x: i64) -> Self {
        self.iterations = x;
        self
    }

    pub fn repetitions(mut self, x: usize) -> Self {
        self.repetitions = x;
        self
    }

    pub fn aggregation(mut self, x: Aggregation) -> Self {
        self.aggregation = x;
        self
    }

    pub fn warmup(mut self, x: usize) -> Self {
        self.warmup = x;
        self
    }

    /// Check everything that can be checked without running anything.
    pub fn validate(&self) -> Result<()> {
        if self.iterations < 1 {
            return Err(HarnessError::invalid(format!(
                "iteration count must be >= 1 (got {})", self.iterations
            )));
        }
        if self.repetitions < 1 {
            return Err(HarnessError::invalid("repetitions must be >= 1"));
        }
        self.program.validate()?;
        self.operands.validate()?;
        Ok(())
    }

    /// The iteration count, once validated.
    pub fn iteration_count(&self) -> Result<u64> {
        u64::try_from(self.iterations)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| HarnessError::invalid(format!(
                "iteration count must be >= 1 (got {})", self.iterations
            )))
    }
}
