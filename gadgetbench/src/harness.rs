//! The measurement harness and its configuration.

pub mod state;
pub mod config;
pub use config::*;
pub use state::*;

use num::rational::Ratio;

use crate::asm::LoopLayout;
use crate::counter::CycleCounter;
use crate::error::{ HarnessError, Result };
use crate::exec::{ Executor, Sampling };
use crate::ir::{ GadgetProgram, OperandSet };
use crate::stats::{ BenchmarkResult, RawResults };

/// Harness used to enable a cycle counter and measure gadget loops.
///
/// A measurement is a pair of counter samples taken around a loop which
/// runs the gadget `iterations` times:
///
/// 1. [CycleHarness::enable_counter] starts the counter,
/// 2. [CycleHarness::run_gadget] runs the loop between two samples,
/// 3. [CycleHarness::read_counter_delta] returns the difference,
/// 4. [CycleHarness::compute_result] divides by the iteration count.
///
/// [CycleHarness::measure] does all of this (plus warmup and repetitions).
///
/// Calling these out of order fails with [HarnessError::OutOfSequence].
///
/// The counter and the executor are both traits: see [crate::counter] and
/// [crate::exec] for the available implementations.
pub struct CycleHarness<C: CycleCounter, E: Executor> {
    counter: C,
    executor: E,
    state: CounterState,

    /// The program and operands currently loaded into the executor
    loaded: Option<(GadgetProgram, OperandSet)>,

    /// Print the loop listing when a program is loaded
    disas: bool,
}

impl <C: CycleCounter, E: Executor> CycleHarness<C, E> {
    pub fn new(counter: C, executor: E) -> Self {
        Self {
            counter,
            executor,
            state: CounterState::Uninitialized,
            loaded: None,
            disas: false,
        }
    }

    pub fn disas(mut self, x: bool) -> Self {
        self.disas = x;
        self
    }

    pub fn state(&self) -> CounterState { self.state }
    pub fn counter(&self) -> &C { &self.counter }

    /// Gadget register values left by the most recent run.
    pub fn gpr_state(&self) -> GprState {
        self.executor.gpr_state()
    }

    fn out_of_sequence(&self, op: &'static str) -> HarnessError {
        HarnessError::OutOfSequence { op, state: self.state.name() }
    }
}

impl <C: CycleCounter, E: Executor> CycleHarness<C, E> {
    /// Start the cycle counter.
    ///
    /// Enabling an already-enabled counter restarts it and discards any
    /// pending samples.
    pub fn enable_counter(&mut self) -> Result<()> {
        self.counter.enable()?;
        self.state = CounterState::Enabled;
        tracing::debug!("cycle counter enabled");
        Ok(())
    }

    /// How loops sample the counter: inline when the counter allows it.
    fn sampling(&self) -> Sampling {
        match self.counter.inline_read() {
            Some(counter) => Sampling::Inline(counter),
            None => Sampling::Call,
        }
    }

    /// Load a program into the executor, unless it's already loaded.
    fn load(&mut self, program: &GadgetProgram, operands: &OperandSet)
        -> Result<()>
    {
        if let Some((p, o)) = &self.loaded {
            if p == program && o == operands {
                return Ok(());
            }
        }
        self.loaded = None;
        let sampling = self.sampling();
        self.executor.prepare(program, operands, sampling)?;
        if self.disas {
            println!("[*] loop for '{}':", program.name());
            LoopLayout::build(program, operands, sampling)?.disas()?;
        }
        tracing::debug!("loaded '{}' with {} operand(s)", program.name(), operands.len());
        self.loaded = Some((program.clone(), operands.clone()));
        Ok(())
    }

    /// Run the loaded program between two counter samples.
    fn sample_run(&mut self, iterations: u64) -> Result<()> {
        if self.state == CounterState::Uninitialized {
            return Err(self.out_of_sequence("run a gadget"));
        }

        let counter = &mut self.counter;
        let mut stamps = [0u64; 2];
        let mut taken = 0usize;
        let mut fault: Option<HarnessError> = None;
        let inline = self.executor.execute(iterations, &mut || {
            match counter.read() {
                Ok(val) => if taken < stamps.len() { stamps[taken] = val; },
                Err(e) => if fault.is_none() { fault = Some(e); },
            }
            taken += 1;
        })?;

        if let Some(e) = fault {
            return Err(e);
        }
        let (start, end) = match inline {
            Some(pair) if taken == 0 => pair,
            None if taken == 2 => (stamps[0], stamps[1]),
            _ => return Err(HarnessError::invalid(format!(
                "executor sampled the counter {} times (expected 2)",
                taken + 2 * usize::from(inline.is_some())
            ))),
        };
        self.state = CounterState::Sampled { start, end };
        Ok(())
    }

    /// Run the gadget described by `cfg` once, sampling the counter
    /// immediately before the first iteration and after the last.
    ///
    /// Operands are loaded before the first sample, so they are not
    /// counted. The samples are kept until [Self::read_counter_delta].
    pub fn run_gadget(&mut self, cfg: &BenchmarkConfig) -> Result<()> {
        cfg.validate()?;
        if self.state == CounterState::Uninitialized {
            return Err(self.out_of_sequence("run a gadget"));
        }
        let iterations = cfg.iteration_count()?;
        self.load(&cfg.program, &cfg.operands)?;
        self.sample_run(iterations)
    }

    /// Return `end - start` for the most recent run.
    ///
    /// Fails with [HarnessError::CounterOverflow] if the end sample is
    /// smaller than the start sample. The counter stays enabled either way.
    pub fn read_counter_delta(&mut self) -> Result<u64> {
        match self.state {
            CounterState::Sampled { start, end } => {
                self.state = CounterState::Enabled;
                let delta = end.checked_sub(start)
                    .ok_or(HarnessError::CounterOverflow { start, end })?;
                tracing::trace!("start={} end={} delta={}", start, end, delta);
                Ok(delta)
            },
            _ => Err(self.out_of_sequence("read a counter delta")),
        }
    }

    /// Turn a cycle delta into a [BenchmarkResult].
    ///
    /// Fails with [HarnessError::InvalidConfig] when `iterations` is zero.
    pub fn compute_result(delta: u64, iterations: u64) -> Result<BenchmarkResult> {
        if iterations == 0 {
            return Err(HarnessError::invalid("iteration count must be >= 1"));
        }
        Ok(BenchmarkResult {
            cycles: delta,
            iterations,
            cycles_per_iteration: Ratio::new(delta, iterations),
            samples: RawResults(vec![delta]),
        })
    }

    /// Measure the gadget described by `cfg`.
    ///
    /// Enables the counter if necessary, runs `cfg.warmup` discarded
    /// measurements and `cfg.repetitions` recorded ones, then reduces the
    /// recorded deltas with `cfg.aggregation`.
    pub fn measure(&mut self, cfg: &BenchmarkConfig) -> Result<BenchmarkResult> {
        cfg.validate()?;
        let iterations = cfg.iteration_count()?;
        if self.state == CounterState::Uninitialized {
            self.enable_counter()?;
        }
        self.load(&cfg.program, &cfg.operands)?;

        for _ in 0..cfg.warmup {
            self.sample_run(iterations)?;
            self.read_counter_delta()?;
        }

        let mut samples = Vec::with_capacity(cfg.repetitions);
        for _ in 0..cfg.repetitions {
            self.sample_run(iterations)?;
            samples.push(self.read_counter_delta()?);
        }
        let samples = RawResults(samples);
        let delta = cfg.aggregation.apply(&samples)?;

        let mut res = Self::compute_result(delta, iterations)?;
        res.samples = samples;
        tracing::debug!(
            "'{}': {} cycles over {} iterations ({:?} of {})",
            cfg.program.name(), res.cycles, iterations,
            cfg.aggregation, cfg.repetitions
        );
        Ok(res)
    }

    /// Run the gadget in batches of `cfg.iterations` without sampling,
    /// for as long as `keep_going` returns true.
    ///
    /// Returns the number of completed batches.
    pub fn spin(&mut self, cfg: &BenchmarkConfig, keep_going: impl Fn() -> bool)
        -> Result<u64>
    {
        cfg.validate()?;
        let iterations = cfg.iteration_count()?;
        self.load(&cfg.program, &cfg.operands)?;
        let mut batches = 0;
        while keep_going() {
            self.executor.execute(iterations, &mut || {})?;
            batches += 1;
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::counter::{ ClockCounter, InlineCounter, SequenceCounter, SimClock };
    use crate::exec::{ CortexA72, Simulator, UniformLatency };
    use crate::gadget::Nop;

    fn sim_harness() -> CycleHarness<ClockCounter, Simulator<UniformLatency>> {
        let clock = SimClock::new();
        CycleHarness::new(
            ClockCounter::new(clock.clone()),
            Simulator::new(clock, UniformLatency(1)),
        )
    }

    #[test]
    fn run_before_enable() {
        let mut h = sim_harness();
        let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
        assert!(matches!(
            h.run_gadget(&cfg),
            Err(HarnessError::OutOfSequence { state: "uninitialized", .. })
        ));
    }

    #[test]
    fn delta_consumes_samples() {
        let mut h = sim_harness();
        let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
        h.enable_counter().unwrap();
        assert!(h.read_counter_delta().is_err());
        h.run_gadget(&cfg).unwrap();
        assert_eq!(h.state(), CounterState::Sampled { start: 0, end: 10 });
        assert_eq!(h.read_counter_delta().unwrap(), 10);
        assert_eq!(h.state(), CounterState::Enabled);
        assert!(h.read_counter_delta().is_err());
    }

    #[test]
    fn counter_errors_surface() {
        let clock = SimClock::new();
        let mut h = CycleHarness::new(
            SequenceCounter::denied(),
            Simulator::new(clock, CortexA72),
        );
        let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
        assert!(matches!(
            h.measure(&cfg),
            Err(HarnessError::UnsupportedPlatform(_))
        ));
        assert_eq!(h.state(), CounterState::Uninitialized);
    }

    /// Reports fixed inline stamps and never calls the sample hook.
    struct InlineStamps {
        stamps: (u64, u64),
        sampling: Option<Sampling>,
    }
    impl Executor for InlineStamps {
        fn prepare(&mut self, _program: &GadgetProgram, _operands: &OperandSet,
            sampling: Sampling) -> Result<()>
        {
            self.sampling = Some(sampling);
            Ok(())
        }
        fn execute(&mut self, _iterations: u64, _sample: &mut dyn FnMut())
            -> Result<Option<(u64, u64)>>
        {
            match self.sampling {
                Some(Sampling::Inline(_)) => Ok(Some(self.stamps)),
                _ => Ok(None),
            }
        }
        fn gpr_state(&self) -> GprState { GprState::new() }
    }

    /// Readable inline only; a call to `read` is an error.
    struct InlineOnly;
    impl CycleCounter for InlineOnly {
        fn enable(&mut self) -> Result<()> { Ok(()) }
        fn read(&mut self) -> Result<u64> {
            Err(HarnessError::invalid("read through a call"))
        }
        fn inline_read(&self) -> Option<InlineCounter> {
            Some(InlineCounter::Pmccntr)
        }
    }

    #[test]
    fn inline_counters_skip_the_hook() {
        let exec = InlineStamps { stamps: (1000, 1130), sampling: None };
        let mut h = CycleHarness::new(InlineOnly, exec);
        let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
        h.enable_counter().unwrap();
        h.run_gadget(&cfg).unwrap();
        assert_eq!(h.read_counter_delta().unwrap(), 130);
    }

    #[test]
    fn missing_samples_are_an_error() {
        let exec = InlineStamps { stamps: (0, 0), sampling: None };
        let mut h = CycleHarness::new(SequenceCounter::new([1, 2]), exec);
        let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
        h.enable_counter().unwrap();
        assert!(matches!(h.run_gadget(&cfg), Err(HarnessError::InvalidConfig(_))));
        assert_eq!(h.state(), CounterState::Enabled);
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(matches!(
            CycleHarness::<ClockCounter, Simulator>::compute_result(100, 0),
            Err(HarnessError::InvalidConfig(_))
        ));
    }
}
