//! End-to-end runs of the harness against deterministic counters.

use gadgetbench::*;
use gadgetbench::counter::{ ClockCounter, SequenceCounter, SimClock };
use gadgetbench::exec::{ CortexA72, LatencyModel, Simulator, UniformLatency };
use proptest::prelude::*;

fn sim_harness<M: LatencyModel>(model: M) -> CycleHarness<ClockCounter, Simulator<M>> {
    let clock = SimClock::new();
    CycleHarness::new(ClockCounter::new(clock.clone()), Simulator::new(clock, model))
}

fn sequence_harness(values: Vec<u64>) -> CycleHarness<SequenceCounter, Simulator> {
    CycleHarness::new(
        SequenceCounter::new(values),
        Simulator::new(SimClock::new(), CortexA72),
    )
}

#[test]
fn delta_from_counter_samples() {
    let mut h = sequence_harness(vec![1000, 1130]);
    let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
    h.enable_counter().unwrap();
    h.run_gadget(&cfg).unwrap();
    assert_eq!(h.read_counter_delta().unwrap(), 130);
    assert_eq!(h.counter().reads(), 2);
}

#[test]
fn one_cycle_nops() {
    let mut h = sim_harness(UniformLatency(1));
    let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(1000);
    let res = h.measure(&cfg).unwrap();
    assert_eq!(res.cycles, 1000);
    assert_eq!(res.iterations, 1000);
    assert_eq!(res.floor(), 1);
    assert_eq!(res.ceil(), 1);
    assert_eq!(res.to_f64(), 1.0);
}

#[test]
fn single_iteration_is_the_delta() {
    let mut h = sim_harness(CortexA72);
    let udiv = UnsignedDivide::default();
    let cfg = BenchmarkConfig::for_gadget(&udiv).iterations(1);
    let res = h.measure(&cfg).unwrap();
    assert_eq!(res.cycles, 17);
    assert_eq!(res.floor(), res.cycles);
}

#[test]
fn invalid_iteration_counts() {
    for n in [0, -1] {
        let mut h = sequence_harness(vec![1000, 1130]);
        let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(n);
        h.enable_counter().unwrap();
        assert!(matches!(h.run_gadget(&cfg), Err(HarnessError::InvalidConfig(_))));
        assert!(matches!(h.measure(&cfg), Err(HarnessError::InvalidConfig(_))));
        // Nothing was sampled.
        assert_eq!(h.counter().reads(), 0);
    }
}

#[test]
fn counter_access_denied() {
    let mut h = CycleHarness::new(
        SequenceCounter::denied(),
        Simulator::new(SimClock::new(), CortexA72),
    );
    assert!(matches!(h.enable_counter(), Err(HarnessError::UnsupportedPlatform(_))));
    let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
    assert!(matches!(h.measure(&cfg), Err(HarnessError::UnsupportedPlatform(_))));
}

#[cfg(not(target_arch = "aarch64"))]
#[test]
fn bcm2711_needs_an_aarch64_host() {
    let res = HarnessConfig::default_bcm2711().pinned_core(None).emit();
    assert!(matches!(res, Err(HarnessError::UnsupportedPlatform(_))));
}

#[test]
fn reenabling_discards_pending_samples() {
    let mut h = sequence_harness(vec![1000, 1130, 2000, 2050]);
    let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
    h.enable_counter().unwrap();
    h.run_gadget(&cfg).unwrap();
    assert_eq!(h.state(), CounterState::Sampled { start: 1000, end: 1130 });

    h.enable_counter().unwrap();
    assert_eq!(h.state(), CounterState::Enabled);
    assert!(matches!(h.read_counter_delta(), Err(HarnessError::OutOfSequence { .. })));

    h.run_gadget(&cfg).unwrap();
    assert_eq!(h.read_counter_delta().unwrap(), 50);
}

#[test]
fn wrapped_counter_is_an_error() {
    let mut h = sequence_harness(vec![1130, 1000]);
    let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
    h.enable_counter().unwrap();
    h.run_gadget(&cfg).unwrap();
    assert!(matches!(
        h.read_counter_delta(),
        Err(HarnessError::CounterOverflow { start: 1130, end: 1000 })
    ));
    assert_eq!(h.state(), CounterState::Enabled);
}

#[test]
fn operands_change_the_delta() {
    let udiv = UnsignedDivide::default();
    let run = |d: DividerOperands| {
        let (n, m) = d.values();
        let cfg = BenchmarkConfig::for_gadget(&udiv)
            .operands(udiv.operands(n, m))
            .iterations(100);
        sim_harness(CortexA72).measure(&cfg).unwrap()
    };
    let short = run(DividerOperands::Short);
    let medium = run(DividerOperands::Medium);
    let long = run(DividerOperands::Long);
    assert_eq!(short.cycles, 7 * 100);
    assert_eq!(medium.cycles, 13 * 100);
    assert_eq!(long.cycles, 17 * 100);
    assert!(short.cycles < medium.cycles && medium.cycles < long.cycles);
}

#[test]
fn operand_overrides_reach_the_gadget() {
    let mut h = sim_harness(CortexA72);
    let cfg = BenchmarkConfig::for_gadget(&UnsignedDivide::default())
        .bind(&[
            "x21=0x1000".parse::<Binding>().unwrap(),
            "x22=3".parse::<Binding>().unwrap(),
        ])
        .iterations(5);
    let res = h.measure(&cfg).unwrap();
    assert_eq!(res.cycles, 5 * 7);
    assert_eq!(h.gpr_state().read_gpr(Reg::X20), Some(0x555));
    assert_eq!(h.gpr_state().read_gpr(Reg::X21), Some(0x1000));
}

#[test]
fn fractional_cycles_per_iteration() {
    let res = CycleHarness::<ClockCounter, Simulator>::compute_result(1000, 3)
        .unwrap();
    assert_eq!(res.floor(), 333);
    assert_eq!(res.ceil(), 334);
    assert_eq!(res.cycles_per_iteration, num::rational::Ratio::new(1000, 3));
}

#[test]
fn repetitions_are_aggregated() {
    // Each run takes two reads.
    let values = vec![0, 140, 0, 130, 0, 135, 0, 900];
    let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10).repetitions(4);

    let res = sequence_harness(values.clone()).measure(&cfg).unwrap();
    assert_eq!(res.samples, RawResults(vec![140, 130, 135, 900]));
    assert_eq!(res.cycles, 130);

    let cfg = cfg.aggregation(Aggregation::Median);
    let res = sequence_harness(values).measure(&cfg).unwrap();
    assert_eq!(res.cycles, 135);
}

#[test]
fn warmup_runs_are_discarded() {
    let values = vec![0, 5000, 0, 130];
    let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10).warmup(1);
    let mut h = sequence_harness(values);
    let res = h.measure(&cfg).unwrap();
    assert_eq!(res.samples, RawResults(vec![130]));
    assert_eq!(h.counter().reads(), 4);
}

#[test]
fn operations_out_of_order() {
    let mut h = sim_harness(CortexA72);
    let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(10);
    assert!(matches!(h.run_gadget(&cfg), Err(HarnessError::OutOfSequence { .. })));
    assert!(matches!(h.read_counter_delta(), Err(HarnessError::OutOfSequence { .. })));
    h.enable_counter().unwrap();
    assert!(matches!(h.read_counter_delta(), Err(HarnessError::OutOfSequence { .. })));
}

#[test]
fn raw_words_cannot_be_simulated() {
    let mut h = sim_harness(CortexA72);
    let cfg = BenchmarkConfig::for_gadget(&RawGadget { words: vec![0xd503_201f] });
    assert!(matches!(h.measure(&cfg), Err(HarnessError::InvalidConfig(_))));
}

#[test]
fn counter_lease_is_process_wide() {
    let lease = CounterLease::acquire().unwrap();
    assert!(CounterLease::is_held());
    assert!(matches!(CounterLease::acquire(), Err(HarnessError::CounterBusy)));
    drop(lease);
    assert!(!CounterLease::is_held());
}

#[test]
fn simulated_config_emits() {
    let mut h = HarnessConfig::simulated().emit().unwrap();
    let cfg = BenchmarkConfig::for_gadget(&IntMul::default()).iterations(50);
    let res = h.measure(&cfg).unwrap();
    assert_eq!(res.cycles, 150);
    assert_eq!(res.to_string(), "Cycles: 150\nCycles/iteration: 3");
}

proptest! {
    #[test]
    fn delta_is_monotonic_in_iterations(a in 1i64..5000, b in 1i64..5000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let measure = |n: i64| {
            let cfg = BenchmarkConfig::for_gadget(&UnsignedDivide::default())
                .iterations(n);
            sim_harness(CortexA72).measure(&cfg).unwrap().cycles
        };
        prop_assert!(measure(lo) <= measure(hi));
    }

    #[test]
    fn result_matches_delta(delta in any::<u64>(), iterations in 1u64..u64::MAX) {
        let res = CycleHarness::<ClockCounter, Simulator>::compute_result(
            delta, iterations
        ).unwrap();
        prop_assert_eq!(res.cycles, delta);
        prop_assert_eq!(res.iterations, iterations);
        prop_assert_eq!(res.floor(), delta / iterations);
        prop_assert!(res.ceil() - res.floor() <= 1);
    }

    #[test]
    fn sampled_delta_is_end_minus_start(start in 0u64..1 << 62, len in 0u64..1 << 62) {
        let mut h = sequence_harness(vec![start, start + len]);
        let cfg = BenchmarkConfig::for_gadget(&Nop).iterations(1);
        h.enable_counter().unwrap();
        h.run_gadget(&cfg).unwrap();
        prop_assert_eq!(h.read_counter_delta().unwrap(), len);
    }
}
