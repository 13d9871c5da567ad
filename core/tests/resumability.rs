//! A run interrupted at any turn boundary and resumed from its checkpoint
//! ends in the same bytes as a run that was never interrupted.

mod common;

use beamrun_core::{
    outcome::{EXIT_COMPLETED, EXIT_FAILED, EXIT_SUSPENDED},
    policy::CheckpointPolicy,
    suspend::SuspendFlag,
};
use common::{engine, kernel_calls, ring_input, uninterrupted, ScriptedKernel, TempDir};
use std::fs;

#[test]
fn suspend_at_every_interval_then_resume_matches_uninterrupted() {
    let input = ring_input(100, 10);
    let reference = uninterrupted(&input);

    for k in (10..=90).step_by(10) {
        let dir = TempDir::new("resume-interval");
        let budget = CheckpointPolicy::from_input(&input).with_turn_budget(Some(k));
        let outcome = engine(&dir, input.clone(), ScriptedKernel::new()).with_policy(budget).run();
        assert_eq!(outcome.exit_code, EXIT_SUSPENDED, "first invocation stops at turn {k}");
        assert_eq!(outcome.final_turn, Some(k));

        let mut resumed = engine(&dir, input.clone(), ScriptedKernel::new());
        assert_eq!(resumed.resumed_from(), Some(k));
        assert_eq!(resumed.run().exit_code, EXIT_COMPLETED);
        assert_eq!(kernel_calls(&resumed), 100 - k);

        let output = fs::read(dir.join("out.bin")).expect("final state");
        assert!(output == reference, "resume after turn {k} diverged from the uninterrupted run");
    }
}

#[test]
fn suspend_between_intervals_then_resume_matches_uninterrupted() {
    let input = ring_input(60, 10);
    let reference = uninterrupted(&input);

    for k in [1, 13, 29, 59] {
        let dir = TempDir::new("resume-odd");
        let flag = SuspendFlag::new();
        let kernel = ScriptedKernel::new().suspend_at(k, flag.clone());
        let outcome = engine(&dir, input.clone(), kernel).with_suspend_signal(Box::new(flag)).run();
        assert_eq!(outcome.final_turn, Some(k));

        assert_eq!(engine(&dir, input.clone(), ScriptedKernel::new()).run().exit_code, EXIT_COMPLETED);
        let output = fs::read(dir.join("out.bin")).expect("final state");
        assert!(output == reference, "resume after suspend at turn {k} diverged");
    }
}

#[test]
fn many_short_invocations_match_uninterrupted() {
    let input = ring_input(50, 10);
    let reference = uninterrupted(&input);
    let dir = TempDir::new("resume-chain");
    let budget = CheckpointPolicy::from_input(&input).with_turn_budget(Some(7));

    let mut invocations = 0;
    loop {
        invocations += 1;
        let outcome = engine(&dir, input.clone(), ScriptedKernel::new()).with_policy(budget).run();
        match outcome.exit_code {
            EXIT_SUSPENDED => continue,
            EXIT_COMPLETED => break,
            other => panic!("invocation {invocations} exited with {other}: {outcome:?}"),
        }
    }
    assert_eq!(invocations, 8, "50 turns in slices of at most 7");
    assert!(fs::read(dir.join("out.bin")).expect("final state") == reference);
}

#[test]
fn crash_then_resume_matches_uninterrupted() {
    let input = ring_input(100, 10);
    let reference = uninterrupted(&input);
    let dir = TempDir::new("resume-crash");

    let mut crashed = engine(&dir, input.clone(), ScriptedKernel::new().fail_reaching(47));
    assert_eq!(crashed.run().exit_code, EXIT_FAILED);
    drop(crashed);

    // The lost turns 41..46 are re-tracked from the turn-40 checkpoint.
    let mut resumed = engine(&dir, input.clone(), ScriptedKernel::new());
    assert_eq!(resumed.resumed_from(), Some(40));
    assert_eq!(resumed.run().exit_code, EXIT_COMPLETED);
    assert_eq!(kernel_calls(&resumed), 60);
    assert!(fs::read(dir.join("out.bin")).expect("final state") == reference);
}
