//! Scenario 2 (step-over doesn't descend into the callee) and scenario 3
//! (step-into lands on the callee's first statement).

use crate::common::*;
use bugcore::engine::{BreakpointLocation, Engine, EngineConfig, Request, StepKind};

#[test]
#[serial_test::serial]
fn step_over_call_lands_on_next_line_in_same_function() {
    let bin = compile_c_fixture("step_over_fixture", STEP_OVER_C, &[]);
    let hash = file_hash(&bin, "step_over_fixture.c");

    let engine = Engine::new(EngineConfig::for_ci());
    engine.send(Request::LoadSymbols { path: bin.clone() }).unwrap();
    wait_for_symbols_loaded(&engine);

    engine
        .send(Request::UpdateBreakpoint { loc: BreakpointLocation::Source { file_hash: hash, line: STEP_OVER_CALL_LINE } })
        .unwrap();
    next_state_updated(&engine);

    engine.send(Request::Launch { path: bin, args: vec![], stop_on_entry: false }).unwrap();
    let snapshot = wait_for_stop(&engine);
    assert_eq!(snapshot.paused.unwrap().source_location.unwrap().line_number, STEP_OVER_CALL_LINE);

    engine.send(Request::Step(StepKind::Over)).unwrap();
    let snapshot = wait_for_stop(&engine);
    let loc = snapshot.paused.unwrap().source_location.unwrap();
    assert_eq!(loc.line_number, STEP_OVER_AFTER_CALL_LINE, "step-over must not stop inside the callee body");
}

#[test]
#[serial_test::serial]
fn step_into_call_lands_on_callees_first_statement() {
    let bin = compile_c_fixture("step_into_fixture", STEP_OVER_C, &[]);
    let hash = file_hash(&bin, "step_into_fixture.c");

    let engine = Engine::new(EngineConfig::for_ci());
    engine.send(Request::LoadSymbols { path: bin.clone() }).unwrap();
    wait_for_symbols_loaded(&engine);

    engine
        .send(Request::UpdateBreakpoint { loc: BreakpointLocation::Source { file_hash: hash, line: STEP_OVER_CALL_LINE } })
        .unwrap();
    next_state_updated(&engine);

    engine.send(Request::Launch { path: bin, args: vec![], stop_on_entry: false }).unwrap();
    let snapshot = wait_for_stop(&engine);
    assert_eq!(snapshot.paused.unwrap().source_location.unwrap().line_number, STEP_OVER_CALL_LINE);

    engine.send(Request::Step(StepKind::Into)).unwrap();
    let snapshot = wait_for_stop(&engine);
    let loc = snapshot.paused.unwrap().source_location.unwrap();
    assert_eq!(loc.line_number, STEP_INTO_LANDING_LINE, "step-into must land inside the callee");
}
