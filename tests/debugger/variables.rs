//! Scenario 5 (struct/pointer watch rendering): a watched struct with a
//! nested struct member and a `char *` member renders as a `Struct` field
//! tree with a `CString` leaf for the string member.

use crate::common::*;
use bugcore::engine::{BreakpointLocation, Engine, EngineConfig, Request};
use bugcore::eval::FieldKind;

#[test]
#[serial_test::serial]
fn watched_struct_renders_nested_members_and_cstring() {
    let bin = compile_c_fixture("vars_fixture", VARS_C, &[]);
    let hash = file_hash(&bin, "vars_fixture.c");

    let engine = Engine::new(EngineConfig::for_ci());
    engine.send(Request::LoadSymbols { path: bin.clone() }).unwrap();
    wait_for_symbols_loaded(&engine);

    engine
        .send(Request::UpdateBreakpoint { loc: BreakpointLocation::Source { file_hash: hash, line: VARS_RETURN_LINE } })
        .unwrap();
    next_state_updated(&engine);

    engine.send(Request::SetWatchExpressions { expressions: vec!["r".to_string()] }).unwrap();
    next_state_updated(&engine);

    engine.send(Request::Launch { path: bin, args: vec![], stop_on_entry: false }).unwrap();
    let snapshot = wait_for_stop(&engine);
    let paused = snapshot.paused.unwrap();

    let watch = paused.watches.first().expect("watch expression `r` should have rendered");
    let top = &watch.fields[0];
    let FieldKind::Struct { members } = &top.kind else {
        panic!("expected `r` to render as a struct, got {:?}", top.kind);
    };

    let (_, b_idx) = members.iter().find(|(name, _)| name == "b").expect("member `b` present");
    let FieldKind::CString { text, .. } = &watch.fields[*b_idx].kind else {
        panic!("expected member `b` to render as a CString, got {:?}", watch.fields[*b_idx].kind);
    };
    assert_eq!(text, "basic struct");

    let (_, c_idx) = members.iter().find(|(name, _)| name == "c").expect("member `c` present");
    let FieldKind::Struct { members: inner_members } = &watch.fields[*c_idx].kind else {
        panic!("expected member `c` to render as a nested struct, got {:?}", watch.fields[*c_idx].kind);
    };
    assert!(inner_members.iter().any(|(name, _)| name == "d"));
    assert!(inner_members.iter().any(|(name, _)| name == "e"));
}
