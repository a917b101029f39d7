//! Shared fixture sources and `Engine` driving helpers for the integration
//! suite, mirroring the teacher's `tests/debugger/common`. These tests need
//! an actual compiled, DWARF-carrying subordinate, so fixtures are tiny C
//! programs built on the fly with the system `cc` rather than checked in as
//! prebuilt binaries. C is the only language `eval::encoder_for` currently
//! resolves an encoder for, which is also why every fixture here is C
//! rather than Rust.

use bugcore::engine::{BreakpointSnapshot, Engine, Response, StateSnapshot};
use bugcore::target::{string_cache::hash_str, Target};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

pub const LOOP_PRINT_C: &str = r#"
#include <stdio.h>
#include <unistd.h>

int main(void) {
    unsigned long i = 0;
    for (;;) {
        i += 1;
        printf("%lu\n", i);
        usleep(20000);
    }
    return 0;
}
"#;
pub const LOOP_PRINT_INCREMENT_LINE: u64 = 6;

pub const STEP_OVER_C: &str = r#"
int b(void) {
    int x = 10;
    return x + 1;
}

int a(void) {
    int r = b();
    return r + 1;
}

int main(void) {
    int v = a();
    return v;
}
"#;
pub const STEP_OVER_CALL_LINE: u64 = 8;
pub const STEP_OVER_AFTER_CALL_LINE: u64 = 9;
pub const STEP_INTO_LANDING_LINE: u64 = 3;

pub const RECURSION_C: &str = r#"
unsigned long fact(unsigned long n) {
    if (n <= 1) {
        return 1;
    }
    return n * fact(n - 1);
}

int main(void) {
    return (int) fact(6);
}
"#;
pub const RECURSION_CALL_LINE: u64 = 6;

pub const VARS_C: &str = r#"
struct inner { int d; int e; };
struct basic { int a; char *b; struct inner c; };

int main(void) {
    struct basic r;
    r.a = 123;
    r.b = "basic struct";
    r.c.d = 456;
    r.c.e = 789;
    return r.a;
}
"#;
pub const VARS_RETURN_LINE: u64 = 12;

/// Compiles `source` with `cc -g -O0`, caching the binary under
/// `CARGO_TARGET_TMPDIR` for the lifetime of the test run. `extra_flags`
/// lets a caller force a codegen choice the test depends on (e.g.
/// `-fomit-frame-pointer` to exercise CFI-based unwinding deterministically
/// rather than whatever the default happens to be on the host toolchain).
pub fn compile_c_fixture(name: &str, source: &str, extra_flags: &[&str]) -> PathBuf {
    let dir = std::env::var_os("CARGO_TARGET_TMPDIR").map(PathBuf::from).unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&dir).expect("create fixture build dir");
    let src_path = dir.join(format!("{name}.c"));
    let out_path = dir.join(name);
    std::fs::write(&src_path, source).expect("write fixture source");

    let mut cmd = Command::new("cc");
    cmd.arg("-g").arg("-O0").arg("-o").arg(&out_path).arg(&src_path);
    cmd.args(extra_flags);
    let status = cmd.status().expect("invoke `cc`; a C compiler must be on PATH to run the int_test suite");
    assert!(status.success(), "cc failed to build fixture `{name}`");
    out_path
}

/// Hashes the DWARF file name the way `engine::resolve_source_location`
/// does, by loading the binary's debug info independently of the `Engine`
/// under test and reading back the exact `PathBuf` the loader recorded.
pub fn file_hash(bin: &Path, file_substr: &str) -> u64 {
    let target = Target::load(bin).expect("load target for file-hash lookup");
    let file = target
        .compile_units()
        .iter()
        .flat_map(|u| u.files.iter())
        .find(|f| f.to_string_lossy().contains(file_substr))
        .unwrap_or_else(|| panic!("fixture source `{file_substr}` not recorded in DWARF"))
        .clone();
    hash_str(&file.to_string_lossy())
}

pub fn wait_for_symbols_loaded(engine: &Engine) {
    loop {
        match engine.recv_timeout(Duration::from_secs(5)) {
            Some(Response::LoadSymbols { err }) => {
                assert!(err.is_none(), "failed to load symbols: {err:?}");
                return;
            }
            Some(_) => continue,
            None => panic!("timed out waiting for symbols to load"),
        }
    }
}

/// Drains responses until a `StateUpdated` whose fresh snapshot actually
/// has `paused` set, i.e. the subordinate is stopped rather than merely
/// having had some other piece of state change.
pub fn wait_for_stop(engine: &Engine) -> StateSnapshot {
    loop {
        match engine.recv_timeout(Duration::from_secs(5)) {
            Some(Response::StateUpdated) => {
                let snapshot = engine.state();
                if snapshot.paused.is_some() {
                    return snapshot;
                }
            }
            Some(Response::Reset) => panic!("subordinate exited before stopping"),
            Some(_) => continue,
            None => panic!("timed out waiting for a stop"),
        }
    }
}

/// Asserts no further stop arrives within `timeout`, draining (and
/// ignoring) any other response in the meantime.
pub fn expect_no_stop_within(engine: &Engine, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        match engine.recv_timeout(remaining) {
            Some(Response::StateUpdated) => {
                let snapshot = engine.state();
                if snapshot.paused.is_some() {
                    panic!("unexpected stop while none was expected");
                }
            }
            Some(Response::Reset) => panic!("subordinate exited unexpectedly"),
            Some(_) => continue,
            None => return,
        }
    }
}

/// Waits for the next `StateUpdated` and returns a fresh snapshot, for
/// requests (like `update_breakpoint`) that don't stop the subordinate.
pub fn next_state_updated(engine: &Engine) -> StateSnapshot {
    match engine.recv_timeout(Duration::from_secs(5)) {
        Some(Response::StateUpdated) => engine.state(),
        other => panic!("expected StateUpdated, got {other:?}"),
    }
}

pub fn breakpoint_at_line(snapshot: &StateSnapshot, line: u64) -> BreakpointSnapshot {
    snapshot
        .user_visible_breakpoints
        .iter()
        .find(|b| b.source_location.as_ref().map(|p| p.line_number) == Some(line))
        .unwrap_or_else(|| panic!("no breakpoint recorded at line {line}"))
        .clone()
}
