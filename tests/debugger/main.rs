//! End-to-end coverage against real compiled subordinates, gated behind the
//! `int_test` feature so a plain `cargo test` stays hermetic (no `cc`
//! invocation, no ptrace). Run with `cargo test --features int_test`.
#![cfg(feature = "int_test")]

mod common;

mod breakpoints;
mod recursion;
mod steps;
mod variables;
