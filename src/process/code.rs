//! `siginfo_t.si_code` values the tracer needs to distinguish a breakpoint
//! trap from a single-step trap; the kernel reuses `SIGTRAP` for both.

#![allow(unused)]

/// Sent by the kernel directly rather than by a `raise()` in the tracee.
pub const SI_KERNEL: i32 = 0x80;

// ---------------- SIGTRAP si_codes ------------------------------------

pub const TRAP_BRKPT: i32 = 0x1;
pub const TRAP_TRACE: i32 = 0x2;
pub const TRAP_BRANCH: i32 = 0x3;
pub const TRAP_HWBKPT: i32 = 0x4;
pub const TRAP_UNK: i32 = 0x5;
pub const TRAP_PERF: i32 = 0x6;
