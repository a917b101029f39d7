//! `bugcore` is the control-plane core of a source-level debugger for native
//! Linux/x86-64 executables.
//!
//! It loads DWARF debug information, launches and traces a child process
//! ("subordinate"), manages breakpoints, drives stepping, and evaluates
//! expressions against live subordinate memory. It has no UI of its own:
//! an embedder drives it through [`engine::Engine`]'s request/response
//! queues and renders the results however it likes.

#[macro_use]
pub mod utils;

pub mod address;
pub mod breakpoint;
pub mod engine;
pub mod error;
pub mod eval;
pub mod process;
pub mod stepping;
pub mod target;

pub use engine::{Engine, EngineConfig};
pub use error::Error;
