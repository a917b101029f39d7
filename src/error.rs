//! The crate's single error currency.
//!
//! Every fallible core operation returns `Result<_, Error>`. `Error::is_fatal`
//! classifies whether an error should abort the operation it occurred in
//! (e.g. a symbol load) while leaving the engine itself usable, matching the
//! taxonomy in the error handling design: parse/object errors are fatal to a
//! load, everything else is recoverable.

use crate::address::GlobalAddress;
use crate::target::DieRef;
use nix::unistd::Pid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors -------------------------------------------
    #[error("engine is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    FromUtf8(#[from] std::string::FromUtf8Error),

    // --------------------------------- entity not found ------------------------------------------
    #[error("no debug information loaded")]
    NoTarget,
    #[error("unknown register {0:?}")]
    RegisterNotFound(gimli::Register),
    #[error("unknown register name {0:?}")]
    RegisterNameNotFound(String),
    #[error("source place not found at address {0}")]
    PlaceNotFound(GlobalAddress),
    #[error("compile unit not found at address {0}")]
    UnitNotFound(GlobalAddress),
    #[error("function not found at address {0}")]
    FunctionNotFound(GlobalAddress),
    #[error("type not found")]
    TypeNotFound,
    #[error("stack frame {0} not found")]
    FrameNotFound(u32),
    #[error("thread {0} not found")]
    ThreadNotFound(Pid),
    #[error("debug information entry not found, reference: {0:?}")]
    DieNotFound(DieRef),
    #[error("section \"{0}\" not found")]
    SectionNotFound(&'static str),
    #[error("breakpoint {0} not found")]
    BreakpointNotFound(u32),
    #[error("no breakpoint installed at address {0}")]
    NoBreakpointAtAddress(GlobalAddress),

    // --------------------------------- remote memory errors --------------------------------------
    #[error("unknown address {0}")]
    UnknownAddress(GlobalAddress),
    #[error("load offset not found for pc {0}")]
    LoadOffsetNotFound(crate::address::RelocatedAddress),

    // --------------------------------- syscall errors ----------------------------------------------
    #[error("waitpid syscall error: {0}")]
    Waitpid(nix::Error),
    #[error("ptrace syscall error: {0}")]
    Ptrace(nix::Error),
    #[error("{0} syscall error: {1}")]
    Syscall(&'static str, nix::Error),

    // --------------------------------- parsing errors ----------------------------------------------
    #[error("dwarf parsing error: {0}")]
    DwarfParsing(#[from] gimli::Error),
    #[error("object file parsing error: {0}")]
    ObjParsing(#[from] object::Error),
    #[error("unsupported dwarf version {0}")]
    UnsupportedDwarfVersion(u16),
    #[error(transparent)]
    VariableParsing(#[from] crate::eval::ParsingError),
    #[error("language {0:?} is unsupported for expression evaluation")]
    LanguageUnsupported(gimli::DwLang),

    // --------------------------------- unwind errors -------------------------------------------------
    #[error("unwind: no unwind context")]
    UnwindNoContext,
    #[error("unwind: no unwind info for address {0}")]
    NoUnwindInfoForAddress(GlobalAddress),
    #[error("unwind: frame depth exceeds supported bound")]
    UnwindTooDeepFrame,

    // --------------------------------- dwarf evaluation errors ---------------------------------------
    #[error("dwarf expression evaluation requires `{0}`")]
    EvalOptionRequired(&'static str),
    #[error("no frame base address")]
    NoFrameBaseAddress,
    #[error("frame base address attribute is not an expression")]
    FrameBaseNotAnExpression,
    #[error("function `{0:?}` has no known address ranges")]
    NoFunctionRanges(Option<String>),

    // --------------------------------- process errors -------------------------------------------------
    #[error("subordinate process exited with code {0}")]
    ProcessExit(i32),
    #[error("subordinate is not running")]
    ProcessNotStarted,
    #[error("subordinate is already running")]
    AlreadyRunning,
    #[error("subordinate is not paused")]
    NotPaused,
    #[error("no memory mapping found for subordinate {0}'s own executable")]
    LoadAddressNotFound(Pid),
}

impl Error {
    /// Returns a hint to the control thread: abort just the current
    /// operation (`false`) or treat the target/engine state as unusable
    /// until explicit recovery (`true`).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DwarfParsing(_)
                | Error::ObjParsing(_)
                | Error::UnsupportedDwarfVersion(_)
                | Error::Syscall(_, _)
        )
    }
}
