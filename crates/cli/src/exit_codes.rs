// Exit code registry - single source of truth for scripting against lforge.

pub const EXIT_SUCCESS: u8 = 0;
/// Unexpected internal error.
pub const EXIT_ERROR: u8 = 1;
/// Bad invocation (clap handles most of these as 2 already).
pub const EXIT_USAGE: u8 = 2;

/// Config failed to parse or validate.
pub const EXIT_INVALID_CONFIG: u8 = 20;
/// A required source table could not be loaded.
pub const EXIT_RUNTIME: u8 = 21;
/// Ledger store could not be acquired; the run aborted.
pub const EXIT_FATAL_STORE: u8 = 22;
/// The run completed but the exception report is non-empty.
pub const EXIT_EXCEPTIONS: u8 = 23;
