//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 60-69   | audit            | Fidelity audit codes                     |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing config file.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Audit (60-69)
// =============================================================================

/// Config failed to parse or validate: unknown field, malformed key,
/// bad rule expression, dataset without input.
pub const EXIT_AUDIT_INVALID_CONFIG: u8 = 60;

/// Runtime/input failure: unreadable snapshot, missing key column,
/// null or duplicate primary key, unwritable output.
pub const EXIT_AUDIT_RUNTIME: u8 = 61;

/// Defects or primary-key orphans found (only with `--fail-on-defects`).
pub const EXIT_AUDIT_DEFECTS: u8 = 62;
