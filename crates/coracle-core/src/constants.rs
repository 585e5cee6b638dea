//! Limits and defaults for the coracle client runtime
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Request / Response Limits
// =============================================================================

/// Default response timeout for outbound requests in milliseconds (30 sec)
pub const RESPONSE_TIMEOUT_MS_DEFAULT: u64 = 30 * 1000;

/// Response timeout used when a debugger is attached at init (30 min)
///
/// Keeps requests from timing out under a breakpoint.
pub const RESPONSE_TIMEOUT_MS_DEBUG: u64 = 30 * 60 * 1000;

/// Allowance added to message expiration for cross-node clock skew (2 min)
pub const CLOCK_SKEW_ALLOWANCE_MS: u64 = 2 * 60 * 1000;

/// Hard cap on the configurable resend budget per message
pub const MESSAGE_RESEND_COUNT_MAX: u32 = 10;

// =============================================================================
// Gateway Limits
// =============================================================================

/// Timeout for resolving the gateway list at init (10 sec)
pub const GATEWAY_INIT_TIMEOUT_MS: u64 = 10 * 1000;

/// Timeout for fetching the interface type-code map during start (30 sec)
pub const TYPE_MAP_FETCH_TIMEOUT_MS: u64 = 30 * 1000;

// =============================================================================
// Statistics Limits
// =============================================================================

/// Default interval between statistics flushes in milliseconds (1 min)
pub const STATS_FLUSH_INTERVAL_MS_DEFAULT: u64 = 60 * 1000;

/// Timeout for creating the statistics table at init (10 sec)
pub const STATS_TABLE_INIT_TIMEOUT_MS: u64 = 10 * 1000;

/// Maximum rows per bulk insert accepted by table publishers
pub const STATS_BULK_ROWS_COUNT_MAX: usize = 100;

/// Width of the zero-padded sequence segment in statistics row keys
pub const STATS_ROW_SEQUENCE_DIGITS: usize = 6;

// Compile-time assertions for constant validity
const _: () = {
    assert!(RESPONSE_TIMEOUT_MS_DEBUG > RESPONSE_TIMEOUT_MS_DEFAULT);
    assert!(CLOCK_SKEW_ALLOWANCE_MS >= 1000);
    assert!(MESSAGE_RESEND_COUNT_MAX >= 1);
    assert!(STATS_BULK_ROWS_COUNT_MAX > 0);
    assert!(STATS_ROW_SEQUENCE_DIGITS == 6);
};
