// Exit codes for CI triage
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_MISMATCH: i32 = 2;
