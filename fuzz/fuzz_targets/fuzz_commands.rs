//! Fuzz target: `AppCommand::parse`
//!
//! Any client-written payload must parse or be rejected without panicking,
//! and a parsed range command always names a supported range.
//!
//! cargo fuzz run fuzz_commands

#![no_main]

use libfuzzer_sys::fuzz_target;
use wearlink::app::commands::AppCommand;
use wearlink::sensors::AccelRange;

fuzz_target!(|data: &[u8]| {
    if let Ok(AppCommand::SetRange(range)) = AppCommand::parse(data) {
        assert_eq!(AccelRange::from_g(range.g()), Some(range));
    }
});
