//! Fuzz target for protocol line parsing.
//!
//! The parser is infallible by contract: any input must produce a
//! structured message (degrading to an Unknown command), never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::str;

fuzz_target!(|data: &[u8]| {
    // Only fuzz valid UTF-8 to focus on protocol-level issues.
    if let Ok(input) = str::from_utf8(data) {
        // Tag sections can legitimately run long, but lines beyond the
        // 8 KiB range are not representative traffic.
        if input.is_empty() || input.len() > 8192 {
            return;
        }

        let msg = tmi_proto::Message::parse(input);

        // Projections must hold on whatever came out.
        let _ = msg.channel();
        let _ = msg.trailing();
        let _ = msg.user();

        // Serialization of a parsed message must not panic either.
        let _ = msg.to_string();
    }
});
