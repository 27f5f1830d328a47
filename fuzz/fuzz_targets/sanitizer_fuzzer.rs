//! Fuzz target for content and display-name sanitization
//!
//! Every chat line and every name shown in the room passes through the
//! sanitizer, and remote peers control both. Nothing they send may reach the
//! log in a form that renders as markup.
//!
//! # Strategy
//!
//! - Raw content: arbitrary strings, including entity soup and long runs
//! - Raw payloads: arbitrary bytes fed through the inbound chat path
//! - Names: arbitrary strings with a fuzzed length bound
//!
//! # Invariants
//!
//! - Accepted content never contains `<`, `>`, `"` or `'`
//! - Every `&` in accepted content starts one of the five produced entities
//! - Sanitizing accepted content again yields the same content
//! - Names are never empty and never contain `< > & " '`
//! - The chat log never exceeds its retention bound
//! - NEVER panic on any input

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use oche_core::{
    sanitize::{sanitize_content, sanitize_name_with, sanitize_payload, MAX_CONTENT_CHARS},
    ChatConfig, ChatLog, DataSender,
};

const ENTITIES: [&str; 5] = ["&amp;", "&lt;", "&gt;", "&quot;", "&#39;"];

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    content: String,
    payload: Vec<u8>,
    name: String,
    name_bound: u8,
    retention: u8,
}

fn assert_safe(content: &str) {
    assert!(!content.contains(['<', '>', '"', '\'']), "markup survived: {content:?}");
    for (at, _) in content.match_indices('&') {
        let rest = &content[at..];
        assert!(
            ENTITIES.iter().any(|e| rest.starts_with(e)),
            "bare ampersand at {at} in {content:?}"
        );
    }
}

fuzz_target!(|input: FuzzInput| {
    if let Ok(first) = sanitize_content(&input.content) {
        assert_safe(&first.content);
        let second = sanitize_content(&first.content).expect("accepted content stays accepted");
        assert_eq!(second.content, first.content, "sanitization is not idempotent");
    }

    if let Ok(inbound) = sanitize_payload(&input.payload, MAX_CONTENT_CHARS) {
        assert_safe(&inbound.content);
    }

    let bound = usize::from(input.name_bound).max(1);
    let name = sanitize_name_with(&input.name, bound);
    assert!(!name.is_empty());
    assert!(!name.contains(['<', '>', '&', '"', '\'']), "name kept markup: {name:?}");

    let retention = usize::from(input.retention).max(1);
    let mut log = ChatLog::new(ChatConfig { retention, ..ChatConfig::default() });
    let sender = DataSender { identity: format!("ft-{}", input.name), name: Some(input.name.clone()) };
    for _ in 0..retention + 2 {
        let _ = log.receive(&input.payload, &sender, Some("ft-local"), 0);
        let _ = log.compose_local(&input.content, &input.name, "ft-local", 0);
    }
    assert!(log.len() <= retention);
    for message in log.messages() {
        assert_safe(&message.content);
    }
});
