//! Fixed-marker recognizer for terminating tools.
//!
//! Certain tools conventionally end a run: asking the user a
//! question, marking the task complete, handing the browser over.
//! Not every tool-calling path reliably emits the structured
//! termination metadata, so assistant text is scanned for their
//! closing tags as a redundant detection channel.
//!
//! The scan answers exactly one question, "is one of these markers
//! present in this text", and does no markup parsing. It runs per
//! arriving chunk; a marker whose characters are split exactly across
//! a chunk boundary is not detected by this channel (the metadata
//! flag is the one that covers that case).

/// Closing markers of the terminating tools, checked in this order.
const SENTINEL_MARKERS: &[(&str, &str)] = &[
    ("</ask>", "ask"),
    ("</complete>", "complete"),
    ("</web-browser-takeover>", "web-browser-takeover"),
];

/// Return the name of the first terminating tool whose closing marker
/// appears in `text`.
pub fn detect_sentinel(text: &str) -> Option<&'static str> {
    SENTINEL_MARKERS
        .iter()
        .find(|(marker, _)| text.contains(marker))
        .map(|(_, name)| *name)
}

/// Whether a tool name is one of the terminating sentinels.
pub fn is_sentinel_tool(name: &str) -> bool {
    SENTINEL_MARKERS.iter().any(|(_, sentinel)| *sentinel == name)
}
