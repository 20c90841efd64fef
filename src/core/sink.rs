//! Output sinks for streamed segments and traces.
//!
//! The remote invoker forwards decoded stream segments to a sink for live
//! display; modules with `return_trace` enabled push rendered results into
//! one as well. The channel-backed implementation is the default; anything
//! implementing [`StreamSink`] can take its place.

use std::sync::Arc;

use tokio::sync::mpsc;

/// Destination for live output: streamed segments, prefixes/suffixes,
/// traced results.
pub trait StreamSink: Send + Sync {
    fn emit(&self, text: &str);
}

/// Sink backed by an unbounded channel; the receiver side drives display.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl StreamSink for ChannelSink {
    fn emit(&self, text: &str) {
        // Receiver gone means nobody is watching; dropping is fine.
        let _ = self.tx.send(text.to_string());
    }
}

/// Sink that drops everything. Used when no display is attached.
pub struct NullSink;

impl StreamSink for NullSink {
    fn emit(&self, _text: &str) {}
}

/// Wrap `text` in ANSI color codes when `color` names a known color tag.
pub fn colored(text: &str, color: Option<&str>) -> String {
    let code = match color {
        Some("red") => "31",
        Some("green") => "32",
        Some("yellow") => "33",
        Some("blue") => "34",
        Some("magenta") => "35",
        Some("cyan") => "36",
        _ => return text.to_string(),
    };
    format!("\x1b[{code}m{text}\x1b[0m")
}
