//! Streaming RPC client for remote module invocation.
//!
//! One POST carries the encoded `(payload, kwargs)` body and the ambient
//! context in headers. The response body is read as a byte stream, split
//! on the segment delimiter across chunk boundaries, and each segment is
//! decoded through the tagged wire framing. In stream mode every decoded
//! segment goes straight to the sink and the last segment is the
//! authoritative result; otherwise segments accumulate. A scope guard
//! brackets the streamed region with the configured prefix/suffix, the
//! suffix emitted even when the body iteration fails mid-way.

use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::context::{InvocationContext, KwArgs};
use crate::core::errors::{ModError, Result};
use crate::core::sink::{colored, NullSink, StreamSink};
use crate::module::node::Payload;
use crate::remote::wire::{
    self, Segment, GLOBAL_PARAMS_HEADER, SEGMENT_DELIMITER, SESSION_ID_HEADER,
};

/// Streaming display configuration: off, or on with optional bracketing
/// text and color tags.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub enabled: bool,
    pub prefix: Option<String>,
    pub prefix_color: Option<String>,
    pub suffix: Option<String>,
    pub suffix_color: Option<String>,
    pub color: Option<String>,
}

impl StreamOptions {
    pub fn off() -> Self {
        Self::default()
    }

    pub fn on() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, text: impl Into<String>, color: Option<&str>) -> Self {
        self.prefix = Some(text.into());
        self.prefix_color = color.map(str::to_string);
        self
    }

    pub fn with_suffix(mut self, text: impl Into<String>, color: Option<&str>) -> Self {
        self.suffix = Some(text.into());
        self.suffix_color = color.map(str::to_string);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Pluggable extraction step applied to the accumulated result.
pub type Extractor = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Pluggable output-formatting step applied after extraction.
pub type OutputFormatter = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Emits the prefix on entry and guarantees the suffix on every exit
/// path, including errors raised while iterating the body.
struct StreamScope {
    sink: Arc<dyn StreamSink>,
    suffix: Option<String>,
}

impl StreamScope {
    fn open(opts: &StreamOptions, sink: &Arc<dyn StreamSink>) -> Self {
        let suffix = if opts.enabled {
            if let Some(prefix) = &opts.prefix {
                sink.emit(&colored(prefix, opts.prefix_color.as_deref()));
            }
            opts.suffix
                .as_ref()
                .map(|s| colored(s, opts.suffix_color.as_deref()))
        } else {
            None
        };
        Self {
            sink: sink.clone(),
            suffix,
        }
    }
}

impl Drop for StreamScope {
    fn drop(&mut self) {
        if let Some(suffix) = self.suffix.take() {
            self.sink.emit(&suffix);
        }
    }
}

/// Performs the RPC call to a remote module and reconstructs its result
/// client-side.
pub struct RemoteInvoker {
    client: reqwest::Client,
    stream: StreamOptions,
    extractor: Option<Extractor>,
    formatter: Option<OutputFormatter>,
    sink: Arc<dyn StreamSink>,
}

impl RemoteInvoker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            stream: StreamOptions::off(),
            extractor: None,
            formatter: None,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_stream(mut self, stream: StreamOptions) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_formatter(mut self, formatter: OutputFormatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream.enabled
    }

    pub fn has_formatter(&self) -> bool {
        self.formatter.is_some()
    }

    /// Send one call to `url` and return its formatted result.
    pub async fn invoke(
        &self,
        url: &str,
        payload: Payload,
        kw: KwArgs,
        ctx: &InvocationContext,
    ) -> Result<Value> {
        let body = wire::encode_request(&(payload, kw))?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(GLOBAL_PARAMS_HEADER, wire::encode_request(&ctx.snapshot())?)
            .header(SESSION_ID_HEADER, ctx.session_id())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Drain the whole body; its text is the error.
            let text = response.text().await.unwrap_or_default();
            warn!(url, status = status.as_u16(), "remote call failed");
            return Err(ModError::remote_call(url, status.as_u16(), text));
        }

        let value = self.read_segmented(response).await?;
        let value = match &self.extractor {
            Some(extract) => extract(value),
            None => value,
        };
        Ok(match &self.formatter {
            Some(format) => format(value),
            None => value,
        })
    }

    /// Consume the streamed body, decoding delimiter-separated segments.
    async fn read_segmented(&self, response: reqwest::Response) -> Result<Value> {
        let _scope = StreamScope::open(&self.stream, &self.sink);
        let mut body = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        let mut acc = Accumulator::new(self.stream.enabled);

        while let Some(chunk) = body.next().await {
            let chunk = chunk?; // scope guard still emits the suffix
            buf.extend_from_slice(&chunk);
            while let Some(pos) = find_delimiter(&buf) {
                let segment: Vec<u8> = buf.drain(..pos).collect();
                buf.drain(..SEGMENT_DELIMITER.len());
                self.absorb(&mut acc, &segment);
            }
        }
        if !buf.is_empty() {
            self.absorb(&mut acc, &buf);
        }
        debug!(segments = acc.count, "remote response decoded");
        Ok(acc.finish())
    }

    fn absorb(&self, acc: &mut Accumulator, raw: &[u8]) {
        let segment = wire::decode_segment(raw);
        if self.stream.enabled {
            self.sink
                .emit(&colored(&segment.display_text(), self.stream.color.as_deref()));
        }
        acc.push(segment);
    }
}

impl Default for RemoteInvoker {
    fn default() -> Self {
        Self::new()
    }
}

/// Running result buffer. Streaming mode keeps only the most recent
/// segment as the authoritative result (earlier ones are side-channel
/// output); otherwise segments accumulate, a lone rich value surviving
/// as-is.
struct Accumulator {
    streaming: bool,
    last: Option<Segment>,
    text: String,
    count: usize,
}

impl Accumulator {
    fn new(streaming: bool) -> Self {
        Self {
            streaming,
            last: None,
            text: String::new(),
            count: 0,
        }
    }

    fn push(&mut self, segment: Segment) {
        self.count += 1;
        if !self.streaming {
            self.text.push_str(&segment.display_text());
        }
        self.last = Some(segment);
    }

    fn finish(self) -> Value {
        if self.streaming {
            return self.last.map(Segment::into_value).unwrap_or(Value::Null);
        }
        match (self.count, self.last) {
            (0, _) => Value::Null,
            (1, Some(segment)) => segment.into_value(),
            _ => Value::String(self.text),
        }
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    let delim = SEGMENT_DELIMITER.as_bytes();
    if buf.len() < delim.len() {
        return None;
    }
    buf.windows(delim.len()).position(|w| w == delim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_delimiter_across_content() {
        let data = format!("abc{SEGMENT_DELIMITER}def");
        assert_eq!(find_delimiter(data.as_bytes()), Some(3));
        assert_eq!(find_delimiter(b"abcdef"), None);
    }

    #[test]
    fn test_accumulator_streaming_last_wins() {
        let mut acc = Accumulator::new(true);
        acc.push(Segment::Text("partial ".into()));
        acc.push(Segment::Text("final".into()));
        assert_eq!(acc.finish(), json!("final"));
    }

    #[test]
    fn test_accumulator_non_streaming_concatenates() {
        let mut acc = Accumulator::new(false);
        acc.push(Segment::Text("a".into()));
        acc.push(Segment::Text("b".into()));
        assert_eq!(acc.finish(), json!("ab"));
    }

    #[test]
    fn test_accumulator_single_rich_value_survives() {
        let mut acc = Accumulator::new(false);
        acc.push(Segment::Object(json!({"k": 1})));
        assert_eq!(acc.finish(), json!({"k": 1}));
    }

    #[test]
    fn test_stream_scope_emits_suffix_on_drop() {
        use crate::core::sink::ChannelSink;
        let (sink, mut rx) = ChannelSink::new();
        let sink: Arc<dyn StreamSink> = sink;
        let opts = StreamOptions::on()
            .with_prefix("A", None)
            .with_suffix("B", None);
        {
            let _scope = StreamScope::open(&opts, &sink);
            sink.emit("body");
            // scope dropped here, as it would be if the body stream errored
        }
        assert_eq!(rx.try_recv().unwrap(), "A");
        assert_eq!(rx.try_recv().unwrap(), "body");
        assert_eq!(rx.try_recv().unwrap(), "B");
    }
}
