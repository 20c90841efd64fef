//! Remote invocation tests against canned HTTP/1.1 responses.

use std::sync::Arc;

use async_trait::async_trait;
use modflow::remote::wire;
use modflow::{
    ChannelSink, CoordinationStore, InvocationContext, KwArgs, Launcher, LauncherStatus,
    MemoryStore, ModError, Module, ModuleNode, Payload, PhaseRunner, RemoteInvoker, ServerModule,
    StreamOptions, StreamSink,
};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Duration;

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read one full HTTP request (headers plus Content-Length body).
async fn read_request(sock: &mut tokio::net::TcpStream) {
    let mut data = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = sock.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        data.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subslice(&data, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..pos]).to_lowercase();
            let need = head
                .split("content-length:")
                .nth(1)
                .and_then(|rest| rest.split("\r\n").next())
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= pos + 4 + need {
                return;
            }
        }
    }
}

/// Serve each canned response to one connection, in order, then stop.
async fn serve_responses(responses: Vec<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            read_request(&mut sock).await;
            let _ = sock.write_all(&response).await;
            let _ = sock.shutdown().await;
        }
    });
    format!("http://{addr}/generate")
}

fn http_response(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Advertise more bytes than are sent, so the client's body stream fails
/// mid-iteration.
fn http_truncated(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len() + 64
    )
    .into_bytes()
}

#[tokio::test]
async fn test_invoke_decodes_object_segment() {
    let body = wire::encode_segment(&json!({"answer": 42})).unwrap();
    let url = serve_responses(vec![http_response("200 OK", &body)]).await;

    let invoker = RemoteInvoker::new();
    let ctx = InvocationContext::new();
    let result = invoker
        .invoke(&url, Payload::from("q"), KwArgs::new(), &ctx)
        .await
        .unwrap();
    assert_eq!(result, json!({"answer": 42}));
}

#[tokio::test]
async fn test_non_streaming_concatenates_text_segments() {
    let body = format!("Hello{}World", wire::SEGMENT_DELIMITER);
    let url = serve_responses(vec![http_response("200 OK", &body)]).await;

    let invoker = RemoteInvoker::new();
    let result = invoker
        .invoke(&url, Payload::None, KwArgs::new(), &InvocationContext::new())
        .await
        .unwrap();
    assert_eq!(result, json!("HelloWorld"));
}

#[tokio::test]
async fn test_streaming_emits_segments_and_brackets() {
    let body = format!("Hello{}World", wire::SEGMENT_DELIMITER);
    let url = serve_responses(vec![http_response("200 OK", &body)]).await;

    let (sink, mut rx) = ChannelSink::new();
    let invoker = RemoteInvoker::new()
        .with_stream(
            StreamOptions::on()
                .with_prefix("A", None)
                .with_suffix("B", None),
        )
        .with_sink(sink as Arc<dyn StreamSink>);

    let result = invoker
        .invoke(&url, Payload::None, KwArgs::new(), &InvocationContext::new())
        .await
        .unwrap();
    // streaming keeps only the most recent segment as the result
    assert_eq!(result, json!("World"));

    let mut seen = Vec::new();
    while let Ok(text) = rx.try_recv() {
        seen.push(text);
    }
    assert_eq!(seen, vec!["A", "Hello", "World", "B"]);
}

#[tokio::test]
async fn test_streaming_suffix_survives_body_failure() {
    let url = serve_responses(vec![http_truncated("partial")]).await;

    let (sink, mut rx) = ChannelSink::new();
    let invoker = RemoteInvoker::new()
        .with_stream(
            StreamOptions::on()
                .with_prefix("A", None)
                .with_suffix("B", None),
        )
        .with_sink(sink as Arc<dyn StreamSink>);

    let err = invoker
        .invoke(&url, Payload::None, KwArgs::new(), &InvocationContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ModError::Transport(_)));

    let mut seen = Vec::new();
    while let Ok(text) = rx.try_recv() {
        seen.push(text);
    }
    assert_eq!(seen.first().map(String::as_str), Some("A"));
    assert_eq!(seen.last().map(String::as_str), Some("B"));
}

#[tokio::test]
async fn test_non_success_status_carries_body_text() {
    let url = serve_responses(vec![http_response("500 Internal Server Error", "boom")]).await;

    let invoker = RemoteInvoker::new();
    let err = invoker
        .invoke(&url, Payload::None, KwArgs::new(), &InvocationContext::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert!(matches!(err, ModError::RemoteCall { status: 500, .. }));
}

#[tokio::test]
async fn test_extractor_and_formatter_postprocess() {
    let body = wire::encode_segment(&json!({"text": "raw"})).unwrap();
    let url = serve_responses(vec![http_response("200 OK", &body)]).await;

    let invoker = RemoteInvoker::new()
        .with_extractor(Arc::new(|v: Value| v["text"].clone()))
        .with_formatter(Arc::new(|v: Value| {
            json!(format!("[{}]", v.as_str().unwrap_or_default()))
        }));
    let result = invoker
        .invoke(&url, Payload::None, KwArgs::new(), &InvocationContext::new())
        .await
        .unwrap();
    assert_eq!(result, json!("[raw]"));
}

struct Idle {
    node: ModuleNode,
}

#[async_trait]
impl Module for Idle {
    fn node(&self) -> &ModuleNode {
        &self.node
    }

    async fn forward(
        &self,
        _payload: Payload,
        _kw: KwArgs,
        _ctx: &InvocationContext,
    ) -> modflow::Result<Value> {
        Ok(json!(null))
    }
}

/// Launcher that brings up a canned-response server on a free port.
struct CannedLauncher {
    responses: std::sync::Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl Launcher for CannedLauncher {
    async fn launch(&self) -> modflow::Result<String> {
        let responses = std::mem::take(&mut *self.responses.lock().unwrap());
        Ok(serve_responses(responses).await)
    }

    async fn cleanup(&self) -> modflow::Result<()> {
        Ok(())
    }

    async fn wait(&self) -> modflow::Result<()> {
        Ok(())
    }

    fn status(&self) -> LauncherStatus {
        LauncherStatus::Running
    }
}

#[tokio::test]
async fn test_deploy_then_invoke_through_published_endpoint() {
    let body = wire::encode_segment(&json!("pong")).unwrap();
    let launcher = Arc::new(CannedLauncher {
        responses: std::sync::Mutex::new(vec![http_response("200 OK", &body)]),
    });

    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let inner: Arc<dyn Module> = Arc::new(Idle {
        node: ModuleNode::new(),
    });
    let server: Arc<dyn Module> = Arc::new(
        ServerModule::new(inner, launcher)
            .with_store(store.clone())
            .with_poll_delay(Duration::from_millis(5)),
    );

    // fire-and-forget deploy; the call below blocks on endpoint discovery
    let runner = PhaseRunner::with_store(store);
    runner.start(&server).await.unwrap();

    let ctx = InvocationContext::new();
    let result = server
        .call(Payload::from("ping"), KwArgs::new(), &ctx)
        .await
        .unwrap();
    assert_eq!(result, json!("pong"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_invocation_failure_wraps_transport_error() {
    // bind then immediately drop, leaving a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server: Arc<dyn Module> =
        Arc::new(ServerModule::from_url(&format!("http://{addr}/generate")).unwrap());
    let err = server
        .call(Payload::from("ping"), KwArgs::new(), &InvocationContext::new())
        .await
        .unwrap_err();

    let text = err.to_string();
    assert!(matches!(err, ModError::Invocation { .. }));
    assert!(text.contains("ServerModule"));
    assert!(text.contains("ping"));
}
