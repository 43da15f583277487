//! HTTP-level tests for the Gemini client against a local one-shot server.
//!
//! Each test binds `127.0.0.1:0`, serves a canned response to the first
//! connection, and records the raw request so the wire format can be checked.

use edgequake_invoice2xlsx::{ErrorKind, ExtractionConfig, GeminiClient, InvoiceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Canned {
    status: u16,
    reason: &'static str,
    body: String,
}

fn gemini_ok(inner: &str) -> Canned {
    Canned {
        status: 200,
        reason: "OK",
        body: serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": inner}], "role": "model"}}]
        })
        .to_string(),
    }
}

/// Read one HTTP request (headers + Content-Length body) from the socket.
async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = sock.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|l| {
                    let (k, v) = l.split_once(':')?;
                    k.eq_ignore_ascii_case("content-length")
                        .then(|| v.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve `responses` to consecutive connections; returns the base URL, the
/// captured first request and a connection counter.
async fn serve(responses: Vec<Canned>) -> (String, oneshot::Receiver<String>, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        let mut tx = Some(tx);
        for canned in responses {
            let (mut sock, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let request = read_request(&mut sock).await;
            if let Some(tx) = tx.take() {
                let _ = tx.send(request);
            }
            let reply = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                canned.status,
                canned.reason,
                canned.body.len(),
                canned.body
            );
            sock.write_all(reply.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
        }
    });

    (format!("http://{addr}"), rx, hits)
}

fn client(base_url: &str, max_retries: u32) -> GeminiClient {
    let config = ExtractionConfig::builder()
        .base_url(base_url)
        .model("gemini-test")
        .max_retries(max_retries)
        .retry_backoff_ms(1)
        .api_timeout_secs(5)
        .build()
        .unwrap();
    GeminiClient::from_config(&config).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_carries_key_model_and_json_mode() {
    let (url, request, _) = serve(vec![gemini_ok(r#"{"lineItems": []}"#)]).await;

    let invoice = client(&url, 0).submit("PROMPT TEXT", "test-key").await.unwrap();
    assert!(invoice.line_items().is_empty());

    let raw = request.await.unwrap();
    let request_line = raw.lines().next().unwrap();
    assert!(
        request_line.starts_with("POST /v1beta/models/gemini-test:generateContent?key=test-key "),
        "unexpected request line: {request_line}"
    );

    let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["contents"][0]["parts"][0]["text"], "PROMPT TEXT");
    assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
}

#[tokio::test]
async fn http_error_is_connectivity_with_upstream_message() {
    let (url, _, _) = serve(vec![Canned {
        status: 403,
        reason: "Forbidden",
        body: r#"{"error": {"code": 403, "message": "Permission denied on resource project."}}"#
            .to_string(),
    }])
    .await;

    let err = client(&url, 0).submit("p", "k").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
    match err {
        InvoiceError::Connectivity { status, message } => {
            assert_eq!(status, Some(403));
            assert_eq!(message, "Permission denied on resource project.");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn garbage_model_output_is_parse_error() {
    let (url, _, _) = serve(vec![gemini_ok("I could not find an invoice here.")]).await;
    let err = client(&url, 0).submit("p", "k").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResponseParse);
}

#[tokio::test]
async fn refused_connection_is_connectivity_without_status() {
    // Nothing listens on port 1.
    let err = client("http://127.0.0.1:1", 0)
        .submit("p", "secret-key")
        .await
        .unwrap_err();
    match &err {
        InvoiceError::Connectivity { status, message } => {
            assert!(status.is_none());
            assert!(message.starts_with("Failed to connect to Gemini API."));
            assert!(!message.contains("secret-key"), "key leaked: {message}");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn missing_key_makes_no_connection() {
    let (url, _, hits) = serve(vec![gemini_ok("{}")]).await;
    let err = client(&url, 3).submit("p", "").await.unwrap_err();
    assert!(matches!(err, InvoiceError::MissingCredential));
    tokio::task::yield_now().await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_status_is_retried_when_enabled() {
    let (url, _, hits) = serve(vec![
        Canned {
            status: 503,
            reason: "Service Unavailable",
            body: r#"{"error": {"message": "The model is overloaded."}}"#.to_string(),
        },
        gemini_ok(r#"{"summary": {"narration": "second try"}}"#),
    ])
    .await;

    let invoice = client(&url, 2).submit("p", "k").await.unwrap();
    assert_eq!(invoice.group("summary").unwrap()["narration"], "second try");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (url, _, hits) = serve(vec![
        Canned {
            status: 400,
            reason: "Bad Request",
            body: r#"{"error": {"message": "API key not valid."}}"#.to_string(),
        },
        gemini_ok("{}"),
    ])
    .await;

    let err = client(&url, 3).submit("p", "bad").await.unwrap_err();
    assert!(matches!(err, InvoiceError::Connectivity { status: Some(400), .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
