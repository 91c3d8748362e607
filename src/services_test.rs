use super::*;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve one HTTP response and hand back the raw request text.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut raw = Vec::new();
        let mut buf = [0_u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.expect("read");
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if raw.len() >= head_end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.expect("write");
        String::from_utf8_lossy(&raw).to_string()
    });
    (base, task)
}

fn request() -> TicketRequest {
    TicketRequest {
        user_id: "visitor-1".into(),
        category: DEFAULT_TICKET_CATEGORY.into(),
        attachments: Vec::new(),
        description: "Billing issue".into(),
        first_name: "Ana".into(),
        last_name: "Lee".into(),
        email: "ana@x.com".into(),
        is_guest: true,
    }
}

#[test]
fn ticket_request_serializes_camel_case() {
    let value = serde_json::to_value(request()).expect("serialize");
    assert_eq!(
        value,
        json!({
            "userId": "visitor-1",
            "category": "support",
            "attachments": [],
            "description": "Billing issue",
            "firstName": "Ana",
            "lastName": "Lee",
            "email": "ana@x.com",
            "isGuest": true,
        })
    );
}

#[test]
fn ticket_response_reads_data_envelope() {
    let info = parse_ticket_response(&json!({ "data": { "id": "T1", "organizationId": "O1" } })).expect("parse");
    assert_eq!(info, TicketInfo::new("T1", Some("O1".into())));

    let info = parse_ticket_response(&json!({ "data": { "id": 42 } })).expect("parse");
    assert_eq!(info.id.as_deref(), Some("42"));
    assert_eq!(info.organization_id, None);
}

#[test]
fn ticket_response_without_id_is_an_error() {
    assert!(matches!(parse_ticket_response(&json!({ "data": {} })), Err(ServiceError::MissingTicketId)));
    assert!(matches!(parse_ticket_response(&json!({ "data": { "id": "" } })), Err(ServiceError::MissingTicketId)));
}

#[test]
fn config_response_accepts_bare_or_wrapped_documents() {
    let bare = parse_config_response(json!({ "name": "Acme", "brandColor": { "primaryColor": "#111" } })).expect("bare");
    assert_eq!(bare.display_name(), "Acme");
    assert_eq!(bare.primary_color(), "#111");

    let wrapped = parse_config_response(json!({ "data": { "openingMessage": "Hello!" } })).expect("wrapped");
    assert_eq!(wrapped.opening_message(), "Hello!");

    assert_eq!(parse_config_response(Value::Null).expect("null"), WidgetConfig::default());
}

#[tokio::test]
async fn fetch_config_sends_api_key_and_accept_headers() {
    let (base, server) = serve_once("200 OK", r#"{"name":"Acme Support"}"#).await;
    let backend = HttpBackend::new(&format!("{base}/"), "token-1", None).expect("backend");

    let config = backend.fetch_config().await.expect("config");
    assert_eq!(config.display_name(), "Acme Support");

    let raw = server.await.expect("server").to_ascii_lowercase();
    assert!(raw.starts_with("get /integrations/chat-widgets "), "{raw}");
    assert!(raw.contains("apikey: token-1"), "{raw}");
    assert!(raw.contains("accept: application/json"), "{raw}");
}

#[tokio::test]
async fn create_ticket_posts_request_body() {
    let (base, server) = serve_once("201 Created", r#"{"data":{"id":"T1","organizationId":"O1"}}"#).await;
    let backend = HttpBackend::new(&base, "token-1", Some(Duration::from_secs(5))).expect("backend");

    let info = backend.create_ticket(&request()).await.expect("ticket");
    assert_eq!(info, TicketInfo::new("T1", Some("O1".into())));

    let raw = server.await.expect("server");
    assert!(raw.starts_with("POST /integrations/tickets "), "{raw}");
    assert!(raw.contains(r#""description":"Billing issue""#), "{raw}");
    assert!(raw.contains(r#""isGuest":true"#), "{raw}");
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let (base, server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
    let backend = HttpBackend::new(&base, "token-1", None).expect("backend");

    match backend.create_ticket(&request()).await {
        Err(ServiceError::Status { endpoint, status, body }) => {
            assert_eq!(endpoint, TICKETS_PATH);
            assert_eq!(status, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
    server.await.expect("server");
}
