//! The HTTP backend against a scripted local server.
//!
//! Each stub connection serves exactly one request and closes, so the server
//! thread can hand back what it saw once the client is done.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use workspace_courier::config::RemoteConfig;
use workspace_courier::remote::http::HttpContainerService;
use workspace_courier::{CourierError, RemoteContainer, RemoteErrorKind, WorkspaceCredentials};

#[derive(Debug)]
struct SeenRequest {
    method: String,
    target: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

fn read_request(stream: &TcpStream) -> SeenRequest {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap().to_string();
    let target = parts.next().unwrap().to_string();

    let mut headers = HashMap::new();
    loop {
        line.clear();
        reader.read_line(&mut line).unwrap();
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let len = headers
        .get("content-length")
        .map_or(0, |v| v.parse::<usize>().unwrap());
    let mut body = vec![0; len];
    reader.read_exact(&mut body).unwrap();
    SeenRequest {
        method,
        target,
        headers,
        body,
    }
}

fn response(status: &str, extra_headers: &[(&str, &str)]) -> String {
    let mut text = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in extra_headers {
        text.push_str(&format!("{name}: {value}\r\n"));
    }
    text.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
    text
}

/// Serve `responses` in order, one connection each.
fn serve(listener: TcpListener, responses: Vec<String>) -> JoinHandle<Vec<SeenRequest>> {
    thread::spawn(move || {
        responses
            .into_iter()
            .map(|reply| {
                let (mut stream, _) = listener.accept().unwrap();
                let seen = read_request(&stream);
                stream.write_all(reply.as_bytes()).unwrap();
                stream.flush().unwrap();
                seen
            })
            .collect()
    })
}

fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn service(addr: SocketAddr) -> HttpContainerService {
    // Loopback requests must not be routed through a proxy from the environment.
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let config = RemoteConfig {
        base_url: format!("http://{addr}/v1"),
        timeout_secs: 5,
        ..RemoteConfig::default()
    };
    HttpContainerService::new(&config, &WorkspaceCredentials::new("wk-1", "sub-1", "alice"))
        .unwrap()
}

#[test]
fn test_create_put_commit_round() {
    let (listener, addr) = bind();
    let location = format!("http://{addr}/blobs/c-42?sv=2024&sig=abc");
    let server = serve(
        listener,
        vec![
            response("201 Created", &[("Location", location.as_str())]),
            response("201 Created", &[]),
            response("200 OK", &[]),
        ],
    );

    let remote = service(addr);
    let handle = remote.create_container("W1", "t1 W1").unwrap();
    assert_eq!(handle.location(), location);
    assert_eq!(handle.workspace(), "W1");
    assert_eq!(handle.id(), "c-42");

    remote.put_blob(&handle, "a.txt", b"payload").unwrap();
    remote.commit_container(&handle).unwrap();

    let seen = server.join().unwrap();
    assert_eq!(seen.len(), 3);

    let create = &seen[0];
    assert_eq!(create.method, "POST");
    assert_eq!(create.target, "/v1/api/workspace/W1/files/containers?title=t1+W1");
    assert_eq!(create.headers["api-key"], "wk-1");
    assert_eq!(create.headers["ocp-apim-subscription-key"], "sub-1");

    let put = &seen[1];
    assert_eq!(put.method, "PUT");
    assert_eq!(put.target, "/blobs/c-42/a.txt?sv=2024&sig=abc");
    assert_eq!(put.headers["x-ms-blob-type"], "BlockBlob");
    assert_eq!(put.body, b"payload");
    // The pre-signed URL carries authorisation; gateway keys stay off it.
    assert!(!put.headers.contains_key("api-key"));

    let commit = &seen[2];
    assert_eq!(commit.method, "PATCH");
    assert_eq!(commit.target, "/v1/api/workspace/W1/files/containers/c-42");
    assert_eq!(commit.headers["api-key"], "wk-1");
    assert_eq!(commit.headers["ocp-apim-subscription-key"], "sub-1");
}

#[test]
fn test_missing_location_is_protocol_error() {
    let (listener, addr) = bind();
    let server = serve(listener, vec![response("201 Created", &[])]);

    let err = service(addr).create_container("W1", "t1 W1").unwrap_err();
    assert_eq!(err.kind(), RemoteErrorKind::Protocol);
    server.join().unwrap();
}

#[test]
fn test_status_codes_map_to_error_kinds() {
    let (listener, addr) = bind();
    let location = format!("http://{addr}/blobs/c-7");
    let server = serve(
        listener,
        vec![
            response("201 Created", &[("Location", location.as_str())]),
            response("503 Service Unavailable", &[]),
            response("403 Forbidden", &[]),
        ],
    );

    let remote = service(addr);
    let handle = remote.create_container("W1", "t").unwrap();
    let busy = remote.put_blob(&handle, "a.txt", b"x").unwrap_err();
    assert_eq!(busy.kind(), RemoteErrorKind::Transient);
    let denied = remote.commit_container(&handle).unwrap_err();
    assert_eq!(denied.kind(), RemoteErrorKind::Rejected);
    server.join().unwrap();
}

#[test]
fn test_unusable_settings_rejected() {
    let creds = WorkspaceCredentials::new("wk-1", "sub-1", "alice");
    for config in [
        RemoteConfig {
            base_url: "not a url".into(),
            ..RemoteConfig::default()
        },
        RemoteConfig {
            timeout_secs: 0,
            ..RemoteConfig::default()
        },
    ] {
        assert!(matches!(
            HttpContainerService::new(&config, &creds),
            Err(CourierError::Config(_))
        ));
    }
}
