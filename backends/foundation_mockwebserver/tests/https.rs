//! HTTPS exchanges through a rustls client.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use foundation_mockwebserver::tls::client_config;
use foundation_mockwebserver::{HeldCertificate, MockResponse, MockServerError, MockWebServer};
use ntest::timeout;
use rustls::pki_types::ServerName;
use tracing_test::traced_test;

fn https_get(server: &MockWebServer, roots: &[&HeldCertificate], path: &str) -> String {
    let config = Arc::new(client_config(roots).unwrap());
    let name = ServerName::try_from(server.host_name()).unwrap();
    let connection = rustls::ClientConnection::new(config, name).unwrap();
    let tcp = TcpStream::connect(server.to_proxy_address().unwrap()).unwrap();
    let mut stream = rustls::StreamOwned::new(connection, tcp);

    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.host_name()
    );
    // Fails during the handshake when the server is not trusted.
    if stream.write_all(request.as_bytes()).and_then(|()| stream.flush()).is_err() {
        return String::new();
    }

    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply);
    String::from_utf8_lossy(&reply).into_owned()
}

#[test]
#[traced_test]
#[timeout(20000)]
fn test_https_round_trip_records_tls_session() {
    let server = MockWebServer::new();
    let certificate = HeldCertificate::builder()
        .add_subject_alternative_name(server.host_name())
        .build()
        .unwrap();
    server.use_https(&certificate).unwrap();
    server.enqueue(MockResponse::new().set_body("abc")).unwrap();

    assert_eq!(server.url("/").unwrap().scheme(), "https");

    let reply = https_get(&server, &[&certificate], "/secure");
    assert!(reply.starts_with("HTTP/1.1 200 OK"));
    assert!(reply.ends_with("abc"));

    let request = server.take_request().unwrap();
    assert_eq!(request.request_url().scheme(), "https");
    let tls = request.tls().expect("request should carry TLS details");
    assert!(tls.protocol_version.starts_with("TLS"));
    assert!(!tls.cipher_suite.is_empty());
    assert_eq!(tls.alpn_protocol.as_deref(), Some("http/1.1"));
}

#[test]
#[traced_test]
#[timeout(20000)]
fn test_https_with_authority_signed_certificate() {
    let server = MockWebServer::new();
    let root = HeldCertificate::builder()
        .common_name("root")
        .certificate_authority(0)
        .build()
        .unwrap();
    let leaf = HeldCertificate::builder()
        .common_name("leaf")
        .serial_number(2)
        .add_subject_alternative_name(server.host_name())
        .signed_by(&root)
        .build()
        .unwrap();

    server.use_https(&leaf).unwrap();
    server.enqueue(MockResponse::new().set_body("signed")).unwrap();

    let reply = https_get(&server, &[&root], "/");
    assert!(reply.ends_with("signed"));
}

#[test]
#[traced_test]
#[timeout(20000)]
fn test_untrusted_certificate_is_rejected() {
    let server = MockWebServer::new();
    let served = HeldCertificate::builder()
        .add_subject_alternative_name(server.host_name())
        .build()
        .unwrap();
    let unrelated = HeldCertificate::builder().build().unwrap();
    server.use_https(&served).unwrap();
    server.enqueue(MockResponse::new()).unwrap();

    let reply = https_get(&server, &[&unrelated], "/");
    assert!(reply.is_empty());
    assert_eq!(server.request_count(), 0);
}

#[test]
#[traced_test]
fn test_https_must_be_chosen_before_start() {
    let server = MockWebServer::new();
    server.start().unwrap();
    let certificate = HeldCertificate::builder().build().unwrap();
    assert!(matches!(
        server.use_https(&certificate),
        Err(MockServerError::TlsAfterStart)
    ));
}
