//! Minimal HTTP/1.1 test server for black-box fixture tests. Not a
//! general-purpose mock: each accepted connection is answered either from a
//! fixed canned-response list, or by handing the parsed request to a
//! caller-supplied closure.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder, X509};

pub struct CapturedRequest {
    pub header_text: String,
    pub body: Vec<u8>,
}

pub struct DynamicResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl DynamicResponse {
    pub fn plain(status: u16, body: impl Into<String>) -> Self {
        DynamicResponse { status, headers: Vec::new(), body: body.into() }
    }
}

pub fn spawn_http_server(responses: Vec<(u16, &'static str)>) -> String {
    let (addr, _requests) = spawn_http_server_capturing(responses);
    addr
}

/// Same canned-response server, but also hands back every request it read
/// off the wire so a test can assert on the exact bytes that were sent.
pub fn spawn_http_server_capturing(
    responses: Vec<(u16, &'static str)>,
) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let requests_for_handler = Arc::clone(&requests);
    let counter = Arc::new(AtomicUsize::new(0));
    let addr = spawn_http_server_dynamic(move |request| {
        let index = counter.fetch_add(1, Ordering::SeqCst);
        let (status, body) = responses
            .get(index)
            .copied()
            .or_else(|| responses.last().copied())
            .unwrap_or((200, ""));
        requests_for_handler.lock().unwrap().push(CapturedRequest {
            header_text: request.header_text.clone(),
            body: request.body.clone(),
        });
        DynamicResponse::plain(status, body)
    });
    (addr, requests)
}

/// Serve one `DynamicResponse` per accepted connection, computed by
/// `handler` from the parsed request. Lets a test assemble a response (e.g.
/// a signed MDN) whose content depends on what was actually sent.
pub fn spawn_http_server_dynamic<F>(handler: F) -> String
where
    F: Fn(&CapturedRequest) -> DynamicResponse + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let addr = listener.local_addr().expect("read local addr");

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(s) => s,
                Err(_) => break,
            };
            let request = read_request(&mut stream);
            let resp = handler(&request);

            let mut response = format!(
                "HTTP/1.1 {status} {reason}\r\n",
                status = resp.status,
                reason = reason_phrase(resp.status),
            );
            for (name, value) in &resp.headers {
                response.push_str(name);
                response.push_str(": ");
                response.push_str(value);
                response.push_str("\r\n");
            }
            response.push_str(&format!("Content-Length: {}\r\n", resp.body.len()));
            response.push_str("Connection: close\r\n\r\n");
            response.push_str(&resp.body);

            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
    });

    addr.to_string()
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

fn read_request(stream: &mut std::net::TcpStream) -> CapturedRequest {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut header_end = None;
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                data.extend_from_slice(&chunk[..n]);
                if header_end.is_none() {
                    header_end = find_double_crlf(&data);
                }
                if let Some(end) = header_end {
                    let header_text = String::from_utf8_lossy(&data[..end]);
                    let content_length: usize = header_text
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().to_string())
                        })
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    let body_so_far = data.len() - (end + 4);
                    if body_so_far >= content_length {
                        break;
                    }
                }
            }
            Err(_) => break,
        }
    }
    match header_end {
        Some(end) => CapturedRequest {
            header_text: String::from_utf8_lossy(&data[..end]).into_owned(),
            body: data[end + 4..].to_vec(),
        },
        None => CapturedRequest { header_text: String::new(), body: data },
    }
}

fn find_double_crlf(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// A throwaway self-signed certificate + PEM private key, for fixtures that
/// need real `X509`/`PKey` values to satisfy `CertificateProvider` without
/// exercising actual signature math (that's the fake `CryptoProvider`'s job).
pub fn self_signed_cert() -> (X509, Vec<u8>) {
    let rsa = Rsa::generate(2048).expect("generate rsa key");
    let pkey = PKey::from_rsa(rsa).expect("wrap rsa key");
    let key_pem = pkey.private_key_to_pem_pkcs8().expect("serialize key to pem");

    let mut name_builder = X509NameBuilder::new().expect("name builder");
    name_builder.append_entry_by_text("CN", "test").expect("set CN");
    let name = name_builder.build();

    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("set version");
    let serial = BigNum::from_u32(1).and_then(|bn| bn.to_asn1_integer()).expect("serial");
    builder.set_serial_number(&serial).expect("set serial");
    builder.set_subject_name(&name).expect("set subject");
    builder.set_issuer_name(&name).expect("set issuer");
    builder.set_pubkey(&pkey).expect("set pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("not_before"))
        .expect("set not_before");
    builder
        .set_not_after(&Asn1Time::days_from_now(365).expect("not_after"))
        .expect("set not_after");
    builder.sign(&pkey, MessageDigest::sha256()).expect("self-sign");

    (builder.build(), key_pem)
}
