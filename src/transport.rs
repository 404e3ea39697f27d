//! `HttpTransport`: establish the HTTP(S) connection, stream the request,
//! read back the response.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use crate::dumper::Dumper;
use crate::error::As2Error;

/// Connect/read timeouts and TLS behavior. Defaults to 60s timeouts, and —
/// deliberately, because AS2 peer authentication happens at the S/MIME
/// layer, not TLS — trust-all server certificates and hostnames.
/// Production deployments that want real TLS peer validation (e.g.
/// because the partner also requires it) should flip both flags; the
/// override exists for exactly that reason.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub proxy: Option<String>,
    pub danger_accept_invalid_certs: bool,
    pub danger_accept_invalid_hostnames: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_timeout: Duration::from_millis(60_000),
            read_timeout: Duration::from_millis(60_000),
            proxy: None,
            danger_accept_invalid_certs: true,
            danger_accept_invalid_hostnames: true,
        }
    }
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Thin wrapper over a `reqwest::Client`. Connections are managed by
/// `reqwest`'s pool internally; this type itself is `Clone + Send + Sync`
/// and is the thing shared across concurrently-sending messages.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
            .danger_accept_invalid_hostnames(config.danger_accept_invalid_hostnames);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        } else {
            builder = builder.no_proxy();
        }

        Ok(HttpTransport { client: builder.build()? })
    }

    /// POST `body` to `url` with `headers`, dumping the outgoing request and
    /// incoming response if a dumper is supplied.
    ///
    /// The body is handed to `reqwest` as a single `Bytes` buffer rather than
    /// a true byte stream: this crate's MIME model (`crate::mime::MimeContainer`)
    /// materializes the whole secured body as a `String` before transport
    /// ever sees it, so large-payload streaming is not avoided upstream of
    /// this call — see DESIGN.md for the tradeoff.
    pub async fn post(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: Bytes,
        dumper: Option<&dyn Dumper>,
        message_id: &str,
    ) -> Result<HttpResponse, As2Error> {
        if let Some(dumper) = dumper {
            dumper.dump_outgoing(message_id, headers, &body);
        }

        let mut request = self.client.post(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| io_error_from_reqwest(url, e))?;

        let status = response.status().as_u16();
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let expected_len = response.content_length();

        let body = response.bytes().await.map_err(|e| io_error_from_reqwest(url, e))?;
        if let Some(expected) = expected_len {
            if body.len() as u64 != expected {
                return Err(As2Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "response body truncated: expected {expected} bytes, got {}",
                        body.len()
                    ),
                )));
            }
        }

        if let Some(dumper) = dumper {
            dumper.dump_incoming(message_id, &response_headers, &body);
        }

        Ok(HttpResponse { status, headers: response_headers, body })
    }
}

fn io_error_from_reqwest(url: &str, e: reqwest::Error) -> As2Error {
    As2Error::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("{url}: {e}")))
}

/// HTTP status codes `Sender` treats as a successful transmission.
pub fn is_success_status(code: u16) -> bool {
    matches!(code, 200 | 201 | 202 | 204 | 206)
}
