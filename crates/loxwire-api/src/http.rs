// Miniserver HTTP client
//
// Wraps `reqwest::Client` with Miniserver URL construction and
// cancellation. Envelope interpretation is left to callers: the auth session
// and the command dispatcher each decide which error a failing code maps to.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::{HttpTransport, TransportConfig};

/// Relative path of the structure document.
pub const STRUCTURE_FILE_PATH: &str = "data/LoxApp3.json";

/// Relative path of the push-channel endpoint.
pub const WEBSOCKET_PATH: &str = "/ws/rfc6455";

/// Raw HTTP client for a single Miniserver.
pub struct MiniserverClient {
    http: reqwest::Client,
    base_url: Url,
}

impl MiniserverClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the Miniserver root, e.g. `http://192.168.1.77` or
    /// `https://dns.loxonecloud.com/504F94A0XXXX`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The Miniserver base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for a Miniserver-relative path.
    ///
    /// The path is appended verbatim so that already percent-encoded
    /// segments survive untouched.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&full)?)
    }

    /// The push-channel URL: `ws://` or `wss://` depending on the base
    /// scheme, at [`WEBSOCKET_PATH`].
    pub fn websocket_url(&self) -> Result<Url, Error> {
        let mut url = self.url(WEBSOCKET_PATH)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(Error::WebSocketConnect(format!(
                    "cannot derive WebSocket URL from scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme).map_err(|()| {
            Error::WebSocketConnect(format!("cannot switch {url} to scheme {scheme}"))
        })?;
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn send_get(&self, url: Url) -> Result<String, Error> {
        let resp = self.http.get(url).send().await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                code: 401,
                message: "Miniserver rejected the request as unauthorized".into(),
            });
        }

        let resp = resp.error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl HttpTransport for MiniserverClient {
    async fn get_text(&self, path: &str, cancel: &CancellationToken) -> Result<String, Error> {
        let url = self.url(path)?;
        debug!("GET {}", url.path());

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.send_get(url) => result,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> MiniserverClient {
        MiniserverClient::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn url_keeps_encoded_segments() {
        let c = client("http://192.168.1.77:8080");
        let url = c.url("jdev/sys/getkey2/j%C3%BCrgen").unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.77:8080/jdev/sys/getkey2/j%C3%BCrgen");
    }

    #[test]
    fn url_respects_base_path_prefix() {
        let c = client("https://dns.example.com/504F94A00000/");
        let url = c.url("/data/LoxApp3.json").unwrap();
        assert_eq!(url.as_str(), "https://dns.example.com/504F94A00000/data/LoxApp3.json");
    }

    #[test]
    fn websocket_url_switches_scheme() {
        assert_eq!(
            client("http://10.0.0.2").websocket_url().unwrap().as_str(),
            "ws://10.0.0.2/ws/rfc6455"
        );
        assert_eq!(
            client("https://10.0.0.2:443").websocket_url().unwrap().as_str(),
            "wss://10.0.0.2/ws/rfc6455"
        );
    }
}
