//! POSTs a byte payload with configured headers, optional basic auth, and a shared rate limiter.
//!
//! Uses a connection-pooled `reqwest::Client` with an explicit idle-timeout configuration.

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use snafu::{OptionExt, ResultExt};
use tracing::warn;

use crate::config::Config;
use crate::error::{BuildRequestSnafu, MissingUrlSnafu, SendError, TransportSnafu};
use crate::rate_limit::ByteRateLimiter;

pub struct HttpSender {
    client: reqwest::Client,
    headers: HeaderMap,
    basic_auth: Option<HeaderValue>,
    rate_limiter: ByteRateLimiter,
}

impl HttpSender {
    pub fn new(config: &Config) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_idle_timeout(config.keep_alive_idle_timeout)
            .build()
            .context(BuildRequestSnafu)?;

        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            match (
                reqwest::header::HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(message = "skipping invalid configured header", header = %key),
            }
        }

        let basic_auth = match (&config.basic_auth_username, &config.basic_auth_password) {
            (Some(user), Some(pass)) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
                HeaderValue::from_str(&format!("Basic {encoded}")).ok()
            }
            _ => None,
        };

        Ok(HttpSender {
            client,
            headers,
            basic_auth,
            rate_limiter: ByteRateLimiter::new(config.net_limit_bytes_per_second),
        })
    }

    /// Sends `payload` to `url`. `gzip` controls whether `Content-Encoding: gzip` is advertised;
    /// the caller is responsible for having already compressed the bytes.
    pub async fn send(&self, payload: Vec<u8>, url: &str, gzip: bool) -> Result<(), SendError> {
        if url.is_empty() {
            return MissingUrlSnafu.fail();
        }

        self.rate_limiter.acquire(payload.len()).await?;

        let mut request = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json; charset=UTF-8");

        if gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        if let Some(auth) = &self.basic_auth {
            request = request.header(AUTHORIZATION, auth.clone());
        }

        let response = request.body(payload).send().await.context(TransportSnafu)?;
        let status = response.status();
        // Always drain the body so the connection can be reused.
        let _ = response.bytes().await;

        if status.is_success() {
            Ok(())
        } else {
            crate::error::BadStatusSnafu { status: status.as_u16() }.fail()
        }
    }
}
