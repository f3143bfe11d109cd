use std::{ops::Deref, str::FromStr, time::Duration};

use fake_user_agent::get_chrome_rua;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, ClientBuilder,
};

use crate::error::{OtoError, OtoResult};

/// Shared HTTP client for container, manifest, probe and segment requests.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> OtoResult<Self> {
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Build a client with a browser user agent, extra `Name: value` headers
    /// and a per-request timeout.
    pub fn with_options(headers: &[String], timeout: Duration) -> OtoResult<Self> {
        let mut header_map = HeaderMap::new();
        for header in headers {
            let (key, value) = header.split_once(':').ok_or_else(|| {
                OtoError::InvalidHeader(header.clone())
            })?;
            let name = HeaderName::from_str(key.trim())
                .map_err(|e| OtoError::InvalidHeader(e.to_string()))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| OtoError::InvalidHeader(e.to_string()))?;
            header_map.insert(name, value);
        }

        Self::new(
            Client::builder()
                .default_headers(header_map)
                .user_agent(get_chrome_rua())
                .timeout(timeout),
        )
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
