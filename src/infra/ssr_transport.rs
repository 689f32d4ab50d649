use std::sync::RwLock;

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};

use crate::application::ssr::{SsrTransport, TransportError, TransportResponse};
use crate::cache::lock::{rw_read, rw_write};

use super::error::InfraError;

const SOURCE: &str = "infra::ssr_transport";

/// [`SsrTransport`] over a pooled `reqwest` client.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: RwLock<Client>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, InfraError> {
        Ok(Self {
            client: RwLock::new(build_client()?),
        })
    }

    fn client(&self) -> Client {
        rw_read(&self.client, SOURCE, "client").clone()
    }
}

fn build_client() -> Result<Client, InfraError> {
    Client::builder()
        .user_agent(user_agent())
        .build()
        .map_err(|err| InfraError::http_client(format!("failed to build ssr client: {err}")))
}

fn user_agent() -> &'static str {
    concat!("inertia-server/", env!("CARGO_PKG_VERSION"))
}

#[async_trait]
impl SsrTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client()
            .post(url)
            .headers(headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|err| TransportError::with_source("request failed", err))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::with_source("failed to read response body", err))?;

        debug!(
            target = SOURCE,
            op = "post",
            url,
            status,
            bytes = body.len(),
            "SSR renderer responded"
        );
        Ok(TransportResponse { status, body })
    }

    fn reset(&self) {
        match build_client() {
            Ok(client) => *rw_write(&self.client, SOURCE, "client") = client,
            Err(err) => warn!(
                target = SOURCE,
                op = "reset",
                error = %err,
                "Keeping existing SSR client"
            ),
        }
    }
}
