//! REST snapshot of the gateway's full device list.
//!
//! The gateway lists every function (logical device) with all of its
//! datapoints at `GET /api/junghome/functions`.  The session actor fetches it
//! after every (re)connect and periodically, so the registry converges even
//! if WebSocket pushes were lost while the connection was down.

pub mod mock;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use tracing::debug;

use junghome_core::protocol::{decode_function_list, FunctionDescriptor};

use crate::application::ports::{SnapshotError, SnapshotSource};
use crate::domain::GatewayConfig;
use crate::infrastructure::transport::TOKEN_HEADER;

/// Fetches the function list over HTTPS.
pub struct RestSnapshotSource {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl RestSnapshotSource {
    /// # Errors
    ///
    /// Returns [`SnapshotError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &GatewayConfig) -> Result<Self, SnapshotError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            // The gateway's certificate is self-signed unless the operator
            // installed a trusted one.
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| SnapshotError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: config.rest_url(),
            token: config.token.clone(),
        })
    }
}

impl std::fmt::Debug for RestSnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSnapshotSource")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Classifies a non-success HTTP status.
fn status_error(status: StatusCode) -> SnapshotError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SnapshotError::Unauthorized {
            status: status.as_u16(),
        },
        other => SnapshotError::Status(other.as_u16()),
    }
}

#[async_trait]
impl SnapshotSource for RestSnapshotSource {
    async fn fetch(&self) -> Result<Vec<FunctionDescriptor>, SnapshotError> {
        let response = self
            .client
            .get(&self.url)
            .header(TOKEN_HEADER, &self.token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SnapshotError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SnapshotError::Request(e.to_string()))?;
        let functions = decode_function_list(&body)?;
        debug!(url = %self.url, functions = functions.len(), "fetched function list");
        Ok(functions)
    }
}
