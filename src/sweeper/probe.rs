//! Liveness probes

use async_trait::async_trait;
use std::time::Duration;

use crate::types::Peer;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("probe timed out")]
    Timeout,

    #[error("peer answered with status {0}")]
    BadStatus(u16),
}

/// Checks whether a peer answers
#[async_trait]
pub trait PeerProber: Send + Sync {
    async fn probe(&self, peer: &Peer) -> Result<(), ProbeError>;
}

/// Probe issuing `GET http://<ip>:<port><path>` and expecting a 2xx
pub struct HttpProber {
    client: reqwest::Client,
    path: String,
}

impl HttpProber {
    pub fn new(timeout: Duration, path: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            path: path.into(),
        })
    }

    fn url(&self, peer: &Peer) -> String {
        format!("http://{}{}", peer.socket_addr(), self.path)
    }
}

#[async_trait]
impl PeerProber for HttpProber {
    async fn probe(&self, peer: &Peer) -> Result<(), ProbeError> {
        let response = self.client.get(self.url(peer)).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout
            } else {
                ProbeError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::BadStatus(status.as_u16()))
        }
    }
}
