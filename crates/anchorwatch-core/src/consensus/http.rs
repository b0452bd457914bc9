use std::time::Duration;

use async_trait::async_trait;
use bitcoin::block::Header;
use bitcoin::consensus::encode::serialize_hex;
use reqwest::{Response, Url};
use serde::Serialize;
use tracing::debug;

use super::{ConsensusClient, ConsensusError, ExtractedCheckpoint, RawCheckpointWithMeta};

/// JSON REST client for the consensus chain's relayer API.
///
/// ```text
/// POST {base}/headers                  {"headers": ["<hex>", ...]}
/// POST {base}/checkpoints              ExtractedCheckpoint
/// GET  {base}/checkpoints?since=<n>    [RawCheckpointWithMeta, ...]
/// ```
pub struct HttpConsensusClient {
    client: reqwest::Client,
    base: Url,
}

#[derive(Serialize)]
struct HeadersRequest {
    headers: Vec<String>,
}

impl HttpConsensusClient {
    pub fn new(base: &str) -> Result<Self, ConsensusError> {
        let mut base = Url::parse(base).map_err(|e| {
            ConsensusError::InvalidResponse(format!("invalid consensus chain url `{base}`: {e}"))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ConsensusError> {
        self.base
            .join(path)
            .map_err(|e| ConsensusError::InvalidResponse(format!("invalid endpoint {path}: {e}")))
    }
}

async fn check_status(resp: Response) -> Result<Response, ConsensusError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ConsensusError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ConsensusClient for HttpConsensusClient {
    async fn submit_headers(&self, headers: &[Header]) -> Result<(), ConsensusError> {
        let body = HeadersRequest {
            headers: headers.iter().map(serialize_hex).collect(),
        };
        debug!(count = headers.len(), "submitting headers");
        let resp = self
            .client
            .post(self.endpoint("headers")?)
            .json(&body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn submit_checkpoint(&self, ckpt: &ExtractedCheckpoint) -> Result<(), ConsensusError> {
        debug!(epoch = ckpt.ckpt.epoch_num, "submitting checkpoint");
        let resp = self
            .client
            .post(self.endpoint("checkpoints")?)
            .json(ckpt)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn raw_checkpoints_since(
        &self,
        epoch: u64,
    ) -> Result<Vec<RawCheckpointWithMeta>, ConsensusError> {
        let resp = self
            .client
            .get(self.endpoint("checkpoints")?)
            .query(&[("since", epoch)])
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ConsensusError::InvalidResponse(format!("checkpoint list: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_resolve_under_base_path() {
        let client = HttpConsensusClient::new("http://127.0.0.1:1317/relayer").expect("valid url");
        assert_eq!(
            client.endpoint("checkpoints").expect("join").as_str(),
            "http://127.0.0.1:1317/relayer/checkpoints"
        );

        let client = HttpConsensusClient::new("http://127.0.0.1:1317/").expect("valid url");
        assert_eq!(
            client.endpoint("headers").expect("join").as_str(),
            "http://127.0.0.1:1317/headers"
        );
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(HttpConsensusClient::new("not a url").is_err());
    }
}
