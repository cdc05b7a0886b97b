//! HTTP ledger client
//!
//! Speaks a single-endpoint JSON protocol: every request is a POST whose
//! body carries an `action` tag (`push` or `pull`).

use std::time::Duration;

use async_trait::async_trait;

use super::wire::{LedgerRecord, LedgerRequest, PushResponse};
use super::{LedgerClient, LedgerError, PushResult, Scope};
use crate::record::StockRecord;

fn map_reqwest(e: reqwest::Error) -> LedgerError {
    if e.is_timeout() {
        LedgerError::Timeout
    } else if e.is_decode() {
        LedgerError::Protocol(e.to_string())
    } else {
        LedgerError::Transport(e.to_string())
    }
}

/// Ledger reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLedgerClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        request: &LedgerRequest,
    ) -> Result<T, LedgerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest)?
            .error_for_status()
            .map_err(map_reqwest)?;
        response.json::<T>().await.map_err(map_reqwest)
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn push(&self, records: &[StockRecord]) -> Result<PushResult, LedgerError> {
        let request = LedgerRequest::Push {
            data: records.iter().map(LedgerRecord::from).collect(),
        };
        match self.post::<PushResponse>(&request).await? {
            PushResponse::Accepted => Ok(PushResult::Accepted),
            PushResponse::Conflict { records } => Ok(PushResult::Conflict(
                records.into_iter().map(LedgerRecord::into_record).collect(),
            )),
        }
    }

    async fn pull(&self, scope: Scope) -> Result<Vec<StockRecord>, LedgerError> {
        let records: Vec<LedgerRecord> = self.post(&LedgerRequest::Pull { scope }).await?;
        Ok(records.into_iter().map(LedgerRecord::into_record).collect())
    }
}
