use std::sync::Arc;
use std::time::Duration;

use ledger_client::domain::DailyDigest;
use ledger_client::LedgerStore;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::locks::KeyedLocks;

/// Wire payload for the anchoring adapter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRequest {
    pub topic: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReceipt {
    pub adapter_tx_id: String,
    pub tx_hash: String,
}

#[derive(thiserror::Error, Debug)]
pub enum AnchorError {
    /// Missing endpoint/credentials or similar; terminal, never retried.
    #[error("anchor configuration error: {0}")]
    Config(String),
    /// Network-level failure; retried with backoff.
    #[error("anchor transport error: {0}")]
    Transport(String),
    /// The adapter answered, but not with success. Retryability is policy.
    #[error("anchor service returned {status}: {body}")]
    NonSuccess { status: u16, body: String },
    #[error("no digest for {site_id}/{day}")]
    MissingDigest { site_id: String, day: Date },
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// Remote anchoring service boundary.
#[async_trait::async_trait]
pub trait AnchorClient: Send + Sync {
    async fn submit(&self, request: &AnchorRequest) -> Result<AnchorReceipt, AnchorError>;

    async fn status(&self, chain_hash: &str) -> Result<bool, AnchorError>;
}

/// HTTP adapter client. The adapter exposes `POST {endpoint}/anchors` and
/// `GET {endpoint}/anchors/{chainHash}`.
pub struct HttpAnchorClient {
    client: reqwest::Client,
    endpoint: String,
    auth_bearer_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    confirmed: bool,
}

impl HttpAnchorClient {
    pub fn new(endpoint: &str, auth_bearer_token: Option<String>) -> Result<Self, AnchorError> {
        if endpoint.trim().is_empty() {
            return Err(AnchorError::Config("anchor endpoint is not set".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth_bearer_token,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait::async_trait]
impl AnchorClient for HttpAnchorClient {
    async fn submit(&self, request: &AnchorRequest) -> Result<AnchorReceipt, AnchorError> {
        let url = format!("{}/anchors", self.endpoint);
        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(|e| AnchorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnchorError::NonSuccess {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<AnchorReceipt>()
            .await
            .map_err(|e| AnchorError::Transport(format!("invalid anchor response: {e}")))
    }

    async fn status(&self, chain_hash: &str) -> Result<bool, AnchorError> {
        let url = format!("{}/anchors/{chain_hash}", self.endpoint);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AnchorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnchorError::NonSuccess {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<StatusResponse>()
            .await
            .map_err(|e| AnchorError::Transport(format!("invalid status response: {e}")))?;
        Ok(parsed.confirmed)
    }
}

#[derive(Debug, Clone)]
pub struct AnchorPolicy {
    pub max_retries: u32,
    /// Base delay; doubles on each retry.
    pub retry_backoff: Duration,
    /// Whether non-success adapter responses are retried like transport
    /// failures or treated as terminal.
    pub retry_non_success: bool,
}

impl Default for AnchorPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff: Duration::from_millis(500),
            retry_non_success: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AnchorOutcome {
    /// This call performed the external submission.
    Anchored(AnchorReceipt),
    /// The digest already carried references; nothing was submitted.
    AlreadyAnchored(AnchorReceipt),
}

impl AnchorOutcome {
    pub fn receipt(&self) -> &AnchorReceipt {
        match self {
            Self::Anchored(r) | Self::AlreadyAnchored(r) => r,
        }
    }
}

pub fn topic(site_id: &str, day: Date) -> String {
    format!("IOT:{site_id}:{day}")
}

/// Submits finalized digests to the anchoring service, exactly once per
/// digest. Submissions for the same (site, day) are serialized by a keyed
/// lock; the conditional `mark_anchored` update is the final guard against
/// a concurrent writer outside this process.
pub struct AnchorCoordinator {
    store: Arc<dyn LedgerStore>,
    client: Arc<dyn AnchorClient>,
    policy: AnchorPolicy,
    /// Optional published-artifact URI, with `{site}` and `{day}`
    /// placeholders.
    artifact_uri_template: Option<String>,
    locks: KeyedLocks,
}

impl AnchorCoordinator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        client: Arc<dyn AnchorClient>,
        policy: AnchorPolicy,
        artifact_uri_template: Option<String>,
    ) -> Self {
        Self {
            store,
            client,
            policy,
            artifact_uri_template,
            locks: KeyedLocks::new(),
        }
    }

    fn artifact_uri(&self, site_id: &str, day: Date) -> Option<String> {
        self.artifact_uri_template
            .as_ref()
            .map(|t| t.replace("{site}", site_id).replace("{day}", &day.to_string()))
    }

    fn stored_receipt(digest: &DailyDigest) -> Option<AnchorReceipt> {
        if !digest.anchored {
            return None;
        }
        Some(AnchorReceipt {
            adapter_tx_id: digest.adapter_tx_id.clone().unwrap_or_default(),
            tx_hash: digest.chain_tx_hash.clone().unwrap_or_default(),
        })
    }

    /// Anchor the digest for (site, day). Idempotent: an already-anchored
    /// digest returns its stored references without touching the adapter.
    pub async fn anchor_digest(
        &self,
        site_id: &str,
        day: Date,
        run_id: &str,
    ) -> Result<AnchorOutcome, AnchorError> {
        let digest = self
            .store
            .daily_digest(site_id, day)
            .await
            .map_err(AnchorError::Store)?
            .ok_or_else(|| AnchorError::MissingDigest {
                site_id: site_id.to_string(),
                day,
            })?;
        if let Some(receipt) = Self::stored_receipt(&digest) {
            return Ok(AnchorOutcome::AlreadyAnchored(receipt));
        }

        let _guard = self.locks.acquire(&format!("anchor:{site_id}:{day}")).await;

        // Re-check under the lock: a competing submitter may have finished
        // while this call was waiting.
        let digest = self
            .store
            .daily_digest(site_id, day)
            .await
            .map_err(AnchorError::Store)?
            .ok_or_else(|| AnchorError::MissingDigest {
                site_id: site_id.to_string(),
                day,
            })?;
        if let Some(receipt) = Self::stored_receipt(&digest) {
            return Ok(AnchorOutcome::AlreadyAnchored(receipt));
        }

        let request = AnchorRequest {
            topic: topic(site_id, day),
            hash: digest.merkle_root.clone(),
            uri: self.artifact_uri(site_id, day),
        };
        let receipt = self.submit_with_retry(&request, site_id, day, run_id).await?;

        let transitioned = self
            .store
            .mark_anchored(site_id, day, &receipt.adapter_tx_id, &receipt.tx_hash)
            .await
            .map_err(AnchorError::Store)?;
        if !transitioned {
            // Lost the conditional update to an out-of-process writer; the
            // stored references win.
            tracing::warn!(
                site = site_id,
                day = %day,
                run_id,
                "digest was anchored concurrently, keeping stored references"
            );
            let stored = self
                .store
                .daily_digest(site_id, day)
                .await
                .map_err(AnchorError::Store)?
                .and_then(|d| Self::stored_receipt(&d))
                .unwrap_or(receipt);
            return Ok(AnchorOutcome::AlreadyAnchored(stored));
        }

        metrics::counter!("anchor_success_total").increment(1);
        tracing::info!(
            site = site_id,
            day = %day,
            run_id,
            adapter_tx_id = %receipt.adapter_tx_id,
            tx_hash = %receipt.tx_hash,
            "digest anchored"
        );
        Ok(AnchorOutcome::Anchored(receipt))
    }

    /// Confirmation state of an anchored digest on the external ledger.
    /// `Ok(None)` when the digest exists but has not been anchored yet.
    pub async fn confirmed(&self, site_id: &str, day: Date) -> Result<Option<bool>, AnchorError> {
        let digest = self
            .store
            .daily_digest(site_id, day)
            .await
            .map_err(AnchorError::Store)?
            .ok_or_else(|| AnchorError::MissingDigest {
                site_id: site_id.to_string(),
                day,
            })?;

        match digest.chain_tx_hash {
            Some(chain_hash) if digest.anchored => {
                Ok(Some(self.client.status(&chain_hash).await?))
            }
            _ => Ok(None),
        }
    }

    fn retryable(&self, error: &AnchorError) -> bool {
        match error {
            AnchorError::Transport(_) => true,
            AnchorError::NonSuccess { .. } => self.policy.retry_non_success,
            _ => false,
        }
    }

    async fn submit_with_retry(
        &self,
        request: &AnchorRequest,
        site_id: &str,
        day: Date,
        run_id: &str,
    ) -> Result<AnchorReceipt, AnchorError> {
        let mut attempt: u32 = 0;
        loop {
            match self.client.submit(request).await {
                Ok(receipt) => {
                    metrics::counter!("anchor_submissions_total").increment(1);
                    return Ok(receipt);
                }
                Err(e) if self.retryable(&e) && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let sleep_for = self.policy.retry_backoff * 2u32.pow((attempt - 1).min(16));
                    tracing::warn!(
                        site = site_id,
                        day = %day,
                        run_id,
                        error = %e,
                        attempt,
                        "anchor submission failed, retrying with backoff"
                    );
                    metrics::counter!("anchor_retry_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(
                        site = site_id,
                        day = %day,
                        run_id,
                        error = %e,
                        "anchor submission failed, giving up"
                    );
                    metrics::counter!("anchor_failures_total").increment(1);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use ledger_client::store::MemoryLedgerStore;
    use time::macros::date;

    struct ScriptedAnchorClient {
        script: Mutex<VecDeque<Result<AnchorReceipt, AnchorError>>>,
        submissions: Mutex<Vec<AnchorRequest>>,
    }

    impl ScriptedAnchorClient {
        fn new(script: Vec<Result<AnchorReceipt, AnchorError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                submissions: Mutex::new(Vec::new()),
            })
        }

        fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }

        fn receipt(n: u32) -> AnchorReceipt {
            AnchorReceipt {
                adapter_tx_id: format!("tx-{n}"),
                tx_hash: format!("0xhash{n}"),
            }
        }
    }

    #[async_trait::async_trait]
    impl AnchorClient for ScriptedAnchorClient {
        async fn submit(&self, request: &AnchorRequest) -> Result<AnchorReceipt, AnchorError> {
            self.submissions.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Self::receipt(99)))
        }

        async fn status(&self, _chain_hash: &str) -> Result<bool, AnchorError> {
            Ok(true)
        }
    }

    fn fast_policy(retry_non_success: bool) -> AnchorPolicy {
        AnchorPolicy {
            max_retries: 3,
            retry_backoff: Duration::from_millis(1),
            retry_non_success,
        }
    }

    async fn store_with_digest() -> Arc<MemoryLedgerStore> {
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .upsert_daily(&DailyDigest {
                site_id: "PRJ001".to_string(),
                day: date!(2024 - 01 - 15),
                energy_kwh: 6.0,
                avoided_tco2e: 0.004248,
                row_count: 3,
                merkle_root: "ab".repeat(32),
                anchored: false,
                adapter_tx_id: None,
                chain_tx_hash: None,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn second_anchor_call_is_a_no_op_returning_stored_references() {
        let store = store_with_digest().await;
        let client = ScriptedAnchorClient::new(vec![Ok(ScriptedAnchorClient::receipt(1))]);
        let coordinator = AnchorCoordinator::new(
            store.clone(),
            client.clone(),
            fast_policy(true),
            None,
        );

        let first = coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-1")
            .await
            .unwrap();
        assert!(matches!(first, AnchorOutcome::Anchored(_)));
        assert_eq!(first.receipt().adapter_tx_id, "tx-1");

        let second = coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-2")
            .await
            .unwrap();
        assert!(matches!(second, AnchorOutcome::AlreadyAnchored(_)));
        assert_eq!(second.receipt().adapter_tx_id, "tx-1");
        assert_eq!(second.receipt().tx_hash, "0xhash1");

        assert_eq!(client.submission_count(), 1);
    }

    #[tokio::test]
    async fn submission_payload_carries_topic_and_root() {
        let store = store_with_digest().await;
        let client = ScriptedAnchorClient::new(vec![Ok(ScriptedAnchorClient::receipt(1))]);
        let coordinator = AnchorCoordinator::new(
            store,
            client.clone(),
            fast_policy(true),
            Some("s3://attestations/{site}/{day}.json".to_string()),
        );

        coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-1")
            .await
            .unwrap();

        let submissions = client.submissions.lock().unwrap();
        assert_eq!(submissions[0].topic, "IOT:PRJ001:2024-01-15");
        assert_eq!(submissions[0].hash, "ab".repeat(32));
        assert_eq!(
            submissions[0].uri.as_deref(),
            Some("s3://attestations/PRJ001/2024-01-15.json")
        );
    }

    #[tokio::test]
    async fn transport_errors_are_retried_until_success() {
        let store = store_with_digest().await;
        let client = ScriptedAnchorClient::new(vec![
            Err(AnchorError::Transport("connection refused".to_string())),
            Err(AnchorError::Transport("connection refused".to_string())),
            Ok(ScriptedAnchorClient::receipt(1)),
        ]);
        let coordinator =
            AnchorCoordinator::new(store.clone(), client.clone(), fast_policy(true), None);

        let outcome = coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-1")
            .await
            .unwrap();
        assert!(matches!(outcome, AnchorOutcome::Anchored(_)));
        assert_eq!(client.submission_count(), 3);

        let digest = store
            .daily_digest("PRJ001", date!(2024 - 01 - 15))
            .await
            .unwrap()
            .unwrap();
        assert!(digest.anchored);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_digest_unanchored() {
        let store = store_with_digest().await;
        let client = ScriptedAnchorClient::new(
            (0..4)
                .map(|_| Err(AnchorError::Transport("down".to_string())))
                .collect(),
        );
        let coordinator =
            AnchorCoordinator::new(store.clone(), client.clone(), fast_policy(true), None);

        let res = coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-1")
            .await;
        assert!(matches!(res, Err(AnchorError::Transport(_))));
        // max_retries = 3 -> one initial attempt plus three retries.
        assert_eq!(client.submission_count(), 4);

        let digest = store
            .daily_digest("PRJ001", date!(2024 - 01 - 15))
            .await
            .unwrap()
            .unwrap();
        assert!(!digest.anchored);
    }

    #[tokio::test]
    async fn configuration_errors_are_terminal() {
        let store = store_with_digest().await;
        let client = ScriptedAnchorClient::new(vec![Err(AnchorError::Config(
            "missing credentials".to_string(),
        ))]);
        let coordinator =
            AnchorCoordinator::new(store.clone(), client.clone(), fast_policy(true), None);

        let res = coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-1")
            .await;
        assert!(matches!(res, Err(AnchorError::Config(_))));
        assert_eq!(client.submission_count(), 1);
    }

    #[tokio::test]
    async fn non_success_policy_controls_retryability() {
        // Terminal policy: one attempt, surfaced immediately.
        let store = store_with_digest().await;
        let client = ScriptedAnchorClient::new(vec![Err(AnchorError::NonSuccess {
            status: 422,
            body: "bad topic".to_string(),
        })]);
        let coordinator =
            AnchorCoordinator::new(store, client.clone(), fast_policy(false), None);
        let res = coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-1")
            .await;
        assert!(matches!(res, Err(AnchorError::NonSuccess { status: 422, .. })));
        assert_eq!(client.submission_count(), 1);

        // Retry policy: the non-success response is retried like transport.
        let store = store_with_digest().await;
        let client = ScriptedAnchorClient::new(vec![
            Err(AnchorError::NonSuccess {
                status: 503,
                body: "busy".to_string(),
            }),
            Ok(ScriptedAnchorClient::receipt(1)),
        ]);
        let coordinator =
            AnchorCoordinator::new(store, client.clone(), fast_policy(true), None);
        let outcome = coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-1")
            .await
            .unwrap();
        assert!(matches!(outcome, AnchorOutcome::Anchored(_)));
        assert_eq!(client.submission_count(), 2);
    }

    #[tokio::test]
    async fn missing_digest_is_an_error() {
        let store = Arc::new(MemoryLedgerStore::new());
        let client = ScriptedAnchorClient::new(vec![]);
        let coordinator = AnchorCoordinator::new(store, client, fast_policy(true), None);

        let res = coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-1")
            .await;
        assert!(matches!(res, Err(AnchorError::MissingDigest { .. })));
    }

    #[tokio::test]
    async fn concurrent_anchor_calls_submit_once() {
        let store = store_with_digest().await;
        let client = ScriptedAnchorClient::new(vec![Ok(ScriptedAnchorClient::receipt(1))]);
        let coordinator = Arc::new(AnchorCoordinator::new(
            store,
            client.clone(),
            fast_policy(true),
            None,
        ));

        let mut handles = Vec::new();
        for i in 0..4 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .anchor_digest("PRJ001", date!(2024 - 01 - 15), &format!("run-{i}"))
                    .await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.receipt().adapter_tx_id, "tx-1");
        }

        assert_eq!(client.submission_count(), 1);
    }

    #[tokio::test]
    async fn confirmed_reports_none_until_anchored() {
        let store = store_with_digest().await;
        let client = ScriptedAnchorClient::new(vec![Ok(ScriptedAnchorClient::receipt(1))]);
        let coordinator =
            AnchorCoordinator::new(store, client, fast_policy(true), None);

        assert_eq!(
            coordinator
                .confirmed("PRJ001", date!(2024 - 01 - 15))
                .await
                .unwrap(),
            None
        );

        coordinator
            .anchor_digest("PRJ001", date!(2024 - 01 - 15), "run-1")
            .await
            .unwrap();
        assert_eq!(
            coordinator
                .confirmed("PRJ001", date!(2024 - 01 - 15))
                .await
                .unwrap(),
            Some(true)
        );
    }
}
