//! # Account History Client
//!
//! HTTP JSON-RPC client for the node's account-history API, used by the
//! startup backfill scan. Built on `reqwest_middleware` with the
//! exponential-backoff retry middleware so transient node hiccups are
//! absorbed at the transport layer. History is fetched page by page,
//! walking backwards with a timestamp cursor until the window is covered.

use std::future::Future;

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use serde_json::json;

use crate::chain::operations::RawOperation;
use crate::chain::ChainError;

/// Largest page the node will serve per `account_history` call.
const HISTORY_PAGE_LIMIT: usize = 1000;

/// Read access to past operations, abstracted so the backfill scan can be
/// exercised without a live node.
pub trait HistorySource: Send + Sync {
    /// Returns the operations touching `account` at or after `since`,
    /// oldest first.
    async fn account_history(
        &self,
        account: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawOperation>, ChainError>;
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<HistoryResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryResult {
    #[serde(default)]
    history: Vec<RawOperation>,
}

/// JSON-RPC account-history client.
pub struct HistoryClient {
    inner: ClientWithMiddleware,
    endpoint: Url,
}

impl HistoryClient {
    /// Creates a client for the node's HTTP endpoint with a 3-retry
    /// exponential backoff policy on transient transport failures.
    pub fn new(endpoint: &str) -> Result<Self, ChainError> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| ChainError::Endpoint(endpoint.to_string()))?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let inner = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self { inner, endpoint })
    }

    /// Fetches one page. `before = None` starts at the newest operation;
    /// with a cursor, the node returns items strictly older than it.
    async fn fetch_page(
        &self,
        account: &str,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawOperation>, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "account_history.get_account_history",
            "params": { "account": account, "limit": HISTORY_PAGE_LIMIT, "before": before },
            "id": 1,
        });
        let response = self
            .inner
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;
        let envelope: RpcEnvelope = response.json().await?;

        if let Some(error) = envelope.error {
            return Err(ChainError::Rpc(error.to_string()));
        }
        Ok(envelope.result.map(|r| r.history).unwrap_or_default())
    }
}

impl HistorySource for HistoryClient {
    async fn account_history(
        &self,
        account: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawOperation>, ChainError> {
        collect_window(since, HISTORY_PAGE_LIMIT, |before| {
            self.fetch_page(account, before)
        })
        .await
    }
}

/// Pages backwards through history until a page is short, empty, or its
/// oldest item already predates `since`; then trims to the window and
/// sorts oldest first. An account with more than one page of operations
/// inside the window must not lose the older ones.
async fn collect_window<F, Fut>(
    since: DateTime<Utc>,
    page_limit: usize,
    mut fetch_page: F,
) -> Result<Vec<RawOperation>, ChainError>
where
    F: FnMut(Option<DateTime<Utc>>) -> Fut,
    Fut: Future<Output = Result<Vec<RawOperation>, ChainError>>,
{
    let mut collected = Vec::new();
    let mut before = None;
    loop {
        let page = fetch_page(before).await?;
        let Some(oldest) = page.iter().map(|op| op.timestamp).min() else {
            break;
        };
        let page_len = page.len();
        collected.extend(page);
        if page_len < page_limit || oldest < since {
            break;
        }
        before = Some(oldest);
    }
    collected.retain(|op| op.timestamp >= since);
    collected.sort_by_key(|op| op.timestamp);
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn op_at(from: &str, timestamp: DateTime<Utc>) -> RawOperation {
        RawOperation {
            kind: "transfer".into(),
            from: from.into(),
            to: "treasury".into(),
            amount: "3.000 HBD".into(),
            memo: String::new(),
            timestamp,
        }
    }

    #[test]
    fn rejects_malformed_endpoint() {
        assert!(matches!(
            HistoryClient::new("not a url"),
            Err(ChainError::Endpoint(_))
        ));
        assert!(HistoryClient::new("https://node.example.net").is_ok());
    }

    #[tokio::test]
    async fn multi_page_window_is_fully_collected() {
        let now = Utc::now();
        let since = now - Duration::days(31);
        let t = |days_ago: i64| now - Duration::days(days_ago);

        // Two full pages inside the window, then a page reaching past it.
        let pages = Mutex::new(VecDeque::from([
            vec![op_at("a", t(1)), op_at("b", t(2))],
            vec![op_at("c", t(10)), op_at("d", t(20))],
            vec![op_at("e", t(30)), op_at("f", t(40))],
        ]));
        let cursors = Mutex::new(Vec::new());

        let collected = collect_window(since, 2, |before| {
            cursors.lock().unwrap().push(before);
            let page = pages.lock().unwrap().pop_front().unwrap_or_default();
            async move { Ok(page) }
        })
        .await
        .unwrap();

        // Everything inside the window survives, oldest first; "f" at 40
        // days is trimmed.
        let names: Vec<_> = collected.iter().map(|op| op.from.as_str()).collect();
        assert_eq!(names, vec!["e", "d", "c", "b", "a"]);

        // First request has no cursor; each follow-up cursors at the
        // previous page's oldest timestamp. The third page crosses `since`,
        // so no fourth request is made.
        assert_eq!(*cursors.lock().unwrap(), vec![None, Some(t(2)), Some(t(20))]);
    }

    #[tokio::test]
    async fn short_first_page_stops_the_walk() {
        let now = Utc::now();
        let since = now - Duration::days(31);
        let calls = Mutex::new(0u32);

        let collected = collect_window(since, 1000, |_| {
            *calls.lock().unwrap() += 1;
            async move { Ok(vec![op_at("a", now - Duration::days(1))]) }
        })
        .await
        .unwrap();

        assert_eq!(collected.len(), 1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_history_yields_empty_window() {
        let since = Utc::now() - Duration::days(31);
        let collected = collect_window(since, 1000, |_| async { Ok(Vec::new()) })
            .await
            .unwrap();
        assert!(collected.is_empty());
    }
}
