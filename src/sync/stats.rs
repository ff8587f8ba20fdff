//! Aggregate stats unit: one summary object, replaced wholesale.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::collection::FetchOutcome;
use super::{Generations, ResourceClient};

/// Flat mapping of named counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot(Map<String, Value>);

impl StatsSnapshot {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Integer counter, if `name` holds a number.
    pub fn counter(&self, name: &str) -> Option<i64> {
        let value = self.0.get(name)?;
        value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

struct Inner {
    credential: Option<String>,
    snapshot: StatsSnapshot,
    last_trigger: Option<(Option<String>, u64)>,
}

pub struct StatsSync {
    client: Arc<dyn ResourceClient>,
    path: String,
    inner: Mutex<Inner>,
    generations: Generations,
}

impl StatsSync {
    pub fn new(client: Arc<dyn ResourceClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
            inner: Mutex::new(Inner {
                credential: None,
                snapshot: StatsSnapshot::default(),
                last_trigger: None,
            }),
            generations: Generations::default(),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Forget the credential until the next reconcile. The snapshot is kept.
    pub fn clear_credential(&self) {
        self.inner.lock().credential = None;
    }

    /// Fetch when the credential or the refresh signal changed since the
    /// last reconcile. Returns whether a fetch was attempted.
    pub async fn reconcile(&self, credential: Option<String>, signal: u64) -> bool {
        {
            let mut inner = self.inner.lock();
            let trigger = (credential.clone(), signal);
            inner.credential = credential;
            if inner.last_trigger.as_ref() == Some(&trigger) {
                return false;
            }
            inner.last_trigger = Some(trigger);
        }
        self.fetch().await;
        true
    }

    pub async fn fetch(&self) -> FetchOutcome {
        let Some(credential) = self.inner.lock().credential.clone() else {
            return FetchOutcome::Idle;
        };
        let generation = self.generations.issue();

        let fields = match self.client.get_json(&self.path, &[], &credential).await {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                tracing::warn!(
                    path = %self.path,
                    kind = json_kind(&other),
                    "stats response is not an object; keeping previous snapshot"
                );
                return FetchOutcome::Failed;
            }
            Err(e) => {
                tracing::warn!(path = %self.path, error = %e, "stats fetch failed; keeping previous snapshot");
                return FetchOutcome::Failed;
            }
        };

        let mut inner = self.inner.lock();
        if !self.generations.try_apply(generation) {
            return FetchOutcome::Stale;
        }
        inner.snapshot = StatsSnapshot(fields);
        FetchOutcome::Applied
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Replies {
        queue: Mutex<VecDeque<Result<Value, u16>>>,
        calls: AtomicUsize,
    }

    impl Replies {
        fn new(replies: Vec<Result<Value, u16>>) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ResourceClient for Replies {
        async fn get_json(
            &self,
            path: &str,
            query: &[(&str, String)],
            _credential: &str,
        ) -> Result<Value, GatewayError> {
            assert_eq!(path, "/api/admin/stats");
            assert!(query.is_empty());
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.queue.lock().pop_front().unwrap_or(Err(500));
            next.map_err(|status| GatewayError::Status {
                status,
                body: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn snapshot_is_replaced_wholesale() {
        let client = Replies::new(vec![
            Ok(json!({ "users": 120, "events": 8 })),
            Ok(json!({ "users": 121 })),
        ]);
        let stats = StatsSync::new(client, "/api/admin/stats");

        assert!(stats.reconcile(Some("t".into()), 0).await);
        assert_eq!(stats.snapshot().counter("events"), Some(8));

        assert!(stats.reconcile(Some("t".into()), 1).await);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.counter("users"), Some(121));
        assert!(snapshot.get("events").is_none());
    }

    #[tokio::test]
    async fn failure_leaves_snapshot_untouched() {
        let client = Replies::new(vec![Ok(json!({ "jobs": 4 })), Err(502), Ok(json!([1]))]);
        let stats = StatsSync::new(client, "/api/admin/stats");

        stats.reconcile(Some("t".into()), 0).await;
        assert_eq!(stats.fetch().await, FetchOutcome::Failed);
        assert_eq!(stats.fetch().await, FetchOutcome::Failed);
        assert_eq!(stats.snapshot().counter("jobs"), Some(4));
    }

    #[tokio::test]
    async fn reruns_only_on_credential_or_signal_change() {
        let client = Replies::new((0..3).map(|_| Ok(json!({}))).collect());
        let stats = StatsSync::new(client.clone(), "/api/admin/stats");

        assert!(stats.reconcile(Some("a".into()), 0).await);
        assert!(!stats.reconcile(Some("a".into()), 0).await);
        assert!(stats.reconcile(Some("b".into()), 0).await);
        assert!(stats.reconcile(Some("b".into()), 1).await);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn idle_without_credential() {
        let client = Replies::new(vec![]);
        let stats = StatsSync::new(client.clone(), "/api/admin/stats");

        assert_eq!(stats.fetch().await, FetchOutcome::Idle);
        stats.reconcile(None, 3).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
