//! Dashboard orchestrator.
//!
//! Wires one session, one gateway, a [`CollectionSync`] per
//! [`ResourceKind`] and the [`StatsSync`], and owns the refresh signal.
//!
//! Every mutating action:
//! 1. goes through the gateway,
//! 2. on success refreshes the affected collection directly,
//! 3. bumps the refresh signal and reconciles everything else.
//!
//! Deletes are two-step: [`Dashboard::stage_delete`] hands out a
//! [`PendingDelete`] which only [`Dashboard::confirm_delete`] executes.

pub mod resources;

pub use resources::ResourceKind;

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};

use crate::auth::{
    AuthClient, AuthClientError, Clock, CredentialStore, Identity, SessionController,
    SessionError, SessionState, SystemClock,
};
use crate::config::ConsoleConfig;
use crate::gateway::{CredentialSource, GatewayError, HttpGateway, UnauthorizedHook};
use crate::sync::{CollectionSync, ResourceClient, StatsSync};

/// Buffered notices per subscriber before the oldest are dropped.
const NOTICE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient user-facing message (the view decides how to show it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("your account is not allowed to modify records")]
    Forbidden,
    #[error("your session has ended; please sign in again")]
    SessionEnded,
    #[error("{action} failed: {source}")]
    Request {
        action: String,
        #[source]
        source: GatewayError,
    },
    #[error("sign-in failed: {0}")]
    SignIn(#[from] AuthClientError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("could not set up the API client: {0}")]
    Setup(String),
}

/// A delete waiting for confirmation.
#[derive(Debug)]
#[must_use = "a staged delete does nothing until confirmed"]
pub struct PendingDelete {
    kind: ResourceKind,
    id: String,
}

impl PendingDelete {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel(self) {
        tracing::debug!(kind = %self.kind, id = %self.id, "delete cancelled");
    }
}

/// Synchronization units, shared with the forced-logout hook.
struct Units {
    collections: BTreeMap<ResourceKind, CollectionSync>,
    stats: StatsSync,
}

impl Units {
    fn drop_credential(&self) {
        for unit in self.collections.values() {
            unit.set_credential(None);
        }
        self.stats.clear_credential();
    }
}

pub struct Dashboard {
    session: Arc<SessionController>,
    gateway: Arc<HttpGateway>,
    auth: Arc<AuthClient>,
    units: Arc<Units>,
    refresh_signal: AtomicU64,
    notices: broadcast::Sender<Notice>,
}

impl Dashboard {
    pub fn new(
        config: &ConsoleConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, DashboardError> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Build with an explicit clock. The session is initialized before this
    /// returns, so the dashboard is ready on construction.
    pub fn with_clock(
        config: &ConsoleConfig,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DashboardError> {
        let auth = Arc::new(
            AuthClient::new(config.api_url.clone(), config.request_timeout())
                .map_err(|e| DashboardError::Setup(e.to_string()))?,
        );
        let session = SessionController::new(store, auth.clone(), clock, config.renewal_policy());

        // Units are built after the gateway; the hook finds them through this slot.
        let units_slot: Arc<Mutex<Weak<Units>>> = Arc::new(Mutex::new(Weak::new()));
        let weak_session = Arc::downgrade(&session);
        let hook_units = units_slot.clone();
        let hook: UnauthorizedHook = Arc::new(move |status| {
            if let Some(session) = weak_session.upgrade() {
                tracing::warn!(status = status.as_u16(), "ending session after authorization failure");
                session.logout();
            }
            if let Some(units) = hook_units.lock().upgrade() {
                units.drop_credential();
            }
        });
        let gateway = Arc::new(
            HttpGateway::new(config.api_url.clone(), config.request_timeout(), session.clone())
                .map_err(|e| DashboardError::Setup(e.to_string()))?
                .on_unauthorized(hook),
        );

        let client: Arc<dyn ResourceClient> = gateway.clone();
        let collections = ResourceKind::ALL
            .into_iter()
            .map(|kind| {
                let unit = CollectionSync::new(client.clone(), config.page_size)
                    .with_endpoint(kind.endpoint());
                (kind, unit)
            })
            .collect();
        let stats = StatsSync::new(client, config.stats_path.clone());
        let units = Arc::new(Units { collections, stats });
        *units_slot.lock() = Arc::downgrade(&units);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        session.initialize();

        Ok(Self {
            session,
            gateway,
            auth,
            units,
            refresh_signal: AtomicU64::new(0),
            notices,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn gateway(&self) -> &Arc<HttpGateway> {
        &self.gateway
    }

    pub fn collection(&self, kind: ResourceKind) -> &CollectionSync {
        &self.units.collections[&kind]
    }

    pub fn stats(&self) -> &StatsSync {
        &self.units.stats
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    pub fn refresh_signal(&self) -> u64 {
        self.refresh_signal.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Session state changes, including logouts forced by a 401/403.
    pub fn session_events(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    // ── Session ─────────────────────────────────────────────────────

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, DashboardError> {
        let grant = match self.auth.login(email, password).await {
            Ok(grant) => grant,
            Err(e) => {
                let err = DashboardError::from(e);
                self.notify(NoticeLevel::Error, err.to_string());
                return Err(err);
            }
        };
        let identity = match self
            .session
            .login(&grant.token, grant.refresh_token.as_deref())
        {
            Ok(identity) => identity,
            Err(e) => {
                let err = DashboardError::from(e);
                self.notify(NoticeLevel::Error, format!("Sign-in failed: {err}"));
                return Err(err);
            }
        };
        self.reconcile_all().await;
        Ok(identity)
    }

    pub fn sign_out(&self) {
        self.session.logout();
        self.units.drop_credential();
    }

    // ── Synchronization ─────────────────────────────────────────────

    /// Push the current credential and signal into every unit and let each
    /// one fetch if its inputs changed.
    pub async fn reconcile_all(&self) {
        let credential = self.session.access_token();
        let signal = self.refresh_signal();
        let Units { collections, stats } = &*self.units;
        for unit in collections.values() {
            unit.set_credential(credential.clone());
        }

        let collections =
            futures_util::future::join_all(collections.values().map(|unit| unit.reconcile(signal)));
        futures_util::future::join(collections, stats.reconcile(credential, signal)).await;
    }

    /// Bump the refresh signal so every unit re-fetches.
    pub async fn request_refresh(&self) {
        self.refresh_signal.fetch_add(1, Ordering::SeqCst);
        self.reconcile_all().await;
    }

    /// Reconcile one collection plus the stats.
    pub async fn reconcile(&self, kind: ResourceKind) {
        let credential = self.session.access_token();
        let signal = self.refresh_signal();
        let unit = self.collection(kind);
        unit.set_credential(credential.clone());
        futures_util::future::join(unit.reconcile(signal), self.stats().reconcile(credential, signal))
            .await;
    }

    // ── Mutations ───────────────────────────────────────────────────

    pub async fn create(&self, kind: ResourceKind, record: &Value) -> Result<Value, DashboardError> {
        self.ensure_can_edit()?;
        let created = self
            .gateway
            .post(kind.endpoint(), record)
            .await
            .map_err(|e| self.request_failed(&format!("Creating {}", kind.singular()), e))?;
        self.after_mutation(kind, format!("{} created", kind.singular()))
            .await;
        Ok(created)
    }

    pub async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        record: &Value,
    ) -> Result<Value, DashboardError> {
        self.ensure_can_edit()?;
        let updated = self
            .gateway
            .put(&kind.record_path(id), record)
            .await
            .map_err(|e| self.request_failed(&format!("Updating {}", kind.singular()), e))?;
        self.after_mutation(kind, format!("{} updated", kind.singular()))
            .await;
        Ok(updated)
    }

    /// First half of a delete. Nothing is sent until
    /// [`confirm_delete`](Self::confirm_delete).
    pub fn stage_delete(
        &self,
        kind: ResourceKind,
        id: impl Into<String>,
    ) -> Result<PendingDelete, DashboardError> {
        self.ensure_can_edit()?;
        Ok(PendingDelete {
            kind,
            id: id.into(),
        })
    }

    pub async fn confirm_delete(&self, pending: PendingDelete) -> Result<(), DashboardError> {
        self.ensure_can_edit()?;
        let PendingDelete { kind, id } = pending;
        self.gateway
            .delete(&kind.record_path(&id))
            .await
            .map_err(|e| self.request_failed(&format!("Deleting {}", kind.singular()), e))?;
        tracing::info!(%kind, %id, "record deleted");
        self.after_mutation(kind, format!("{} deleted", kind.singular()))
            .await;
        Ok(())
    }

    async fn after_mutation(&self, kind: ResourceKind, message: String) {
        let unit = self.collection(kind);
        unit.set_credential(self.session.access_token());
        unit.refresh().await;

        let signal = self.refresh_signal.fetch_add(1, Ordering::SeqCst) + 1;
        unit.mark_synced(signal);
        self.reconcile_all().await;

        self.notify(NoticeLevel::Info, message);
    }

    fn ensure_can_edit(&self) -> Result<(), DashboardError> {
        match self.session.identity() {
            None => Err(DashboardError::NotSignedIn),
            Some(identity) if identity.can_edit || identity.is_admin => Ok(()),
            Some(_) => Err(DashboardError::Forbidden),
        }
    }

    fn request_failed(&self, action: &str, error: GatewayError) -> DashboardError {
        let err = if error.is_unauthorized() {
            DashboardError::SessionEnded
        } else {
            DashboardError::Request {
                action: action.to_string(),
                source: error,
            }
        };
        self.notify(NoticeLevel::Error, err.to_string());
        err
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        // No subscribers is fine.
        let _ = self.notices.send(Notice { level, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::encode_test_token;
    use crate::auth::MemoryCredentialStore;
    use serde_json::json;

    fn dashboard() -> Dashboard {
        let config = ConsoleConfig {
            api_url: "http://127.0.0.1:9".into(),
            ..ConsoleConfig::default()
        };
        Dashboard::new(&config, Arc::new(MemoryCredentialStore::new())).unwrap()
    }

    fn token(claims: Value) -> String {
        encode_test_token(&claims)
    }

    fn far_future() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn ready_after_construction() {
        let dashboard = dashboard();
        assert!(dashboard.session().is_ready());
        assert_eq!(dashboard.refresh_signal(), 0);
        for kind in ResourceKind::ALL {
            assert_eq!(
                dashboard.collection(kind).endpoint().as_deref(),
                Some(kind.endpoint())
            );
        }
    }

    #[test]
    fn staging_requires_sign_in() {
        let dashboard = dashboard();
        assert!(matches!(
            dashboard.stage_delete(ResourceKind::Users, "1"),
            Err(DashboardError::NotSignedIn)
        ));
    }

    #[test]
    fn staging_requires_edit_permission() {
        let dashboard = dashboard();
        dashboard
            .session()
            .login(&token(json!({ "exp": far_future(), "canEdit": false })), None)
            .unwrap();

        assert!(matches!(
            dashboard.stage_delete(ResourceKind::Events, "9"),
            Err(DashboardError::Forbidden)
        ));
    }

    #[test]
    fn staged_delete_carries_target() {
        let dashboard = dashboard();
        dashboard
            .session()
            .login(&token(json!({ "exp": far_future(), "canEdit": true })), None)
            .unwrap();

        let pending = dashboard.stage_delete(ResourceKind::Jobs, "42").unwrap();
        assert_eq!(pending.kind(), ResourceKind::Jobs);
        assert_eq!(pending.id(), "42");
        pending.cancel();
        assert_eq!(dashboard.refresh_signal(), 0);
    }

    #[tokio::test]
    async fn sign_out_clears_unit_credentials() {
        let dashboard = dashboard();
        dashboard
            .session()
            .login(&token(json!({ "exp": far_future() })), None)
            .unwrap();
        let users = dashboard.collection(ResourceKind::Users);
        users.set_credential(dashboard.session().access_token());

        dashboard.sign_out();
        assert!(dashboard.identity().is_none());
        assert_eq!(
            dashboard.collection(ResourceKind::Users).fetch().await,
            crate::sync::FetchOutcome::Idle
        );
    }
}
