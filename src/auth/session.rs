//! Session controller.
//!
//! States: `Unauthenticated` → `Authenticated` ⇄ `Renewing`.
//!
//! - `login` decodes first and fails closed: an unusable credential leaves
//!   the controller signed out with an empty store.
//! - `initialize` restores a stored credential exactly once and marks the
//!   controller ready whatever the outcome.
//! - While authenticated, a cancellable task checks expiry every
//!   `check_interval` and renews through the [`TokenRenewer`] once the
//!   remaining lifetime drops under `threshold`. A failed renewal is only
//!   logged; the next 401/403 seen by the gateway ends the session.

use parking_lot::{Mutex, Once};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::client::TokenRenewer;
use super::clock::Clock;
use super::store::{CredentialStore, StoreError};
use super::token::{decode_live_identity, Identity, TokenError};
use crate::gateway::CredentialSource;

/// Default expiry check period: 2 minutes.
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 120;

/// Default renewal threshold: 5 minutes of remaining lifetime.
const DEFAULT_RENEW_THRESHOLD_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// Authenticated, with a renewal request in flight.
    Renewing,
}

impl SessionState {
    pub fn is_authenticated(self) -> bool {
        !matches!(self, Self::Unauthenticated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalPolicy {
    pub check_interval: Duration,
    pub threshold: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            threshold: Duration::from_secs(DEFAULT_RENEW_THRESHOLD_SECS),
        }
    }
}

/// Result of one expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// Nobody is signed in.
    Idle,
    NotDue,
    /// Due, but no renewal credential is stored.
    NoRenewalCredential,
    Renewed,
    /// The renewal endpoint failed; the credential is left to lapse.
    Failed,
    /// The credential had already expired; the session was ended.
    Expired,
    /// The session changed while the renewal was in flight; result dropped.
    Superseded,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("credential rejected: {0}")]
    Credential(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct Inner {
    state: SessionState,
    identity: Option<Identity>,
    /// Bumped by every login and logout. A renewal started under an older
    /// epoch is discarded when it lands.
    epoch: u64,
    renewal_task: Option<CancellationToken>,
}

/// Owns the current identity and the renewal schedule.
pub struct SessionController {
    store: Arc<dyn CredentialStore>,
    renewer: Arc<dyn TokenRenewer>,
    clock: Arc<dyn Clock>,
    policy: RenewalPolicy,
    inner: Mutex<Inner>,
    init: Once,
    state_tx: watch::Sender<SessionState>,
    this: Weak<SessionController>,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        renewer: Arc<dyn TokenRenewer>,
        clock: Arc<dyn Clock>,
        policy: RenewalPolicy,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        Arc::new_cyclic(|this| Self {
            store,
            renewer,
            clock,
            policy,
            inner: Mutex::new(Inner {
                state: SessionState::Unauthenticated,
                identity: None,
                epoch: 0,
                renewal_task: None,
            }),
            init: Once::new(),
            state_tx,
            this: this.clone(),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Restore the stored credential. Runs once; later calls return
    /// immediately, concurrent callers wait for the first to finish.
    pub fn initialize(&self) {
        self.init.call_once(|| self.restore());
    }

    /// True once [`initialize`](Self::initialize) has completed. Protected
    /// views must not render before this.
    pub fn is_ready(&self) -> bool {
        self.init.state().done()
    }

    /// Start a session with a freshly issued credential.
    pub fn login(&self, access: &str, renewal: Option<&str>) -> Result<Identity, SessionError> {
        let identity = match decode_live_identity(access, self.clock.now()) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(reason = %e, "login rejected: credential unusable");
                self.end_session();
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.save(access, renewal) {
            tracing::warn!(error = %e, "login aborted: could not persist credential");
            self.end_session();
            return Err(e.into());
        }

        tracing::info!(
            subject = ?identity.subject,
            expires_at = %identity.expires_at,
            renewable = renewal.is_some(),
            "signed in"
        );
        self.enter_authenticated(identity.clone());
        Ok(identity)
    }

    /// End the session. Safe to call when already signed out.
    pub fn logout(&self) {
        let was_signed_in = self.state().is_authenticated();
        self.end_session();
        if was_signed_in {
            tracing::info!("signed out");
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn identity(&self) -> Option<Identity> {
        self.inner.lock().identity.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// Observe state changes, including logouts forced by the gateway.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn has_renewal_task(&self) -> bool {
        self.inner.lock().renewal_task.is_some()
    }

    pub fn policy(&self) -> &RenewalPolicy {
        &self.policy
    }

    // ── Renewal ─────────────────────────────────────────────────────

    /// One expiry check. The scheduled task calls this every
    /// `check_interval`; tests call it directly.
    pub async fn check_expiry(&self) -> RenewalOutcome {
        let (expires_at, epoch) = {
            let inner = self.inner.lock();
            match (&inner.identity, inner.state) {
                (Some(identity), SessionState::Authenticated) => (identity.expires_at, inner.epoch),
                _ => return RenewalOutcome::Idle,
            }
        };

        let now = self.clock.now();
        if expires_at <= now {
            tracing::info!(%expires_at, "access credential expired; ending session");
            self.end_session();
            return RenewalOutcome::Expired;
        }

        let threshold =
            chrono::Duration::from_std(self.policy.threshold).unwrap_or(chrono::Duration::MAX);
        let remaining = expires_at - now;
        if remaining >= threshold {
            return RenewalOutcome::NotDue;
        }

        let renewal = match self.store.load() {
            Ok(stored) => stored.renewal,
            Err(e) => {
                tracing::warn!(error = %e, "could not read renewal credential");
                None
            }
        };
        let Some(renewal) = renewal else {
            tracing::debug!(
                remaining_secs = remaining.num_seconds(),
                "credential near expiry but no renewal credential stored"
            );
            return RenewalOutcome::NoRenewalCredential;
        };

        if !self.transition(epoch, SessionState::Renewing) {
            return RenewalOutcome::Superseded;
        }
        tracing::debug!(remaining_secs = remaining.num_seconds(), "renewing access credential");

        match self.renewer.renew(&renewal).await {
            Ok(grant) => self.apply_renewal(epoch, &grant.token, &renewal),
            Err(e) => {
                if !self.transition(epoch, SessionState::Authenticated) {
                    return RenewalOutcome::Superseded;
                }
                tracing::warn!(error = %e, "silent renewal failed; credential will lapse");
                RenewalOutcome::Failed
            }
        }
    }

    fn apply_renewal(&self, epoch: u64, access: &str, renewal: &str) -> RenewalOutcome {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            tracing::debug!("renewal landed after the session changed; discarding");
            return RenewalOutcome::Superseded;
        }

        let outcome = match decode_live_identity(access, self.clock.now()) {
            Ok(identity) => match self.store.save(access, Some(renewal)) {
                Ok(()) => {
                    tracing::info!(expires_at = %identity.expires_at, "access credential renewed");
                    inner.identity = Some(identity);
                    RenewalOutcome::Renewed
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not persist renewed credential");
                    RenewalOutcome::Failed
                }
            },
            Err(e) => {
                tracing::warn!(reason = %e, "renewal returned an unusable credential");
                RenewalOutcome::Failed
            }
        };
        inner.state = SessionState::Authenticated;
        drop(inner);

        self.publish(SessionState::Authenticated);
        outcome
    }

    // ── Internals ───────────────────────────────────────────────────

    fn restore(&self) {
        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "could not read stored credential; starting signed out");
                return;
            }
        };
        let Some(access) = stored.access else {
            tracing::debug!("no stored credential");
            return;
        };

        match decode_live_identity(&access, self.clock.now()) {
            Ok(identity) => {
                tracing::info!(
                    subject = ?identity.subject,
                    expires_at = %identity.expires_at,
                    "restored stored session"
                );
                self.enter_authenticated(identity);
            }
            Err(e) => {
                tracing::info!(reason = %e, "stored credential unusable; clearing");
                self.end_session();
            }
        }
    }

    fn enter_authenticated(&self, identity: Identity) {
        {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            inner.identity = Some(identity);
            inner.state = SessionState::Authenticated;
        }
        self.publish(SessionState::Authenticated);
        self.ensure_renewal_task();
    }

    fn end_session(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear stored credential");
        }
        let task = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            inner.identity = None;
            inner.state = SessionState::Unauthenticated;
            inner.renewal_task.take()
        };
        if let Some(task) = task {
            task.cancel();
        }
        self.publish(SessionState::Unauthenticated);
    }

    /// Move between `Authenticated` and `Renewing` if the session is still
    /// the one identified by `epoch`.
    fn transition(&self, epoch: u64, state: SessionState) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.identity.is_none() {
                return false;
            }
            inner.state = state;
        }
        self.publish(state);
        true
    }

    fn publish(&self, state: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn ensure_renewal_task(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime; renewal task not started");
            return;
        };

        let cancel = {
            let mut inner = self.inner.lock();
            if inner.renewal_task.is_some() || inner.state == SessionState::Unauthenticated {
                return;
            }
            let cancel = CancellationToken::new();
            inner.renewal_task = Some(cancel.clone());
            cancel
        };

        let session = self.this.clone();
        let period = self.policy.check_interval;
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(session) = session.upgrade() else { break };
                        session.check_expiry().await;
                    }
                }
            }
            tracing::debug!("renewal task stopped");
        });
    }
}

impl CredentialSource for SessionController {
    fn access_token(&self) -> Option<String> {
        match self.store.load() {
            Ok(stored) => stored.access,
            Err(e) => {
                tracing::warn!(error = %e, "could not read access credential");
                None
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(task) = self.inner.get_mut().renewal_task.take() {
            task.cancel();
        }
    }
}
