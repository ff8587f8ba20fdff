//! Server-backed collection synchronization.
//!
//! - [`CollectionSync`]: one paginated, searchable collection endpoint
//! - [`StatsSync`]: one summary object
//! - [`extract_page`]: the list-response adapter both rely on
//!
//! Units re-fetch through an explicit `reconcile` call: the driver (CLI loop,
//! UI framework, event bus) hands in the current refresh signal and the unit
//! compares its inputs against the last run.

pub mod collection;
pub mod shape;
pub mod stats;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::gateway::{GatewayError, HttpGateway};

pub use collection::{CollectionSync, FetchOutcome, PageState};
pub use shape::{extract_page, PageEnvelope};
pub use stats::{StatsSnapshot, StatsSync};

/// Read access the synchronization units need from the API.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// GET `path` with `query`, sending `credential` in the auth header.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        credential: &str,
    ) -> Result<Value, GatewayError>;
}

#[async_trait]
impl ResourceClient for HttpGateway {
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        credential: &str,
    ) -> Result<Value, GatewayError> {
        self.send_as(Method::GET, path, query, None, Some(credential))
            .await
    }
}

/// Hands out request generations and records the newest one applied.
#[derive(Debug, Default)]
pub(crate) struct Generations {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl Generations {
    pub(crate) fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Claim `generation` for applying. False when a newer response was
    /// already applied. Call under the unit's state lock.
    pub(crate) fn try_apply(&self, generation: u64) -> bool {
        self.applied.fetch_max(generation, Ordering::SeqCst) < generation
    }
}
