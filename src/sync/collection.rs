//! Resource synchronization unit for one paginated collection.
//!
//! Inputs: endpoint, credential, page, search term, refresh signal. A fetch
//! runs when [`CollectionSync::reconcile`] sees any of them differ from the
//! last run, or unconditionally through [`CollectionSync::refresh`].
//!
//! Each fetch is tagged with a generation. A response is dropped only when a
//! newer one has already been applied, so an older page never overwrites a
//! newer one. If the newer fetch fails, a late older response still lands.
//! In-flight requests are never cancelled.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::shape::extract_page;
use super::{Generations, ResourceClient};

/// Snapshot of a unit's page state.
#[derive(Debug, Clone, PartialEq)]
pub struct PageState {
    pub items: Vec<Value>,
    /// 1-based.
    pub page: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub search: String,
    pub is_loading: bool,
}

/// What a single fetch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Endpoint or credential missing; nothing was sent.
    Idle,
    Applied,
    /// A newer fetch was issued before this one landed.
    Stale,
    /// Request or decode failed; previous items kept.
    Failed,
}

/// Inputs of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Trigger {
    endpoint: Option<String>,
    credential: Option<String>,
    page: u32,
    search: String,
    signal: u64,
}

struct Inner {
    endpoint: Option<String>,
    credential: Option<String>,
    page: u32,
    search: String,
    items: Vec<Value>,
    total_pages: u32,
    total_items: u64,
    last_trigger: Option<Trigger>,
}

impl Inner {
    fn trigger(&self, signal: u64) -> Trigger {
        Trigger {
            endpoint: self.endpoint.clone(),
            credential: self.credential.clone(),
            page: self.page,
            search: self.search.clone(),
            signal,
        }
    }
}

pub struct CollectionSync {
    client: Arc<dyn ResourceClient>,
    page_size: u32,
    inner: Mutex<Inner>,
    generations: Generations,
    in_flight: AtomicUsize,
}

impl CollectionSync {
    pub fn new(client: Arc<dyn ResourceClient>, page_size: u32) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
            inner: Mutex::new(Inner {
                endpoint: None,
                credential: None,
                page: 1,
                search: String::new(),
                items: Vec::new(),
                total_pages: 1,
                total_items: 0,
                last_trigger: None,
            }),
            generations: Generations::default(),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_endpoint(self, endpoint: impl Into<String>) -> Self {
        self.inner.lock().endpoint = Some(endpoint.into());
        self
    }

    // ── Setters ─────────────────────────────────────────────────────

    pub fn set_endpoint(&self, endpoint: Option<String>) {
        self.inner.lock().endpoint = endpoint;
    }

    pub fn set_credential(&self, credential: Option<String>) {
        self.inner.lock().credential = credential;
    }

    /// Pages are 1-based; 0 is treated as 1. The upper bound is the caller's
    /// business (see [`next_page`](Self::next_page)).
    pub fn set_page(&self, page: u32) {
        self.inner.lock().page = page.max(1);
    }

    /// A different term moves back to page 1; the same term keeps the page.
    pub fn set_search(&self, term: impl Into<String>) {
        let term = term.into();
        let mut inner = self.inner.lock();
        if inner.search != term {
            inner.search = term;
            inner.page = 1;
        }
    }

    /// Advance one page, stopping at the last page the server reported.
    pub fn next_page(&self) -> u32 {
        let mut inner = self.inner.lock();
        if inner.page < inner.total_pages {
            inner.page += 1;
        }
        inner.page
    }

    pub fn prev_page(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.page = inner.page.saturating_sub(1).max(1);
        inner.page
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn snapshot(&self) -> PageState {
        let inner = self.inner.lock();
        PageState {
            items: inner.items.clone(),
            page: inner.page,
            total_pages: inner.total_pages,
            total_items: inner.total_items,
            search: inner.search.clone(),
            is_loading: self.is_loading(),
        }
    }

    pub fn items(&self) -> Vec<Value> {
        self.inner.lock().items.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn endpoint(&self) -> Option<String> {
        self.inner.lock().endpoint.clone()
    }

    // ── Sync ────────────────────────────────────────────────────────

    /// Fetch if any input or the refresh signal changed since the last
    /// reconcile. Returns whether a fetch was attempted.
    pub async fn reconcile(&self, signal: u64) -> bool {
        {
            let mut inner = self.inner.lock();
            let trigger = inner.trigger(signal);
            if inner.last_trigger.as_ref() == Some(&trigger) {
                return false;
            }
            inner.last_trigger = Some(trigger);
        }
        self.fetch().await;
        true
    }

    /// Record the current inputs under `signal` as already synchronized.
    /// Used after a direct [`refresh`](Self::refresh) so the following
    /// signal bump does not fetch the same page twice.
    pub fn mark_synced(&self, signal: u64) {
        let mut inner = self.inner.lock();
        let trigger = inner.trigger(signal);
        inner.last_trigger = Some(trigger);
    }

    /// Fetch now, regardless of what changed.
    pub async fn refresh(&self) -> FetchOutcome {
        self.fetch().await
    }

    /// One paginated GET. Idle when endpoint or credential is missing.
    pub async fn fetch(&self) -> FetchOutcome {
        let (endpoint, credential, query) = {
            let inner = self.inner.lock();
            let (Some(endpoint), Some(credential)) = (&inner.endpoint, &inner.credential) else {
                return FetchOutcome::Idle;
            };
            let query = vec![
                ("page", inner.page.to_string()),
                ("limit", self.page_size.to_string()),
                ("search", inner.search.clone()),
            ];
            (endpoint.clone(), credential.clone(), query)
        };

        let generation = self.generations.issue();
        let _loading = LoadingGuard::enter(&self.in_flight);

        let body = match self.client.get_json(&endpoint, &query, &credential).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    endpoint = %endpoint,
                    error = %e,
                    "collection fetch failed; keeping previous items"
                );
                return FetchOutcome::Failed;
            }
        };

        let page = extract_page(&body);
        let mut inner = self.inner.lock();
        if !self.generations.try_apply(generation) {
            tracing::debug!(endpoint = %endpoint, generation, "dropping stale collection response");
            return FetchOutcome::Stale;
        }
        tracing::debug!(
            endpoint = %endpoint,
            items = page.items.len(),
            total_pages = page.total_pages,
            total_items = page.total_items,
            "collection synchronized"
        );
        inner.items = page.items;
        inner.total_pages = page.total_pages;
        inner.total_items = page.total_items;
        FetchOutcome::Applied
    }
}

/// Keeps `is_loading` true while alive; released on every exit path.
struct LoadingGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> LoadingGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
