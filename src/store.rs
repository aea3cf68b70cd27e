use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::data::FeedService;
use crate::model::{FeedItem, FeedPage, FeedQuery};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadMode {
    Replace,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub generation: u64,
    pub mode: LoadMode,
    pub query: FeedQuery,
    pub cursor: Option<String>,
}

#[derive(Debug)]
pub struct FetchResponse {
    pub generation: u64,
    pub mode: LoadMode,
    pub result: Result<FeedPage>,
}

impl FetchResponse {
    pub fn for_request(request: &FetchRequest, result: Result<FeedPage>) -> Self {
        Self {
            generation: request.generation,
            mode: request.mode,
            result,
        }
    }
}

/// Transport for page requests. Completions are drained by
/// [`FeedStore::poll`] on the caller's thread.
pub trait Fetcher {
    fn submit(&self, request: FetchRequest);
    fn try_recv(&self) -> Option<FetchResponse>;
}

/// Runs each request on its own thread against a [`FeedService`].
pub struct ThreadedFetcher {
    service: Arc<dyn FeedService>,
    tx: Sender<FetchResponse>,
    rx: Receiver<FetchResponse>,
}

impl ThreadedFetcher {
    pub fn new(service: Arc<dyn FeedService>) -> Self {
        let (tx, rx) = unbounded();
        Self { service, tx, rx }
    }
}

impl Fetcher for ThreadedFetcher {
    fn submit(&self, request: FetchRequest) {
        let service = self.service.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = service.load_page(&request.query, request.cursor.as_deref());
            let _ = tx.send(FetchResponse::for_request(&request, result));
        });
    }

    fn try_recv(&self) -> Option<FetchResponse> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub expires_at: Instant,
    revert_to: Option<FeedQuery>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUpdate {
    Replaced,
    Appended { added: usize },
    EmptyScope,
    Failed,
    Stale,
}

#[derive(Debug, Clone)]
struct InFlight {
    generation: u64,
    mode: LoadMode,
    query: FeedQuery,
}

/// Owns the item list and continuation cursor. `query` is always the query
/// whose page sequence `items` and `cursor` belong to.
pub struct FeedStore<F: Fetcher> {
    fetcher: F,
    items: Vec<FeedItem>,
    ids: HashSet<String>,
    cursor: Option<String>,
    query: FeedQuery,
    generation: u64,
    in_flight: Option<InFlight>,
    notice: Option<Notice>,
    notice_duration: Duration,
    last_error: Option<String>,
    loaded: bool,
}

impl<F: Fetcher> FeedStore<F> {
    pub fn new(fetcher: F, query: FeedQuery, notice_duration: Duration) -> Self {
        Self {
            fetcher,
            items: Vec::new(),
            ids: HashSet::new(),
            cursor: None,
            query,
            generation: 0,
            in_flight: None,
            notice: None,
            notice_duration,
            last_error: None,
            loaded: false,
        }
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FeedItem> {
        self.items.get(index)
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn query(&self) -> &FeedQuery {
        &self.query
    }

    /// The query the user asked for most recently, which may still be loading.
    pub fn requested_query(&self) -> &FeedQuery {
        match &self.in_flight {
            Some(pending) if pending.mode == LoadMode::Replace => &pending.query,
            _ => &self.query,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Installs an already-fetched first page, discarding anything in flight.
    pub fn seed(&mut self, items: Vec<FeedItem>, cursor: Option<String>) {
        self.generation = self.generation.wrapping_add(1);
        self.in_flight = None;
        self.install(items, cursor);
    }

    /// Starts a fresh page sequence for `query`. Supersedes any fetch in
    /// flight: its response will be discarded when it lands.
    pub fn replace(&mut self, query: FeedQuery) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(notice) = self.notice.as_mut() {
            notice.revert_to = None;
        }
        let request = FetchRequest {
            generation: self.generation,
            mode: LoadMode::Replace,
            query: query.clone(),
            cursor: None,
        };
        tracing::debug!(generation = request.generation, query = %query.label(), "replace feed");
        self.in_flight = Some(InFlight {
            generation: request.generation,
            mode: LoadMode::Replace,
            query,
        });
        self.fetcher.submit(request);
    }

    /// Requests the next page. Returns `false` without issuing anything when
    /// the stream has ended or a fetch is already in flight.
    pub fn load_more(&mut self) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        let Some(cursor) = self.cursor.clone() else {
            return false;
        };
        let request = FetchRequest {
            generation: self.generation,
            mode: LoadMode::Append,
            query: self.query.clone(),
            cursor: Some(cursor),
        };
        tracing::debug!(generation = request.generation, cursor = ?request.cursor, "load more");
        self.in_flight = Some(InFlight {
            generation: request.generation,
            mode: LoadMode::Append,
            query: self.query.clone(),
        });
        self.fetcher.submit(request);
        true
    }

    pub fn poll(&mut self, now: Instant) -> Vec<StoreUpdate> {
        let mut updates = Vec::new();
        while let Some(response) = self.fetcher.try_recv() {
            updates.push(self.complete(response, now));
        }
        updates
    }

    pub fn complete(&mut self, response: FetchResponse, now: Instant) -> StoreUpdate {
        let matches = self.in_flight.as_ref().is_some_and(|pending| {
            pending.generation == response.generation && pending.mode == response.mode
        });
        if !matches {
            tracing::debug!(
                generation = response.generation,
                current = self.generation,
                "discarding stale page"
            );
            return StoreUpdate::Stale;
        }
        let Some(pending) = self.in_flight.take() else {
            return StoreUpdate::Stale;
        };

        let page = match response.result {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), mode = ?pending.mode, "feed fetch failed");
                self.last_error = Some(format!("{err:#}"));
                return StoreUpdate::Failed;
            }
        };

        match pending.mode {
            LoadMode::Replace => {
                if page.items.is_empty() {
                    if let Some(channel) = pending.query.channel.as_ref() {
                        tracing::info!(channel = %channel.id, "scoped feed empty, reverting");
                        self.notice = Some(Notice {
                            message: format!("No videos in {}", channel.name),
                            expires_at: now + self.notice_duration,
                            revert_to: Some(pending.query.unscoped()),
                        });
                        return StoreUpdate::EmptyScope;
                    }
                }
                self.query = pending.query;
                self.install(page.items, page.next_cursor);
                StoreUpdate::Replaced
            }
            LoadMode::Append => {
                let before = self.items.len();
                for item in page.items {
                    if self.ids.insert(item.id.clone()) {
                        self.items.push(item);
                    }
                }
                self.cursor = page.next_cursor;
                self.last_error = None;
                let added = self.items.len() - before;
                tracing::debug!(added, total = self.items.len(), "appended page");
                StoreUpdate::Appended { added }
            }
        }
    }

    /// Expires the empty-scope notice. Returns the query to revert to when
    /// one is due.
    pub fn tick(&mut self, now: Instant) -> Option<FeedQuery> {
        if self
            .notice
            .as_ref()
            .is_some_and(|notice| now >= notice.expires_at)
        {
            return self.notice.take().and_then(|notice| notice.revert_to);
        }
        None
    }

    fn install(&mut self, items: Vec<FeedItem>, cursor: Option<String>) {
        self.ids.clear();
        self.items.clear();
        for item in items {
            if self.ids.insert(item.id.clone()) {
                self.items.push(item);
            }
        }
        self.cursor = cursor;
        self.loaded = true;
        self.last_error = None;
    }
}
