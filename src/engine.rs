//! The feed engine: pagination, navigation, windowing, prefetch and playback
//! composed behind one imperative surface for the shell to drive.
//!
//! All timing is injected. Every entry point that can change what is on
//! screen takes `now` and ends in [`FeedEngine::sync`], which is the only
//! place the index, the mounted window, the active player and the prefetch
//! hints are reconciled with each other.

use std::time::{Duration, Instant};

use crate::config::{Config, NavigationConfig};
use crate::model::{Channel, FeedItem, FeedQuery};
use crate::navigation::{Direction, InputOrigin, Navigator, Step};
use crate::playback::{MediaFactory, PlaybackDeck, PlaybackState, RetryPolicy};
use crate::prefetch::{HintSink, PrefetchManager};
use crate::storage;
use crate::store::{FeedStore, Fetcher, StoreUpdate};
use crate::window::{mounted_range, Slot, WindowedRenderer};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub navigation: NavigationConfig,
    pub window_size: usize,
    pub prefetch_depth: usize,
    pub load_more_threshold: usize,
    pub empty_scope_notice: Duration,
    pub transition: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            navigation: cfg.navigation.clone(),
            window_size: cfg.feed.odd_window_size(),
            prefetch_depth: cfg.feed.prefetch_depth,
            load_more_threshold: cfg.feed.load_more_threshold,
            empty_scope_notice: cfg.feed.empty_scope_notice,
            transition: cfg.ui.transition,
            retry: RetryPolicy {
                max_retries: cfg.playback.auto_retries,
                delay: cfg.playback.retry_delay,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotView {
    pub slot: Slot,
    pub item: FeedItem,
    pub playback: PlaybackState,
    pub error: Option<String>,
}

/// Everything the shell needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedView {
    pub label: String,
    pub index: usize,
    pub len: usize,
    pub slots: Vec<SlotView>,
    pub toast: Option<String>,
    pub loading: bool,
    pub loaded: bool,
    pub muted: bool,
    pub end_of_feed: bool,
    pub load_error: Option<String>,
}

impl FeedView {
    pub fn is_empty(&self) -> bool {
        self.loaded && self.len == 0
    }

    pub fn active(&self) -> Option<&SlotView> {
        self.slots.iter().find(|slot| slot.slot.active)
    }
}

pub struct FeedEngine<F: Fetcher, S: HintSink> {
    store: FeedStore<F>,
    navigator: Navigator,
    window: WindowedRenderer,
    prefetch: PrefetchManager<S>,
    deck: PlaybackDeck,
    preferences: Option<storage::Store>,
    channels: Vec<Channel>,
    load_more_threshold: usize,
    initial_error: Option<String>,
}

impl<F: Fetcher, S: HintSink> FeedEngine<F, S> {
    pub fn new(
        fetcher: F,
        hints: S,
        media: Box<dyn MediaFactory>,
        preferences: Option<storage::Store>,
        options: EngineOptions,
        query: FeedQuery,
    ) -> Self {
        let muted = match preferences.as_ref().map(storage::Store::muted) {
            Some(Ok(muted)) => muted,
            Some(Err(err)) => {
                tracing::warn!(error = %format!("{err:#}"), "could not read mute preference");
                true
            }
            None => true,
        };
        Self {
            store: FeedStore::new(fetcher, query, options.empty_scope_notice),
            navigator: Navigator::new(&options.navigation),
            window: WindowedRenderer::new(options.window_size, options.transition),
            prefetch: PrefetchManager::new(hints, options.prefetch_depth),
            deck: PlaybackDeck::new(media, options.retry, muted),
            preferences,
            channels: Vec::new(),
            load_more_threshold: options.load_more_threshold,
            initial_error: None,
        }
    }

    pub fn store(&self) -> &FeedStore<F> {
        &self.store
    }

    pub fn deck(&self) -> &PlaybackDeck {
        &self.deck
    }

    pub fn prefetch(&self) -> &PrefetchManager<S> {
        &self.prefetch
    }

    pub fn index(&self) -> usize {
        self.navigator.index()
    }

    pub fn current(&self) -> Option<&FeedItem> {
        self.store.get(self.navigator.index())
    }

    pub fn query(&self) -> &FeedQuery {
        self.store.requested_query()
    }

    pub fn muted(&self) -> bool {
        self.deck.muted()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn set_channels(&mut self, channels: Vec<Channel>) {
        self.channels = channels;
    }

    /// Installs a first page fetched by the shell.
    pub fn render(&mut self, items: Vec<FeedItem>, cursor: Option<String>, now: Instant) {
        tracing::info!(items = items.len(), has_more = cursor.is_some(), "render initial page");
        self.initial_error = None;
        self.store.seed(items, cursor);
        self.navigator.reset();
        self.sync(now);
    }

    /// The shell could not fetch the first page.
    pub fn render_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "initial load failed");
        self.initial_error = Some(message);
    }

    /// Loads the first page of `query` through the store.
    pub fn start(&mut self, query: FeedQuery, now: Instant) {
        self.initial_error = None;
        self.replace(query, now);
    }

    pub fn wheel(&mut self, delta: f64, origin: InputOrigin, now: Instant) {
        let len = self.store.len();
        let step = self.navigator.wheel(delta, origin, now, len);
        self.apply(step, now);
    }

    pub fn touch_start(&mut self, y: f64, origin: InputOrigin) {
        self.navigator.touch_start(y, origin);
    }

    pub fn touch_end(&mut self, y: f64, origin: InputOrigin, now: Instant) {
        let len = self.store.len();
        let step = self.navigator.touch_end(y, origin, now, len);
        self.apply(step, now);
    }

    pub fn key(&mut self, direction: Direction, now: Instant) {
        let len = self.store.len();
        let step = self.navigator.key(direction, now, len);
        self.apply(step, now);
    }

    /// Tap on the active media.
    pub fn tap(&mut self) {
        if let Some(id) = self.current().map(|item| item.id.clone()) {
            self.deck.toggle(&id);
        }
    }

    pub fn retry(&mut self) {
        if let Some(id) = self.current().map(|item| item.id.clone()) {
            self.deck.retry(&id);
        }
    }

    pub fn toggle_mute(&mut self) -> bool {
        let muted = !self.deck.muted();
        self.deck.set_muted(muted);
        if let Some(preferences) = &self.preferences {
            if let Err(err) = preferences.set_muted(muted) {
                tracing::warn!(error = %format!("{err:#}"), "could not persist mute preference");
            }
        }
        muted
    }

    /// Scopes the feed to `channel`, or clears the scope with `None`.
    pub fn select_channel(&mut self, channel: Option<Channel>, now: Instant) {
        let variant = self.store.requested_query().variant;
        let query = match channel {
            Some(channel) => FeedQuery::scoped(variant, channel),
            None => FeedQuery::new(variant),
        };
        if &query == self.store.requested_query() {
            return;
        }
        self.replace(query, now);
    }

    pub fn toggle_variant(&mut self, now: Instant) {
        let current = self.store.requested_query();
        let query = FeedQuery {
            variant: current.variant.toggled(),
            channel: current.channel.clone(),
        };
        self.replace(query, now);
    }

    /// Drives time: fetch completions, the empty-scope revert, gesture timers
    /// and playback events.
    pub fn tick(&mut self, now: Instant) {
        let mut changed = false;
        for update in self.store.poll(now) {
            match update {
                StoreUpdate::Replaced => {
                    self.navigator.reset();
                    changed = true;
                }
                // Even a page of duplicates moved the cursor.
                StoreUpdate::Appended { .. } => changed = true,
                StoreUpdate::EmptyScope | StoreUpdate::Failed | StoreUpdate::Stale => {}
            }
        }
        if let Some(query) = self.store.tick(now) {
            tracing::info!(query = %query.label(), "reverting to unscoped feed");
            self.store.replace(query);
            self.navigator.reset();
            changed = true;
        }
        self.navigator.tick(now);
        if changed {
            self.sync(now);
        }
        self.deck.tick(now);
    }

    pub fn snapshot(&self, now: Instant) -> FeedView {
        let items = self.store.items();
        let slots = self
            .window
            .slots(now)
            .into_iter()
            .filter_map(|slot| {
                let item = items.get(slot.index).filter(|item| item.id == slot.id)?;
                let controller = self.deck.controller(&slot.id);
                Some(SlotView {
                    playback: controller.map_or(PlaybackState::Idle, |c| c.state()),
                    error: controller.and_then(|c| c.last_error()).map(str::to_string),
                    item: item.clone(),
                    slot,
                })
            })
            .collect();

        let load_error = self.load_error().map(str::to_string);

        FeedView {
            label: self.store.requested_query().label(),
            index: self.navigator.index(),
            len: self.store.len(),
            slots,
            toast: self.store.notice().map(|notice| notice.message.clone()),
            loading: self.store.is_loading(),
            loaded: self.store.is_loaded(),
            muted: self.deck.muted(),
            end_of_feed: self.store.is_loaded() && !self.store.has_more(),
            load_error,
        }
    }

    /// Set while no page has ever loaded for the current sequence.
    pub fn load_error(&self) -> Option<&str> {
        if let Some(message) = self.initial_error.as_deref() {
            return Some(message);
        }
        if self.store.is_loaded() {
            None
        } else {
            self.store.last_error()
        }
    }

    pub fn is_animating(&self, now: Instant) -> bool {
        self.window.is_animating(now)
    }

    /// A forward step at the tail retries pagination, which is how a failed
    /// `load_more` gets another chance.
    fn apply(&mut self, step: Step, now: Instant) {
        match step {
            Step::Moved(_) => self.sync(now),
            Step::Boundary(Direction::Forward) => self.load_more_near_end(),
            Step::Boundary(Direction::Back) | Step::Ignored => {}
        }
    }

    fn load_more_near_end(&mut self) {
        let remaining = self.store.len().saturating_sub(self.navigator.index());
        if self.store.has_more() && remaining < self.load_more_threshold {
            self.store.load_more();
        }
    }

    fn replace(&mut self, query: FeedQuery, now: Instant) {
        self.store.replace(query);
        self.navigator.reset();
        self.sync(now);
    }

    fn sync(&mut self, now: Instant) {
        let len = self.store.len();
        self.navigator.clamp(len);
        let index = self.navigator.index();
        let items = self.store.items();

        let diff = self.window.reconcile(items, index, now);
        for id in &diff.left {
            self.deck.unmount(id);
        }
        if !diff.entered.is_empty() {
            let range = mounted_range(index, len, self.window.size());
            for item in &items[range] {
                if diff.entered.contains(&item.id) {
                    self.deck.mount(item);
                }
            }
        }

        let active = items.get(index).map(|item| item.id.as_str());
        self.deck.set_active(active);
        self.prefetch.update(items, index);
        self.load_more_near_end();
    }
}

impl<F: Fetcher, S: HintSink> Drop for FeedEngine<F, S> {
    fn drop(&mut self) {
        self.prefetch.clear();
        self.deck.clear();
    }
}
