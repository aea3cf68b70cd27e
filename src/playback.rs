//! Per-item playback state machines and the single audible slot.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::model::{FeedItem, MediaKind};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("playback rejected: {0}")]
    PlayRejected(String),
    #[error("no media attached")]
    NotAttached,
    #[error("failed to start player: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("player ipc: {0}")]
    Ipc(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Enough of the source (or the manifest) is loaded to start.
    Ready,
    Error { fatal: bool, message: String },
    /// The element went away on its own, e.g. the player window was closed.
    Closed,
}

/// A single media output. Implementations must stop producing audio when
/// paused and must not emit events after `release`.
pub trait MediaElement {
    fn attach(&mut self, url: &str, kind: MediaKind) -> Result<(), MediaError>;
    fn play(&mut self) -> Result<(), MediaError>;
    fn pause(&mut self);
    fn rewind(&mut self);
    fn set_muted(&mut self, muted: bool);
    fn reload(&mut self) -> Result<(), MediaError>;
    fn release(&mut self);
    fn poll_event(&mut self) -> Option<MediaEvent>;
}

pub trait MediaFactory {
    fn create(&mut self, item: &FeedItem) -> Box<dyn MediaElement>;
}

impl<F> MediaFactory for F
where
    F: FnMut(&FeedItem) -> Box<dyn MediaElement>,
{
    fn create(&mut self, item: &FeedItem) -> Box<dyn MediaElement> {
        self(item)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_secs(1),
        }
    }
}

pub struct PlaybackController {
    item_id: String,
    url: String,
    kind: MediaKind,
    element: Box<dyn MediaElement>,
    policy: RetryPolicy,
    state: PlaybackState,
    attached: bool,
    active: bool,
    play_requested: bool,
    muted: bool,
    retries: u32,
    retry_at: Option<Instant>,
    last_error: Option<String>,
}

impl PlaybackController {
    pub fn new(item: &FeedItem, element: Box<dyn MediaElement>, policy: RetryPolicy) -> Self {
        Self {
            item_id: item.id.clone(),
            url: item.media_url.clone(),
            kind: item.media_kind(),
            element,
            policy,
            state: PlaybackState::Idle,
            attached: false,
            active: false,
            play_requested: false,
            muted: true,
            retries: 0,
            retry_at: None,
            last_error: None,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True when the controller is waiting only for the audible slot.
    pub fn ready_to_play(&self) -> bool {
        self.active
            && self.play_requested
            && matches!(self.state, PlaybackState::Ready | PlaybackState::Paused)
    }

    pub fn activate(&mut self, muted: bool) {
        self.active = true;
        self.muted = muted;
        match self.state {
            PlaybackState::Idle => {
                self.play_requested = true;
                self.begin_load();
            }
            PlaybackState::Errored => {}
            _ => self.play_requested = true,
        }
    }

    /// Leaves the active slot: stops output and rewinds so the next
    /// activation starts from zero. A load still in progress is abandoned.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.play_requested = false;
        self.retry_at = None;
        match self.state {
            PlaybackState::Playing | PlaybackState::Ready | PlaybackState::Paused => {
                self.element.pause();
                self.element.rewind();
                self.transition(PlaybackState::Paused);
            }
            PlaybackState::Loading => {
                self.release_element();
                self.transition(PlaybackState::Idle);
            }
            PlaybackState::Idle | PlaybackState::Errored => {}
        }
    }

    /// Called once the arbiter has granted the audible slot.
    pub fn start_playing(&mut self) -> Result<(), MediaError> {
        if !self.attached {
            return Err(MediaError::NotAttached);
        }
        self.element.set_muted(self.muted);
        match self.element.play() {
            Ok(()) => {
                self.transition(PlaybackState::Playing);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(item = %self.item_id, error = %err, "play rejected");
                self.last_error = Some(err.to_string());
                self.play_requested = false;
                self.transition(PlaybackState::Errored);
                Err(err)
            }
        }
    }

    /// Revocation of the audible slot. Keeps the position.
    pub fn stop(&mut self) {
        if self.state == PlaybackState::Playing {
            self.element.pause();
            self.transition(PlaybackState::Paused);
        }
    }

    /// Tap on the media.
    pub fn toggle(&mut self) {
        match self.state {
            PlaybackState::Playing => {
                self.play_requested = false;
                self.element.pause();
                self.transition(PlaybackState::Paused);
            }
            PlaybackState::Paused | PlaybackState::Ready | PlaybackState::Loading => {
                self.play_requested = true;
            }
            PlaybackState::Idle => {
                self.play_requested = true;
                self.begin_load();
            }
            PlaybackState::Errored => self.retry(),
        }
    }

    /// Manual retry: fresh retry budget, reload and play.
    pub fn retry(&mut self) {
        self.retries = 0;
        self.retry_at = None;
        self.last_error = None;
        self.play_requested = true;
        if !self.attached {
            self.begin_load();
            return;
        }
        match self.element.reload() {
            Ok(()) => self.transition(PlaybackState::Loading),
            Err(err) => self.fail(err.to_string()),
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if self.attached {
            self.element.set_muted(muted);
        }
    }

    /// Drains element events and fires a due retry.
    pub fn tick(&mut self, now: Instant) {
        while let Some(event) = self.element.poll_event() {
            self.handle_event(event, now);
        }
        if self.retry_at.is_some_and(|at| now >= at) {
            self.retry_at = None;
            tracing::info!(item = %self.item_id, attempt = self.retries, "reloading media");
            if let Err(err) = self.element.reload() {
                self.fail(err.to_string());
            }
        }
    }

    pub fn handle_event(&mut self, event: MediaEvent, now: Instant) {
        if !self.attached {
            return;
        }
        match event {
            MediaEvent::Ready => {
                if self.state == PlaybackState::Loading && self.retry_at.is_none() {
                    self.transition(PlaybackState::Ready);
                }
            }
            MediaEvent::Error { fatal, message } => self.on_error(fatal, message, now),
            MediaEvent::Closed => {
                tracing::info!(item = %self.item_id, "media closed");
                self.play_requested = false;
                self.retry_at = None;
                self.release_element();
                self.transition(PlaybackState::Idle);
            }
        }
    }

    fn on_error(&mut self, fatal: bool, message: String, now: Instant) {
        if matches!(self.state, PlaybackState::Idle | PlaybackState::Errored) {
            return;
        }
        match self.kind {
            MediaKind::Adaptive if fatal => self.fail(message),
            MediaKind::Adaptive => {
                tracing::debug!(item = %self.item_id, %message, "recoverable stream error");
            }
            MediaKind::Progressive if self.retries < self.policy.max_retries => {
                self.retries += 1;
                self.last_error = Some(message);
                self.retry_at = Some(now + self.policy.delay);
                tracing::info!(
                    item = %self.item_id,
                    attempt = self.retries,
                    max = self.policy.max_retries,
                    "media error, scheduling reload"
                );
                self.transition(PlaybackState::Loading);
            }
            MediaKind::Progressive => self.fail(message),
        }
    }

    fn fail(&mut self, message: String) {
        tracing::warn!(item = %self.item_id, error = %message, "playback failed");
        self.last_error = Some(message);
        self.retry_at = None;
        self.play_requested = false;
        self.element.pause();
        self.transition(PlaybackState::Errored);
    }

    fn begin_load(&mut self) {
        match self.element.attach(&self.url, self.kind) {
            Ok(()) => {
                self.attached = true;
                self.element.set_muted(self.muted);
                self.transition(PlaybackState::Loading);
            }
            Err(err) => {
                self.attached = false;
                self.fail(err.to_string());
            }
        }
    }

    fn release_element(&mut self) {
        if self.attached {
            self.element.release();
            self.attached = false;
        }
    }

    fn transition(&mut self, next: PlaybackState) {
        if self.state != next {
            tracing::debug!(item = %self.item_id, from = ?self.state, to = ?next, "playback");
            self.state = next;
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.release_element();
    }
}

/// Owner of the one audible slot.
#[derive(Debug, Default)]
pub struct PlaybackArbiter {
    holder: Option<String>,
}

impl PlaybackArbiter {
    pub fn holder(&self) -> Option<&str> {
        self.holder.as_deref()
    }

    /// Grants the slot to `id`, returning the previous holder that the
    /// caller must stop before `id` starts.
    pub fn acquire(&mut self, id: &str) -> Option<String> {
        if self.holder.as_deref() == Some(id) {
            return None;
        }
        self.holder.replace(id.to_string())
    }

    pub fn release(&mut self, id: &str) {
        if self.holder.as_deref() == Some(id) {
            self.holder = None;
        }
    }
}

/// All mounted controllers plus the arbiter and the shared mute flag.
pub struct PlaybackDeck {
    factory: Box<dyn MediaFactory>,
    policy: RetryPolicy,
    controllers: HashMap<String, PlaybackController>,
    arbiter: PlaybackArbiter,
    active: Option<String>,
    muted: bool,
}

impl PlaybackDeck {
    pub fn new(factory: Box<dyn MediaFactory>, policy: RetryPolicy, muted: bool) -> Self {
        Self {
            factory,
            policy,
            controllers: HashMap::new(),
            arbiter: PlaybackArbiter::default(),
            active: None,
            muted,
        }
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn holder(&self) -> Option<&str> {
        self.arbiter.holder()
    }

    pub fn state(&self, id: &str) -> Option<PlaybackState> {
        self.controllers.get(id).map(PlaybackController::state)
    }

    pub fn controller(&self, id: &str) -> Option<&PlaybackController> {
        self.controllers.get(id)
    }

    pub fn mounted(&self) -> usize {
        self.controllers.len()
    }

    pub fn playing_count(&self) -> usize {
        self.controllers
            .values()
            .filter(|c| c.state() == PlaybackState::Playing)
            .count()
    }

    pub fn mount(&mut self, item: &FeedItem) {
        if self.controllers.contains_key(&item.id) {
            return;
        }
        let element = self.factory.create(item);
        let controller = PlaybackController::new(item, element, self.policy);
        self.controllers.insert(item.id.clone(), controller);
    }

    pub fn unmount(&mut self, id: &str) {
        self.arbiter.release(id);
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        if self.controllers.remove(id).is_some() {
            tracing::debug!(item = %id, "unmounted");
        }
    }

    pub fn clear(&mut self) {
        self.active = None;
        self.arbiter = PlaybackArbiter::default();
        self.controllers.clear();
    }

    /// Moves the active slot. Every other controller is paused and rewound
    /// before the new one is allowed to start.
    pub fn set_active(&mut self, id: Option<&str>) {
        for (key, controller) in self.controllers.iter_mut() {
            if Some(key.as_str()) != id && (controller.is_active() || controller.state() == PlaybackState::Playing) {
                controller.deactivate();
                self.arbiter.release(key);
            }
        }
        self.active = id.map(str::to_string);
        if let Some(controller) = id.and_then(|id| self.controllers.get_mut(id)) {
            if !controller.is_active() {
                controller.activate(self.muted);
            }
        }
        self.sync();
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        for controller in self.controllers.values_mut() {
            controller.set_muted(muted);
        }
    }

    pub fn toggle(&mut self, id: &str) {
        if let Some(controller) = self.controllers.get_mut(id) {
            controller.toggle();
        }
        self.sync();
    }

    pub fn retry(&mut self, id: &str) {
        if let Some(controller) = self.controllers.get_mut(id) {
            controller.retry();
        }
        self.sync();
    }

    pub fn tick(&mut self, now: Instant) {
        for controller in self.controllers.values_mut() {
            controller.tick(now);
        }
        self.sync();
    }

    fn sync(&mut self) {
        let stopped: Vec<String> = self
            .controllers
            .iter()
            .filter(|(_, c)| c.state() != PlaybackState::Playing)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stopped {
            self.arbiter.release(&id);
        }

        let Some(active) = self.active.clone() else {
            return;
        };
        let wants = self
            .controllers
            .get(&active)
            .is_some_and(PlaybackController::ready_to_play);
        if !wants {
            return;
        }

        if let Some(previous) = self.arbiter.acquire(&active) {
            if let Some(controller) = self.controllers.get_mut(&previous) {
                controller.stop();
            }
        }
        if let Some(controller) = self.controllers.get_mut(&active) {
            if controller.start_playing().is_err() {
                self.arbiter.release(&active);
            }
        }
    }
}
