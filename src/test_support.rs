//! Fixtures shared by unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::Result;

use crate::model::{Author, Engagement, FeedItem, FeedPage, MediaKind};
use crate::playback::{MediaElement, MediaError, MediaEvent};
use crate::store::{FetchRequest, FetchResponse, Fetcher};

#[derive(Default)]
pub struct RecordingFetcher {
    requests: RefCell<Vec<FetchRequest>>,
    responses: RefCell<VecDeque<FetchResponse>>,
}

impl RecordingFetcher {
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.borrow().clone()
    }

    pub fn last_request(&self) -> Option<FetchRequest> {
        self.requests.borrow().last().cloned()
    }

    pub fn respond(&self, request: &FetchRequest, result: Result<FeedPage>) {
        self.responses
            .borrow_mut()
            .push_back(FetchResponse::for_request(request, result));
    }
}

impl Fetcher for RecordingFetcher {
    fn submit(&self, request: FetchRequest) {
        self.requests.borrow_mut().push(request);
    }

    fn try_recv(&self) -> Option<FetchResponse> {
        self.responses.borrow_mut().pop_front()
    }
}

pub fn item(id: &str) -> FeedItem {
    FeedItem {
        id: id.to_string(),
        media_url: format!("https://stream.test/{id}.mp4"),
        poster_url: None,
        author: Author {
            handle: "tester".into(),
            display_name: "Tester".into(),
            avatar_url: String::new(),
            author_id: 1,
        },
        caption: String::new(),
        engagement: Engagement::default(),
        created_at: String::new(),
    }
}

pub fn items(ids: &[&str]) -> Vec<FeedItem> {
    ids.iter().map(|id| item(id)).collect()
}

/// What a scripted media element has been asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    Attach(String),
    Play,
    Pause,
    Rewind,
    Muted(bool),
    Reload,
    Release,
}

#[derive(Default)]
pub struct MediaScript {
    pub calls: Vec<MediaCall>,
    pub events: VecDeque<MediaEvent>,
    pub reject_play: bool,
    pub playing: bool,
    pub position_at_start: bool,
}

/// Media element driven by a shared script so tests can inject events and
/// inspect calls after the element has been handed to a controller.
#[derive(Clone, Default)]
pub struct ScriptedMedia {
    pub script: Rc<RefCell<MediaScript>>,
}

impl ScriptedMedia {
    pub fn push_event(&self, event: MediaEvent) {
        self.script.borrow_mut().events.push_back(event);
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        self.script.borrow().calls.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.script.borrow().playing
    }

    pub fn at_start(&self) -> bool {
        self.script.borrow().position_at_start
    }

    pub fn reject_play(&self, reject: bool) {
        self.script.borrow_mut().reject_play = reject;
    }
}

impl MediaElement for ScriptedMedia {
    fn attach(&mut self, url: &str, _kind: MediaKind) -> Result<(), MediaError> {
        let mut script = self.script.borrow_mut();
        script.calls.push(MediaCall::Attach(url.to_string()));
        script.position_at_start = true;
        Ok(())
    }

    fn play(&mut self) -> Result<(), MediaError> {
        let mut script = self.script.borrow_mut();
        script.calls.push(MediaCall::Play);
        if script.reject_play {
            return Err(MediaError::PlayRejected("scripted".into()));
        }
        script.playing = true;
        script.position_at_start = false;
        Ok(())
    }

    fn pause(&mut self) {
        let mut script = self.script.borrow_mut();
        script.calls.push(MediaCall::Pause);
        script.playing = false;
    }

    fn rewind(&mut self) {
        let mut script = self.script.borrow_mut();
        script.calls.push(MediaCall::Rewind);
        script.position_at_start = true;
    }

    fn set_muted(&mut self, muted: bool) {
        self.script.borrow_mut().calls.push(MediaCall::Muted(muted));
    }

    fn reload(&mut self) -> Result<(), MediaError> {
        let mut script = self.script.borrow_mut();
        script.calls.push(MediaCall::Reload);
        script.position_at_start = true;
        Ok(())
    }

    fn release(&mut self) {
        let mut script = self.script.borrow_mut();
        script.calls.push(MediaCall::Release);
        script.playing = false;
    }

    fn poll_event(&mut self) -> Option<MediaEvent> {
        self.script.borrow_mut().events.pop_front()
    }
}
