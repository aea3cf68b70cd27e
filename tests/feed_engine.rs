use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use reelfeed::engine::{EngineOptions, FeedEngine};
use reelfeed::model::{Author, Channel, Engagement, FeedItem, FeedPage, FeedQuery, MediaKind};
use reelfeed::navigation::{Direction, InputOrigin};
use reelfeed::playback::{MediaElement, MediaError, MediaEvent, PlaybackState};
use reelfeed::prefetch::NoopSink;
use reelfeed::store::{FetchRequest, FetchResponse, Fetcher};

#[derive(Default)]
struct QueueFetcher {
    requests: RefCell<Vec<FetchRequest>>,
    responses: RefCell<VecDeque<FetchResponse>>,
}

impl QueueFetcher {
    fn last(&self) -> FetchRequest {
        self.requests.borrow().last().cloned().expect("a request")
    }

    fn count(&self) -> usize {
        self.requests.borrow().len()
    }

    fn reply(&self, request: &FetchRequest, result: Result<FeedPage>) {
        self.responses
            .borrow_mut()
            .push_back(FetchResponse::for_request(request, result));
    }
}

impl Fetcher for QueueFetcher {
    fn submit(&self, request: FetchRequest) {
        self.requests.borrow_mut().push(request);
    }

    fn try_recv(&self) -> Option<FetchResponse> {
        self.responses.borrow_mut().pop_front()
    }
}

#[derive(Default)]
struct Fake {
    events: VecDeque<MediaEvent>,
    reloads: usize,
    playing: bool,
    at_start: bool,
}

#[derive(Clone, Default)]
struct FakeMedia(Rc<RefCell<Fake>>);

impl MediaElement for FakeMedia {
    fn attach(&mut self, _url: &str, _kind: MediaKind) -> Result<(), MediaError> {
        self.0.borrow_mut().at_start = true;
        Ok(())
    }

    fn play(&mut self) -> Result<(), MediaError> {
        let mut fake = self.0.borrow_mut();
        fake.playing = true;
        fake.at_start = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.0.borrow_mut().playing = false;
    }

    fn rewind(&mut self) {
        self.0.borrow_mut().at_start = true;
    }

    fn set_muted(&mut self, _muted: bool) {}

    fn reload(&mut self) -> Result<(), MediaError> {
        let mut fake = self.0.borrow_mut();
        fake.reloads += 1;
        fake.at_start = true;
        Ok(())
    }

    fn release(&mut self) {
        self.0.borrow_mut().playing = false;
    }

    fn poll_event(&mut self) -> Option<MediaEvent> {
        self.0.borrow_mut().events.pop_front()
    }
}

type Media = Rc<RefCell<HashMap<String, FakeMedia>>>;

struct Harness {
    engine: FeedEngine<QueueFetcher, NoopSink>,
    media: Media,
    start: Instant,
}

impl Harness {
    fn new() -> Self {
        let media: Media = Rc::default();
        let registry = media.clone();
        let factory = move |item: &FeedItem| -> Box<dyn MediaElement> {
            let element = FakeMedia::default();
            registry
                .borrow_mut()
                .insert(item.id.clone(), element.clone());
            Box::new(element)
        };
        Self {
            engine: FeedEngine::new(
                QueueFetcher::default(),
                NoopSink,
                Box::new(factory),
                None,
                EngineOptions::default(),
                FeedQuery::default(),
            ),
            media,
            start: Instant::now(),
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.start + Duration::from_millis(ms)
    }

    fn event(&self, id: &str, event: MediaEvent) {
        self.media.borrow()[id].0.borrow_mut().events.push_back(event);
    }

    fn fake(&self, id: &str) -> FakeMedia {
        self.media.borrow()[id].clone()
    }
}

fn item(id: &str) -> FeedItem {
    FeedItem {
        id: id.to_string(),
        media_url: format!("https://cdn.test/{id}.mp4"),
        poster_url: None,
        author: Author {
            handle: "maker".into(),
            display_name: "Maker".into(),
            avatar_url: String::new(),
            author_id: 9,
        },
        caption: format!("clip {id}"),
        engagement: Engagement::default(),
        created_at: "2024-05-01T10:00:00Z".into(),
    }
}

fn items(ids: &[&str]) -> Vec<FeedItem> {
    ids.iter().map(|id| item(id)).collect()
}

#[test]
fn three_item_list_clamps_and_loads_more_once() {
    let mut h = Harness::new();
    h.engine.render(items(&["A", "B", "C"]), Some("X".into()), h.at(0));
    for step in 0..3 {
        let t = h.at(500 * step);
        h.engine.key(Direction::Forward, t);
    }
    assert_eq!(h.engine.index(), 2);
    assert_eq!(h.engine.current().map(|i| i.id.as_str()), Some("C"));
    h.engine.key(Direction::Forward, h.at(5_000));
    assert_eq!(h.engine.index(), 2);

    assert_eq!(h.engine.store().fetcher().count(), 1);
    assert_eq!(h.engine.store().fetcher().last().cursor.as_deref(), Some("X"));
}

#[test]
fn wheel_burst_moves_a_single_item() {
    let mut h = Harness::new();
    h.engine.render(items(&["A", "B", "C", "D", "E", "F"]), None, h.at(0));
    for i in 0..40 {
        h.engine.wheel(45.0, InputOrigin::Viewport, h.at(i * 8));
    }
    assert_eq!(h.engine.index(), 1);
    h.engine.wheel(500.0, InputOrigin::Control, h.at(2_000));
    assert_eq!(h.engine.index(), 1);
}

#[test]
fn progressive_source_retries_twice_then_errors() {
    let mut h = Harness::new();
    let mut clip = item("a");
    clip.media_url = "a.mp4".into();
    h.engine.render(vec![clip, item("b")], None, h.at(0));

    let failure = || MediaEvent::Error {
        fatal: true,
        message: "decode".into(),
    };

    h.event("a", failure());
    h.engine.tick(h.at(10));
    h.engine.tick(h.at(1_010));
    assert_eq!(h.fake("a").0.borrow().reloads, 1);

    h.event("a", failure());
    h.engine.tick(h.at(1_020));
    h.engine.tick(h.at(2_020));
    assert_eq!(h.fake("a").0.borrow().reloads, 2);
    assert_eq!(h.engine.deck().state("a"), Some(PlaybackState::Loading));

    h.event("a", failure());
    h.engine.tick(h.at(2_030));
    h.engine.tick(h.at(9_000));
    assert_eq!(h.engine.deck().state("a"), Some(PlaybackState::Errored));
    assert_eq!(h.fake("a").0.borrow().reloads, 2);

    h.engine.retry();
    assert_eq!(h.fake("a").0.borrow().reloads, 3);
    h.event("a", MediaEvent::Ready);
    h.engine.tick(h.at(9_100));
    assert_eq!(h.engine.deck().state("a"), Some(PlaybackState::Playing));
}

#[test]
fn empty_channel_reverts_to_unscoped_feed() {
    let mut h = Harness::new();
    h.engine
        .render(items(&["A", "B", "C", "D", "E", "F"]), None, h.at(0));
    h.engine.key(Direction::Forward, h.at(0));
    h.engine.select_channel(
        Some(Channel {
            id: "empty".into(),
            name: "Empty".into(),
            image_url: None,
            follower_count: None,
            scope_url: "chain://empty".into(),
        }),
        h.at(100),
    );
    let scoped = h.engine.store().fetcher().last();
    h.engine
        .store()
        .fetcher()
        .reply(&scoped, Ok(FeedPage::default()));
    h.engine.tick(h.at(200));
    assert_eq!(
        h.engine.snapshot(h.at(200)).toast.as_deref(),
        Some("No videos in Empty")
    );

    h.engine.tick(h.at(1_700));
    let revert = h.engine.store().fetcher().last();
    assert!(!revert.query.is_scoped());
    h.engine.store().fetcher().reply(
        &revert,
        Ok(FeedPage {
            items: items(&["N1", "N2"]),
            next_cursor: None,
        }),
    );
    h.engine.tick(h.at(1_800));
    assert_eq!(h.engine.index(), 0);
    assert_eq!(h.engine.current().map(|i| i.id.as_str()), Some("N1"));
    assert!(h.engine.snapshot(h.at(1_800)).toast.is_none());
}

#[test]
fn only_active_item_plays_and_restarts_from_zero() {
    let mut h = Harness::new();
    h.engine
        .render(items(&["A", "B", "C", "D", "E", "F", "G"]), None, h.at(0));
    h.event("A", MediaEvent::Ready);
    h.engine.tick(h.at(1));
    assert!(h.fake("A").0.borrow().playing);

    let mut t = 0;
    for (direction, expected) in [
        (Direction::Forward, "B"),
        (Direction::Forward, "C"),
        (Direction::Back, "B"),
        (Direction::Forward, "C"),
    ] {
        t += 450;
        h.engine.key(direction, h.at(t));
        h.event(expected, MediaEvent::Ready);
        h.engine.tick(h.at(t + 1));
        assert_eq!(h.engine.deck().playing_count(), 1);
        assert_eq!(h.engine.deck().holder(), Some(expected));
        let media = h.media.borrow();
        let playing: Vec<&String> = media
            .iter()
            .filter(|(_, m)| m.0.borrow().playing)
            .map(|(id, _)| id)
            .collect();
        assert_eq!(playing, vec![expected]);
    }

    // B was played, left, revisited and left again: parked at the start.
    assert!(h.fake("B").0.borrow().at_start);
    assert!(!h.fake("B").0.borrow().playing);
}
