use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::model::{Author, Channel, Engagement, FeedItem, FeedPage, FeedQuery};
use crate::source;

pub trait FeedService: Send + Sync {
    fn load_page(&self, query: &FeedQuery, cursor: Option<&str>) -> Result<FeedPage>;
}

pub trait ChannelService: Send + Sync {
    fn list_channels(&self, subject_id: u64) -> Result<Vec<Channel>>;
}

pub struct ApiFeedService {
    client: Arc<api::Client>,
    subject_id: Option<u64>,
}

impl ApiFeedService {
    pub fn new(client: Arc<api::Client>, subject_id: Option<u64>) -> Self {
        Self { client, subject_id }
    }
}

impl FeedService for ApiFeedService {
    fn load_page(&self, query: &FeedQuery, cursor: Option<&str>) -> Result<FeedPage> {
        let response = self
            .client
            .feed(query, self.subject_id, cursor)
            .with_context(|| format!("load {} page", query.label()))?;
        Ok(source::normalize_page(response))
    }
}

pub struct ApiChannelService {
    client: Arc<api::Client>,
}

impl ApiChannelService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ChannelService for ApiChannelService {
    fn list_channels(&self, subject_id: u64) -> Result<Vec<Channel>> {
        let listing = self
            .client
            .user_channels(subject_id)
            .context("fetch channel listing")?;
        Ok(listing
            .channels
            .into_iter()
            .filter_map(source::normalize_channel)
            .collect())
    }
}

const MOCK_PAGE_SIZE: usize = 6;
const MOCK_PAGES: usize = 3;
const MOCK_QUIET_CHANNEL: &str = "quiet";
const MOCK_MEDIA: [&str; 3] = [
    "https://test-streams.mux.dev/x36xhzz/x36xhzz.m3u8",
    "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ForBiggerBlazes.mp4",
    "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ForBiggerJoyrides.mp4",
];

/// Offline feed: a few short pages per query, cursors `"2"`, `"3"`, then end.
/// The `quiet` channel is always empty.
#[derive(Default)]
pub struct MockFeedService;

impl FeedService for MockFeedService {
    fn load_page(&self, query: &FeedQuery, cursor: Option<&str>) -> Result<FeedPage> {
        if query
            .channel
            .as_ref()
            .is_some_and(|channel| channel.id == MOCK_QUIET_CHANNEL)
        {
            return Ok(FeedPage::default());
        }

        let page = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("mock: invalid cursor {raw:?}"))?,
            None => 1,
        };
        let scope = query
            .channel
            .as_ref()
            .map(|channel| channel.id.as_str())
            .unwrap_or(query.variant.as_str());

        let start = page.saturating_sub(1) * MOCK_PAGE_SIZE;
        let items = (start..start + MOCK_PAGE_SIZE)
            .map(|n| mock_item(scope, n))
            .collect();

        Ok(FeedPage {
            items,
            next_cursor: (page < MOCK_PAGES).then(|| (page + 1).to_string()),
        })
    }
}

#[derive(Default)]
pub struct MockChannelService;

impl ChannelService for MockChannelService {
    fn list_channels(&self, _subject_id: u64) -> Result<Vec<Channel>> {
        Ok(vec![
            mock_channel("film", "Film"),
            mock_channel("skate", "Skate"),
            mock_channel(MOCK_QUIET_CHANNEL, "Quiet"),
        ])
    }
}

fn mock_channel(id: &str, name: &str) -> Channel {
    Channel {
        id: id.into(),
        name: name.into(),
        image_url: None,
        follower_count: Some(1_200),
        scope_url: format!("chain://demo/{id}"),
    }
}

fn mock_item(scope: &str, n: usize) -> FeedItem {
    FeedItem {
        id: format!("{scope}-{n:04}"),
        media_url: MOCK_MEDIA[n % MOCK_MEDIA.len()].to_string(),
        poster_url: None,
        author: Author {
            handle: format!("creator{}", n % 4),
            display_name: format!("Creator {}", n % 4),
            avatar_url: String::new(),
            author_id: (n % 4) as u64 + 1,
        },
        caption: format!("Sample clip #{} from {scope}", n + 1),
        engagement: Engagement {
            like_count: (n as u64 + 1) * 317,
            recast_count: n as u64 * 7,
            reply_count: n as u64 % 5,
        },
        created_at: "2024-05-01T10:00:00Z".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeedVariant;

    #[test]
    fn mock_feed_paginates_to_end() {
        let service = MockFeedService;
        let query = FeedQuery::new(FeedVariant::Trending);
        let first = service.load_page(&query, None).unwrap();
        assert_eq!(first.items.len(), MOCK_PAGE_SIZE);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));
        let last = service.load_page(&query, Some("3")).unwrap();
        assert!(last.next_cursor.is_none());
        assert_ne!(first.items[0].id, last.items[0].id);
    }

    #[test]
    fn quiet_channel_is_empty() {
        let channels = MockChannelService.list_channels(1).unwrap();
        let quiet = channels
            .into_iter()
            .find(|c| c.id == MOCK_QUIET_CHANNEL)
            .unwrap();
        let page = MockFeedService
            .load_page(&FeedQuery::scoped(FeedVariant::Trending, quiet), None)
            .unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
