use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Author {
    pub handle: String,
    pub display_name: String,
    pub avatar_url: String,
    pub author_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Engagement {
    pub like_count: u64,
    pub recast_count: u64,
    pub reply_count: u64,
}

/// A playable entry in the feed. Built by [`crate::source`], never mutated
/// afterwards. `media_url` is always non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub media_url: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    pub author: Author,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default)]
    pub created_at: String,
}

impl FeedItem {
    pub fn media_kind(&self) -> MediaKind {
        MediaKind::from_url(&self.media_url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Single-file sources handed to the player as-is.
    Progressive,
    /// Manifest-driven streams (HLS).
    Adaptive,
}

impl MediaKind {
    pub fn from_url(url: &str) -> Self {
        if url.to_ascii_lowercase().contains(".m3u8") {
            MediaKind::Adaptive
        } else {
            MediaKind::Progressive
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedVariant {
    #[default]
    Trending,
    Following,
}

impl FeedVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedVariant::Trending => "trending",
            FeedVariant::Following => "following",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FeedVariant::Trending => "Trending",
            FeedVariant::Following => "Following",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            FeedVariant::Trending => FeedVariant::Following,
            FeedVariant::Following => FeedVariant::Trending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub follower_count: Option<u64>,
    pub scope_url: String,
}

/// Identifies which page sequence is being paginated. Any change to a field
/// starts a fresh sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FeedQuery {
    pub variant: FeedVariant,
    pub channel: Option<Channel>,
}

impl FeedQuery {
    pub fn new(variant: FeedVariant) -> Self {
        Self {
            variant,
            channel: None,
        }
    }

    pub fn scoped(variant: FeedVariant, channel: Channel) -> Self {
        Self {
            variant,
            channel: Some(channel),
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.channel.is_some()
    }

    pub fn unscoped(&self) -> Self {
        Self {
            variant: self.variant,
            channel: None,
        }
    }

    pub fn label(&self) -> String {
        match &self.channel {
            Some(channel) => format!("{} · /{}", self.variant.display_name(), channel.id),
            None => self.variant.display_name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hls_urls_are_adaptive() {
        assert_eq!(
            MediaKind::from_url("https://stream.test/v/playlist.M3U8?token=1"),
            MediaKind::Adaptive
        );
        assert_eq!(
            MediaKind::from_url("https://stream.test/a.mp4"),
            MediaKind::Progressive
        );
    }

    #[test]
    fn unscoping_keeps_variant() {
        let channel = Channel {
            id: "film".into(),
            name: "Film".into(),
            image_url: None,
            follower_count: None,
            scope_url: "chain://film".into(),
        };
        let query = FeedQuery::scoped(FeedVariant::Following, channel);
        assert!(query.is_scoped());
        let reverted = query.unscoped();
        assert!(!reverted.is_scoped());
        assert_eq!(reverted.variant, FeedVariant::Following);
    }
}
