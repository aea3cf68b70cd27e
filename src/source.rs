use std::collections::HashSet;

use crate::api::{Cast, CastFeedResponse, Embed, RawChannel};
use crate::model::{Author, Channel, Engagement, FeedItem, FeedPage};

const HLS_CONTENT_TYPES: [&str; 2] = ["application/x-mpegurl", "application/vnd.apple.mpegurl"];

/// Normalizes one upstream page. Records without playable media are dropped,
/// as are repeated ids within the page.
pub fn normalize_page(response: CastFeedResponse) -> FeedPage {
    let mut seen = HashSet::new();
    let items = response
        .casts
        .into_iter()
        .filter_map(normalize_cast)
        .filter(|item| seen.insert(item.id.clone()))
        .collect();
    FeedPage {
        items,
        next_cursor: response
            .next
            .cursor
            .filter(|cursor| !cursor.trim().is_empty()),
    }
}

pub fn normalize_cast(cast: Cast) -> Option<FeedItem> {
    if cast.hash.trim().is_empty() {
        return None;
    }
    let media_url = cast.embeds.iter().find_map(playable_url)?;
    let avatar_url = cast.author.pfp_url.clone().unwrap_or_default();
    let poster_url = if avatar_url.is_empty() {
        None
    } else {
        Some(avatar_url.clone())
    };

    Some(FeedItem {
        id: cast.hash,
        media_url,
        poster_url,
        author: Author {
            handle: cast.author.username,
            display_name: cast.author.display_name,
            avatar_url,
            author_id: cast.author.fid,
        },
        caption: cast.text,
        engagement: Engagement {
            like_count: cast.reactions.likes_count,
            recast_count: cast.reactions.recasts_count,
            reply_count: cast.replies.count,
        },
        created_at: cast.timestamp,
    })
}

pub fn normalize_channel(raw: RawChannel) -> Option<Channel> {
    let scope_url = raw
        .parent_url
        .or(raw.url)
        .map(|url| sanitize_url(&url))
        .filter(|url| !url.is_empty())?;
    let name = if raw.name.trim().is_empty() {
        raw.id.clone()
    } else {
        raw.name
    };
    Some(Channel {
        id: raw.id,
        name,
        image_url: raw.image_url,
        follower_count: raw.follower_count,
        scope_url,
    })
}

fn playable_url(embed: &Embed) -> Option<String> {
    let url = embed.url.as_deref().map(sanitize_url)?;
    if url.is_empty() {
        return None;
    }
    let content_type = embed
        .metadata
        .as_ref()
        .and_then(|meta| meta.content_type.as_deref())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let is_video = content_type.starts_with("video/")
        || HLS_CONTENT_TYPES.contains(&content_type.as_str())
        || url_path_is_manifest(&url);
    is_video.then_some(url)
}

fn url_path_is_manifest(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_ascii_lowercase().ends_with(".m3u8"),
        Err(_) => false,
    }
}

fn sanitize_url(raw: &str) -> String {
    raw.trim().replace("&amp;", "&")
}
