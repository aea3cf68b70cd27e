use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::{FeedQuery, FeedVariant};

pub const DEFAULT_BASE_URL: &str = "https://api.neynar.com/v2";
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub api_key: String,
    pub user_agent: String,
    pub page_limit: u32,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    api_key: String,
    user_agent: String,
    base_url: Url,
    page_limit: u32,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api client user agent required");
        }
        let base = config
            .base_url
            .filter(|base| !base.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        // Url::join drops the last path segment unless the base ends in '/'.
        let base = if base.ends_with('/') {
            base
        } else {
            format!("{base}/")
        };
        let base_url = Url::parse(&base).with_context(|| format!("api: parse base url {base}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Client {
            http,
            api_key: config.api_key,
            user_agent: config.user_agent,
            base_url,
            page_limit: config.page_limit.clamp(1, 100),
        })
    }

    pub fn feed(
        &self,
        query: &FeedQuery,
        subject_id: Option<u64>,
        cursor: Option<&str>,
    ) -> Result<CastFeedResponse> {
        let params = feed_params(query, subject_id, cursor, self.page_limit)?;
        self.get_json("farcaster/feed", &params)
            .context("api: fetch feed")
    }

    pub fn user_channels(&self, subject_id: u64) -> Result<ChannelListResponse> {
        let params = vec![("fid".to_string(), subject_id.to_string())];
        self.get_json("farcaster/user/channels", &params)
            .context("api: fetch channels")
    }

    fn get_json<T>(&self, path: &str, params: &[(String, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let resp = self.request(path, params)?;
        let payload: T = resp.json().context("api: decode response")?;
        Ok(payload)
    }

    fn request(&self, path: &str, params: &[(String, String)]) -> Result<Response> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        tracing::debug!(%url, "api request");
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(API_KEY_HEADER, &self.api_key)
            .send()?;

        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            match status.as_u16() {
                401 => Err(anyhow!("api: unauthorized (check api.api_key)")),
                429 => Err(anyhow!("api: rate limited: {}", body)),
                _ => Err(anyhow!("api: error {}: {}", status, body)),
            }
        }
    }
}

fn feed_params(
    query: &FeedQuery,
    subject_id: Option<u64>,
    cursor: Option<&str>,
    limit: u32,
) -> Result<Vec<(String, String)>> {
    let mut params: Vec<(String, String)> = Vec::new();
    match (&query.channel, query.variant) {
        (Some(channel), _) => {
            params.push(("feed_type".into(), "filter".into()));
            params.push(("filter_type".into(), "parent_url".into()));
            params.push(("parent_url".into(), channel.scope_url.clone()));
        }
        (None, FeedVariant::Trending) => {
            params.push(("feed_type".into(), "filter".into()));
            params.push(("filter_type".into(), "embed_types".into()));
            params.push(("embed_types".into(), "video".into()));
        }
        (None, FeedVariant::Following) => {
            let Some(fid) = subject_id else {
                bail!("api: following feed requires api.subject_id");
            };
            params.push(("feed_type".into(), "following".into()));
            params.push(("fid".into(), fid.to_string()));
        }
    }
    params.push(("limit".into(), limit.to_string()));
    params.push(("with_recasts".into(), "true".into()));
    if let Some(cursor) = cursor.filter(|c| !c.trim().is_empty()) {
        params.push(("cursor".into(), cursor.to_string()));
    }
    Ok(params)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastFeedResponse {
    #[serde(default)]
    pub casts: Vec<Cast>,
    #[serde(default)]
    pub next: NextCursor,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NextCursor {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cast {
    pub hash: String,
    pub author: CastAuthor,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub reactions: Reactions,
    #[serde(default)]
    pub replies: Replies,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CastAuthor {
    pub fid: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub pfp_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Embed {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: Option<EmbedMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbedMetadata {
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Reactions {
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub recasts_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Replies {
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelListResponse {
    #[serde(default)]
    pub channels: Vec<RawChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub follower_count: Option<u64>,
    #[serde(default)]
    pub parent_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Channel;

    fn lookup<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn trending_feed_filters_video_embeds() {
        let params = feed_params(&FeedQuery::default(), None, None, 100).unwrap();
        assert_eq!(lookup(&params, "filter_type"), Some("embed_types"));
        assert_eq!(lookup(&params, "embed_types"), Some("video"));
        assert_eq!(lookup(&params, "cursor"), None);
    }

    #[test]
    fn scoped_feed_uses_parent_url_and_cursor() {
        let channel = Channel {
            id: "film".into(),
            name: "Film".into(),
            image_url: None,
            follower_count: None,
            scope_url: "https://warpcast.com/~/channel/film".into(),
        };
        let query = FeedQuery::scoped(FeedVariant::Trending, channel);
        let params = feed_params(&query, None, Some("abc"), 25).unwrap();
        assert_eq!(
            lookup(&params, "parent_url"),
            Some("https://warpcast.com/~/channel/film")
        );
        assert_eq!(lookup(&params, "cursor"), Some("abc"));
        assert_eq!(lookup(&params, "limit"), Some("25"));
    }

    #[test]
    fn following_feed_requires_subject() {
        let query = FeedQuery::new(FeedVariant::Following);
        assert!(feed_params(&query, None, None, 10).is_err());
        let params = feed_params(&query, Some(42), None, 10).unwrap();
        assert_eq!(lookup(&params, "fid"), Some("42"));
    }

    #[test]
    fn decodes_feed_with_null_cursor() {
        let raw = r#"{"casts":[{"hash":"0x1","author":{"fid":7,"username":"ann"},"embeds":[]}],"next":{"cursor":null}}"#;
        let resp: CastFeedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.casts.len(), 1);
        assert!(resp.next.cursor.is_none());
    }
}
