use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::api;
use crate::config::{self, Config};
use crate::data::{self, ChannelService, FeedService};
use crate::engine::{EngineOptions, FeedEngine};
use crate::logging;
use crate::model::{Channel, FeedItem, FeedQuery};
use crate::playback::{MediaElement, MediaFactory};
use crate::player::{MpvElement, MpvOptions};
use crate::prefetch::{HintSink, HttpPrefetchConfig, HttpPrefetcher, NoopSink};
use crate::storage;
use crate::store::ThreadedFetcher;
use crate::ui;

/// Subject used for the channel listing in demo mode.
const DEMO_SUBJECT_ID: u64 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub demo: bool,
}

pub fn run(options: RunOptions) -> Result<()> {
    let log_file = logging::init().context("initialise logging")?;
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    tracing::info!(demo = options.demo, log = ?log_file, "starting");

    let services = if options.demo {
        Services::demo()
    } else {
        Services::live(&cfg)?
    };

    let preferences = if options.demo {
        storage::Store::open_in_memory().context("open demo storage")?
    } else {
        storage::Store::open(storage::Options::default()).context("open storage")?
    };

    let hints: Box<dyn HintSink> = if cfg.prefetch.enabled && !options.demo {
        match HttpPrefetcher::new(HttpPrefetchConfig {
            workers: cfg.prefetch.workers,
            bytes: cfg.prefetch.bytes,
            user_agent: cfg.api.user_agent.clone(),
            http_client: None,
        }) {
            Ok(prefetcher) => Box::new(prefetcher),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "prefetch disabled");
                Box::new(NoopSink)
            }
        }
    } else {
        Box::new(NoopSink)
    };

    let query = FeedQuery::new(cfg.feed.variant);
    let mut engine = FeedEngine::new(
        ThreadedFetcher::new(services.feed.clone()),
        hints,
        mpv_factory(&cfg),
        Some(preferences),
        EngineOptions::from_config(&cfg),
        query.clone(),
    );

    engine.set_channels(load_channels(services.channels.as_ref(), services.subject_id));

    let status_message = match services.feed.load_page(&query, None) {
        Ok(page) => {
            let count = page.items.len();
            engine.render(page.items, page.next_cursor, Instant::now());
            if count == 0 {
                String::new()
            } else {
                format!("{} loaded", query.label())
            }
        }
        Err(err) => {
            engine.render_error(format!("{err:#}"));
            String::new()
        }
    };

    let mut model = ui::Model::new(ui::Options {
        engine,
        tick_rate: cfg.ui.tick_rate,
        wheel_notch_delta: cfg.ui.wheel_notch_delta,
        touch_row_px: cfg.ui.touch_row_px,
        status_message,
    });
    model.run()
}

struct Services {
    feed: Arc<dyn FeedService>,
    channels: Arc<dyn ChannelService>,
    subject_id: Option<u64>,
}

impl Services {
    fn live(cfg: &Config) -> Result<Self> {
        let client = api::Client::new(api::ClientConfig {
            base_url: Some(cfg.api.base_url.clone()),
            api_key: cfg.api.api_key.clone(),
            user_agent: cfg.api.user_agent.clone(),
            page_limit: cfg.api.page_limit,
            http_client: None,
        })
        .context("create api client")?;
        let client = Arc::new(client);
        Ok(Self {
            feed: Arc::new(data::ApiFeedService::new(client.clone(), cfg.api.subject_id)),
            channels: Arc::new(data::ApiChannelService::new(client)),
            subject_id: cfg.api.subject_id,
        })
    }

    fn demo() -> Self {
        Self {
            feed: Arc::new(data::MockFeedService),
            channels: Arc::new(data::MockChannelService),
            subject_id: Some(DEMO_SUBJECT_ID),
        }
    }
}

fn load_channels(service: &dyn ChannelService, subject_id: Option<u64>) -> Vec<Channel> {
    let Some(subject_id) = subject_id else {
        return Vec::new();
    };
    match service.list_channels(subject_id) {
        Ok(channels) => {
            tracing::info!(count = channels.len(), "loaded channels");
            channels
        }
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "channel listing failed");
            Vec::new()
        }
    }
}

fn mpv_factory(cfg: &Config) -> Box<dyn MediaFactory> {
    let options = Arc::new(MpvOptions {
        mpv_path: cfg.playback.mpv_path.clone(),
        fullscreen: cfg.playback.fullscreen,
        user_agent: cfg.api.user_agent.clone(),
    });
    Box::new(move |item: &FeedItem| -> Box<dyn MediaElement> {
        Box::new(MpvElement::new(options.clone(), item))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingChannels;

    impl ChannelService for FailingChannels {
        fn list_channels(&self, _subject_id: u64) -> Result<Vec<Channel>> {
            Err(anyhow::anyhow!("upstream down"))
        }
    }

    #[test]
    fn channel_failures_yield_empty_selector() {
        assert!(load_channels(&FailingChannels, Some(3)).is_empty());
        assert!(load_channels(&data::MockChannelService, None).is_empty());
        assert_eq!(load_channels(&data::MockChannelService, Some(1)).len(), 3);
    }
}
