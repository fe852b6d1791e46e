use std::sync::Arc;
use std::time::Duration;

use crate::cache::EventCache;
use crate::config::Config;
use crate::source::ActivitySource;
use crate::stats::StatsAggregator;
use crate::watermark::HighWaterMark;

/// Sliding TTL of the event dedup cache. Live-sync windows overlap at
/// minute granularity, so 90 seconds keeps every overlap inside the cache.
pub const EVENT_CACHE_TTL: Duration = Duration::from_secs(90);

/// Everything the worker pools share, handed to them at construction.
/// No ambient globals.
pub struct AppContext {
    pub config: Config,
    pub source: Arc<dyn ActivitySource>,
    pub event_cache: EventCache,
    pub watermark: HighWaterMark,
    pub stats: StatsAggregator,
}

impl AppContext {
    pub fn new(config: Config, source: Arc<dyn ActivitySource>) -> Self {
        let watermark = HighWaterMark::load(&config.state_dir, &config.campaign_id);
        Self {
            config,
            source,
            event_cache: EventCache::new(EVENT_CACHE_TTL),
            watermark,
            stats: StatsAggregator::default(),
        }
    }
}
