use std::env;
use std::future::pending;
use std::sync::Arc;

use feed_state::cache::{CacheSync, RedisCache};
use feed_state::clock::{Clock, SystemClock};
use feed_state::config::Config;
use feed_state::error::FeedStateResult;
use feed_state::gtfs::realtime::{monitor_source, MergeEngine};
use feed_state::maintenance::StalenessReaper;
use feed_state::source::HttpFeedSource;
use feed_state::state::CanonicalStore;
use futures_util::future::try_join_all;
use tokio::select;
use tokio::sync::mpsc::unbounded_channel;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::from_filename(".env").ok();

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::try_init().ok();

    log::debug!("Debug logging enabled");

    run().await?;
    Ok(())
}

async fn run() -> FeedStateResult<()> {
    let config = Config::from_env()?;
    let ttls = config
        .reaper
        .as_ref()
        .map(|r| r.ttls.clone())
        .unwrap_or_default();

    let cache = match &config.redis {
        Some(redis) => Some(RedisCache::connect(redis, ttls).await?),
        None => {
            log::info!("REDIS_URL not set, cache sync disabled");
            None
        }
    };

    let (tx, rx) = unbounded_channel();
    let mut store = CanonicalStore::new(config.store.clone());
    if cache.is_some() {
        store = store.with_sync(tx);
    }
    let store = Arc::new(store);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(MergeEngine::new(
        store.clone(),
        clock.clone(),
        config.merge.clone(),
    ));

    let sources = config
        .sources
        .iter()
        .map(HttpFeedSource::new)
        .collect::<Result<Vec<_>, _>>()?;

    log::info!("Merging {} feed sources", sources.len());

    let feeds = try_join_all(
        sources
            .into_iter()
            .map(|source| monitor_source(engine.clone(), source, config.poll_interval)),
    );

    let reaper = async {
        match config.reaper.clone() {
            Some(reaper) => {
                StalenessReaper::new(store.clone(), clock.clone(), reaper)
                    .keep_fresh()
                    .await
            }
            None => pending().await,
        }
    };

    let sync = async {
        match cache {
            Some(cache) => {
                CacheSync::new(Arc::new(cache), store.clone(), config.sync.clone())
                    .run(rx)
                    .await
            }
            None => pending().await,
        }
    };

    select! {
        res = feeds => {
            log::info!("Feed monitors stopped");
            res?;
        }
        () = reaper => {
            log::info!("Staleness reaper stopped");
        }
        res = sync => {
            log::info!("Cache sync stopped");
            res?;
        }
    }

    Ok(())
}
