use std::future::Future;
use std::sync::Arc;

use tokio::select;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

use super::{CacheResult, CacheSink, Error};
use crate::config::SyncConfig;
use crate::state::{CanonicalStore, ChangeSet};

/// Mirrors committed change-sets into a [`CacheSink`], in version order, off the
/// merge path.
///
/// A change-set that still fails after `max_attempts` leaves the mirror dirty.
/// A dirty mirror is repaired by a full write of the latest snapshot, either
/// when the next change-set arrives or after `max_backoff` with no traffic.
/// Change-sets queued up while dirty are folded into that one write. The worker
/// starts dirty so a fresh process overwrites whatever a previous one left
/// behind.
pub struct CacheSync<C: CacheSink> {
    sink: Arc<C>,
    store: Arc<CanonicalStore>,
    config: SyncConfig,
    dirty: bool,
    mirrored: u64,
}

impl<C: CacheSink> CacheSync<C> {
    pub fn new(sink: Arc<C>, store: Arc<CanonicalStore>, config: SyncConfig) -> Self {
        Self {
            sink,
            store,
            config,
            dirty: true,
            mirrored: 0,
        }
    }

    /// Runs until every sender of `changes` is gone.
    pub async fn run(mut self, mut changes: UnboundedReceiver<Arc<ChangeSet>>) -> CacheResult<()> {
        log::info!("Cache sync is running");

        loop {
            if !self.dirty {
                match changes.recv().await {
                    Some(next) => self.sync(&next).await,
                    None => break,
                }
                continue;
            }

            select! {
                next = changes.recv() => {
                    if next.is_none() {
                        break;
                    }
                    // the full write covers everything queued so far
                    let skipped = std::iter::from_fn(|| changes.try_recv().ok()).count();
                    if skipped > 0 {
                        log::debug!("Folded {} queued change-sets into a full write", skipped);
                    }
                    self.repair().await;
                }
                () = sleep(self.config.max_backoff) => {
                    log::info!("Retrying dirty cache mirror");
                    self.repair().await;
                }
            }
        }

        log::info!("Cache sync stopped at version {}", self.mirrored);
        Ok(())
    }

    async fn sync(&mut self, changes: &ChangeSet) {
        if changes.version <= self.mirrored {
            return;
        }
        if self.dirty {
            return self.repair().await;
        }

        let result = self
            .with_retries(changes.version, || self.sink.apply(changes))
            .await;
        self.settle(result.map(|()| changes.version));
    }

    /// Replaces the whole mirror with the latest snapshot.
    async fn repair(&mut self) {
        let snapshot = self.store.latest();
        let result = self
            .with_retries(snapshot.version(), || self.sink.replace_all(&snapshot))
            .await;
        self.settle(result.map(|()| snapshot.version()));
    }

    fn settle(&mut self, result: CacheResult<u64>) {
        match result {
            Ok(version) => {
                self.dirty = false;
                self.mirrored = version;
            }
            Err(e) => {
                log::error!("{}", e);
                self.dirty = true;
            }
        }
    }

    async fn with_retries<F, Fut>(&self, version: u64, mut op: F) -> CacheResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CacheResult<()>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff;

        for attempt in 1..=attempts {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt == attempts => {
                    return Err(Error::SyncPropagationFailure {
                        version,
                        attempts,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    log::warn!(
                        "Mirroring version {} failed (attempt {}/{}), retrying in {:?}: {}",
                        version,
                        attempt,
                        attempts,
                        backoff,
                        e
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }
        }

        Ok(())
    }
}
