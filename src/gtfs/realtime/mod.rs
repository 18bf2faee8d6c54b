pub mod error;
pub mod merge;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

pub use error::{EntityDefect, Error, RtResult};
pub use merge::{MergeEngine, MergeReport, MergeStats};

use crate::source::FeedSource;

/// Polls `source` forever, applying each message it delivers. Fetch failures and
/// rejected messages are logged and the loop carries on.
pub async fn monitor_source<S: FeedSource>(
    engine: Arc<MergeEngine>,
    source: S,
    interval: Duration,
) -> RtResult<()> {
    log::info!("Monitoring {}", source.id());

    loop {
        let message = match source.fetch().await {
            Ok(message) => message,
            Err(e) => {
                log::error!("Error getting realtime feed from {}: {}", source.id(), e);
                sleep(interval).await;
                continue;
            }
        };

        log::debug!("Start processing {} entities from {}", message.entity.len(), source.id());

        // rejections are already logged by the engine
        if let Err(e) = engine.apply(source.id(), message) {
            if !e.is_rejection() {
                return Err(e);
            }
        }

        sleep(interval).await;
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::Mutex;

    use super::*;
    use crate::gtfs::structure::realtime::FeedMessage;
    use crate::source::{self, SourceResult};
    use crate::state::key::{FeedType, SourceId};
    use crate::test_utils::{deleted, differential, engine_at, vehicle};

    struct ScriptedSource {
        id: SourceId,
        messages: Mutex<VecDeque<SourceResult<FeedMessage>>>,
    }

    impl FeedSource for ScriptedSource {
        fn id(&self) -> &SourceId {
            &self.id
        }

        fn fetch(&self) -> impl Future<Output = SourceResult<FeedMessage>> + Send {
            let next = self.messages.lock().unwrap().pop_front();
            async move {
                match next {
                    Some(result) => result,
                    None => Ok(differential(0, vec![])),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_monitor_applies_messages_and_survives_failures() {
        let (engine, _) = engine_at(1_000);
        let engine = Arc::new(engine);

        let bad_json = serde_json::from_str::<FeedMessage>("nope").unwrap_err();
        let source = ScriptedSource {
            id: SourceId::new("at"),
            messages: Mutex::new(VecDeque::from([
                Ok(differential(100, vec![vehicle("v1", 1.0), vehicle("v2", 1.0)])),
                Err(source::Error::Deserialize(bad_json)),
                Ok(differential(90, vec![deleted("v1")])),
                Ok(differential(110, vec![deleted("v2")])),
            ])),
        };

        let monitor = monitor_source(engine.clone(), source, Duration::from_millis(1));
        let stopped = tokio::time::timeout(Duration::from_millis(200), monitor).await;
        assert!(stopped.is_err(), "monitor should run until cancelled");

        let store = engine.store();
        assert!(store.get(FeedType::Vehicle, "v1").is_some());
        assert!(store.get(FeedType::Vehicle, "v2").is_none());
        assert_eq!(store.version(), 2);
    }
}
