use url::Url;

use super::error::{Error, SourceResult};
use super::FeedSource;
use crate::config::SourceConfig;
use crate::gtfs::structure::realtime::FeedMessage;
use crate::state::key::SourceId;

/// Some publishers wrap the message in a `response` envelope.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RealtimeResponse {
    Wrapped { response: FeedMessage },
    Bare(FeedMessage),
}

impl From<RealtimeResponse> for FeedMessage {
    fn from(value: RealtimeResponse) -> Self {
        match value {
            RealtimeResponse::Wrapped { response } => response,
            RealtimeResponse::Bare(message) => message,
        }
    }
}

/// Polls a GTFS-realtime JSON endpoint.
#[derive(Clone, Debug)]
pub struct HttpFeedSource {
    id: SourceId,
    url: Url,
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(config: &SourceConfig) -> SourceResult<HttpFeedSource> {
        let url = Url::parse(&config.url).map_err(|source| Error::Url {
            url: config.url.clone(),
            source,
        })?;

        Ok(HttpFeedSource {
            id: SourceId::new(&config.name),
            url,
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn request(&self) -> SourceResult<FeedMessage> {
        log::debug!("Requesting {}", self.url);
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;

        let data_str = response.text().await?;
        log::trace!("Response: {}", data_str);
        decode(&data_str)
    }
}

pub fn decode(data: &str) -> SourceResult<FeedMessage> {
    let response: RealtimeResponse = serde_json::from_str(data)?;
    Ok(response.into())
}

impl FeedSource for HttpFeedSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn fetch(&self) -> impl std::future::Future<Output = SourceResult<FeedMessage>> + Send {
        self.request()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gtfs::structure::realtime::feed_header::Incrementality;

    const BARE: &str = r#"{
        "header": {
            "gtfs_realtime_version": "2.0",
            "incrementality": 1,
            "timestamp": 1707115806
        },
        "entity": [
            { "id": "v1", "is_deleted": true }
        ]
    }"#;

    #[test]
    fn test_decode_bare_message() {
        let message = decode(BARE).unwrap();
        assert_eq!(message.header.incrementality(), Incrementality::Differential);
        assert_eq!(message.header.timestamp.unwrap().timestamp(), 1707115806);
        assert!(message.entity[0].is_deleted());
    }

    #[test]
    fn test_decode_wrapped_message() {
        let wrapped = format!(r#"{{ "status": "OK", "response": {} }}"#, BARE);
        let message = decode(&wrapped).unwrap();
        assert_eq!(message.entity.len(), 1);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode("{}"), Err(Error::Deserialize(_))));
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let config = SourceConfig {
            name: "at".to_string(),
            url: "not a url".to_string(),
        };
        assert!(matches!(HttpFeedSource::new(&config), Err(Error::Url { .. })));

        let config = SourceConfig {
            name: "at".to_string(),
            url: "https://example.com/realtime.json".to_string(),
        };
        let source = HttpFeedSource::new(&config).unwrap();
        assert_eq!(source.id().as_str(), "at");
        assert_eq!(source.url().path(), "/realtime.json");
    }
}
