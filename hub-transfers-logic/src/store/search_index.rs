use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::Instrument;
use url::Url;

use super::{
    with_id, Collection, DocumentStore, Query, ReadOptions, ReadResponse, StoreError,
};
use crate::settings::StoreSettings;

/// [`DocumentStore`] backed by an Elasticsearch/OpenSearch compatible
/// search index: one index per collection, documents keyed by `_id`.
#[derive(Clone)]
pub struct SearchIndexStore {
    http: HttpClient,
    settings: StoreSettings,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Hits,
    #[serde(default)]
    aggregations: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Hits {
    #[serde(default)]
    total: Option<Value>,
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Value,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source", default)]
    source: Option<Value>,
}

impl SearchIndexStore {
    pub fn new(settings: StoreSettings) -> Result<Self, StoreError> {
        let http = HttpClient::builder().timeout(settings.timeout).build()?;
        Ok(Self { http, settings })
    }

    fn url(&self, collection: Collection, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.settings.url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(collection.as_str())
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.settings.username {
            Some(username) => request.basic_auth(username, self.settings.password.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        Ok(self.authorize(request).send().await?)
    }

    async fn error_for(response: Response) -> StoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        StoreError::Status { status, body }
    }

    fn search_body(query: &Query, options: &ReadOptions) -> Value {
        let mut body = Map::new();
        body.insert("query".into(), query.to_json());
        if let Some(size) = options.size {
            body.insert("size".into(), size.into());
        }
        if !options.sort.is_empty() {
            let sort = options
                .sort
                .iter()
                .map(|s| json!({ s.field.as_str(): { "order": "desc" } }))
                .collect();
            body.insert("sort".into(), sort);
        }
        if let Some(aggs) = &options.aggs {
            body.insert("aggs".into(), aggs.clone());
        }
        Value::Object(body)
    }
}

#[async_trait]
impl DocumentStore for SearchIndexStore {
    async fn read(
        &self,
        collection: Collection,
        query: &Query,
        options: &ReadOptions,
    ) -> Result<ReadResponse, StoreError> {
        let url = self.url(collection, &["_search"])?;
        let body = Self::search_body(query, options);
        let response = self
            .send(self.http.post(url.clone()).json(&body))
            .instrument(tracing::debug_span!("store_read", %collection, %url))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ReadResponse::default());
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let parsed: SearchResponse = serde_json::from_slice(&response.bytes().await?)?;
        let total = match parsed.hits.total {
            Some(Value::Number(n)) => n.as_u64().unwrap_or_default(),
            Some(Value::Object(o)) => o.get("value").and_then(Value::as_u64).unwrap_or_default(),
            _ => parsed.hits.hits.len() as u64,
        };
        let data = parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| with_id(hit.source, &hit.id))
            .collect();

        Ok(ReadResponse {
            data,
            total,
            aggs: parsed.aggregations,
        })
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let url = self.url(collection, &["_doc", id])?;
        let response = self
            .send(self.http.get(url.clone()))
            .instrument(tracing::debug_span!("store_get", %collection, %url))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let parsed: GetResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(parsed
            .source
            .filter(|_| parsed.found)
            .map(|source| with_id(source, id)))
    }

    async fn write(
        &self,
        collection: Collection,
        id: &str,
        document: Value,
        merge: bool,
    ) -> Result<(), StoreError> {
        let request = if merge {
            let mut url = self.url(collection, &["_update", id])?;
            url.query_pairs_mut().append_pair("retry_on_conflict", "3");
            self.http
                .post(url)
                .json(&json!({ "doc": document, "doc_as_upsert": true }))
        } else {
            let url = self.url(collection, &["_doc", id])?;
            self.http.put(url).json(&document)
        };

        let response = self
            .send(request)
            .instrument(tracing::debug_span!("store_write", %collection, id, merge))
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Sort;
    use pretty_assertions::assert_eq;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn store(server: &MockServer) -> SearchIndexStore {
        SearchIndexStore::new(StoreSettings::new(server.uri().parse().unwrap())).unwrap()
    }

    #[tokio::test]
    async fn read_posts_search_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfers/_search"))
            .and(body_json(json!({
                "query": { "match": { "ibc_send.packet_sequence": "7" } },
                "size": 1,
                "sort": [{ "source.created_at.ms": { "order": "desc" } }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": {
                    "total": { "value": 4 },
                    "hits": [{ "_id": "0xabc_osmo1", "_source": { "source": { "id": "0xabc" } } }]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = store(&server)
            .await
            .read(
                Collection::Transfers,
                &Query::match_value("ibc_send.packet_sequence", "7"),
                &ReadOptions::first(Sort::desc("source.created_at.ms")),
            )
            .await
            .unwrap();

        assert_eq!(response.total, 4);
        assert_eq!(
            response.data,
            vec![json!({ "id": "0xabc_osmo1", "source": { "id": "0xabc" } })]
        );
    }

    #[tokio::test]
    async fn get_missing_document_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/evm_polls/_doc/ethereum_0x1_2"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "found": false })))
            .mount(&server)
            .await;

        let doc = store(&server)
            .await
            .get(Collection::Polls, "ethereum_0x1_2")
            .await
            .unwrap();
        assert_eq!(doc, None);
    }

    #[tokio::test]
    async fn merge_write_upserts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfers/_update/key"))
            .and(body_json(json!({
                "doc": { "ibc_send": { "ack_txhash": "AA" } },
                "doc_as_upsert": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "updated" })))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .await
            .write(
                Collection::Transfers,
                "key",
                json!({ "ibc_send": { "ack_txhash": "AA" } }),
                true,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/heartbeats/_doc/val_100"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = store(&server)
            .await
            .write(Collection::Heartbeats, "val_100", json!({}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }));
    }
}
