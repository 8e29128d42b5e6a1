use std::time::Duration;

use cornerstone_domain::DomainResult;
use cornerstone_domain::error::DomainError;
use cornerstone_domain::indexing::{PostDocument, UserDocument};
use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::search::{IndexWrite, SearchIndex};
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::http::{
    HttpError, RetrySettings, build_client, endpoint_url, error_for_status, send_with_retry,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNames {
    pub posts: String,
    pub users: String,
}

/// Elasticsearch documents written with external versioning.
#[derive(Clone)]
pub struct ElasticsearchIndex {
    http: reqwest::Client,
    base_url: String,
    names: IndexNames,
    retry: RetrySettings,
}

impl ElasticsearchIndex {
    pub fn new(base_url: &str, names: IndexNames) -> Self {
        Self {
            http: build_client(REQUEST_TIMEOUT),
            base_url: base_url.trim_end_matches('/').to_string(),
            names,
            retry: RetrySettings::default(),
        }
    }

    fn doc_url(&self, index: &str, id: u64) -> String {
        endpoint_url(&self.base_url, &format!("{index}/_doc/{id}"))
    }

    async fn versioned_put<T: Serialize + Sync>(
        &self,
        index: &str,
        id: u64,
        document: &T,
        version: i64,
    ) -> DomainResult<IndexWrite> {
        let url = self.doc_url(index, id);
        let query = versioned_query(version);
        let response = send_with_retry(self.retry, || {
            self.http.put(&url).query(&query).json(document)
        })
        .await?;
        match classify_write(response.status()) {
            Some(outcome) => Ok(outcome),
            None => {
                error_for_status(response).await?;
                Ok(IndexWrite::Applied)
            }
        }
    }

    async fn fetch_source<T: DeserializeOwned + Send>(
        &self,
        index: &str,
        id: u64,
    ) -> DomainResult<Option<T>> {
        let url = self.doc_url(index, id);
        let response = send_with_retry(self.retry, || self.http.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|err| HttpError::InvalidResponse(err.to_string()))?;
        decode_source(body)
    }
}

fn versioned_query(version: i64) -> [(&'static str, String); 2] {
    [
        ("version", version.to_string()),
        ("version_type", "external".to_string()),
    ]
}

/// Outcomes that are not plain success: a stale external version, or a
/// delete of a document that was never indexed.
fn classify_write(status: StatusCode) -> Option<IndexWrite> {
    match status {
        StatusCode::CONFLICT => Some(IndexWrite::Stale),
        StatusCode::NOT_FOUND => Some(IndexWrite::Absent),
        status if status.is_success() => Some(IndexWrite::Applied),
        _ => None,
    }
}

fn decode_source<T: DeserializeOwned>(body: Value) -> DomainResult<Option<T>> {
    if body.get("found").and_then(Value::as_bool) == Some(false) {
        return Ok(None);
    }
    let Some(source) = body.get("_source").cloned() else {
        return Ok(None);
    };
    serde_json::from_value(source)
        .map(Some)
        .map_err(|err| DomainError::Validation(format!("invalid indexed document: {err}")))
}

fn author_profile_update(author_id: u64, nickname: &str, avatar_url: &str) -> Value {
    json!({
        "query": { "term": { "author_id": author_id } },
        "script": {
            "lang": "painless",
            "source": "ctx._source.author_nickname = params.nickname; ctx._source.author_avatar = params.avatar",
            "params": { "nickname": nickname, "avatar": avatar_url }
        }
    })
}

impl SearchIndex for ElasticsearchIndex {
    fn upsert_post(
        &self,
        document: &PostDocument,
        version: i64,
    ) -> BoxFuture<'_, DomainResult<IndexWrite>> {
        let document = document.clone();
        Box::pin(async move {
            let outcome = self
                .versioned_put(&self.names.posts, document.id, &document, version)
                .await?;
            tracing::debug!(post_id = document.id, version, ?outcome, "post document written");
            Ok(outcome)
        })
    }

    fn delete_post(&self, post_id: u64) -> BoxFuture<'_, DomainResult<IndexWrite>> {
        Box::pin(async move {
            let url = self.doc_url(&self.names.posts, post_id);
            let response = send_with_retry(self.retry, || self.http.delete(&url)).await?;
            match classify_write(response.status()) {
                Some(outcome) => Ok(outcome),
                None => {
                    error_for_status(response).await?;
                    Ok(IndexWrite::Applied)
                }
            }
        })
    }

    fn get_post(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Option<PostDocument>>> {
        Box::pin(async move { self.fetch_source(&self.names.posts, post_id).await })
    }

    fn upsert_user(
        &self,
        document: &UserDocument,
        version: i64,
    ) -> BoxFuture<'_, DomainResult<IndexWrite>> {
        let document = document.clone();
        Box::pin(async move {
            self.versioned_put(&self.names.users, document.user_id, &document, version)
                .await
        })
    }

    fn update_author_profile(
        &self,
        author_id: u64,
        nickname: &str,
        avatar_url: &str,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let body = author_profile_update(author_id, nickname, avatar_url);
        Box::pin(async move {
            let url = endpoint_url(
                &self.base_url,
                &format!("{}/_update_by_query", self.names.posts),
            );
            let response = send_with_retry(self.retry, || {
                self.http
                    .post(&url)
                    .query(&[("conflicts", "proceed")])
                    .json(&body)
            })
            .await?;
            let body: Value = error_for_status(response)
                .await?
                .json()
                .await
                .map_err(|err| HttpError::InvalidResponse(err.to_string()))?;
            Ok(body.get("updated").and_then(Value::as_u64).unwrap_or(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_and_missing_documents_are_not_errors() {
        assert_eq!(classify_write(StatusCode::CONFLICT), Some(IndexWrite::Stale));
        assert_eq!(classify_write(StatusCode::NOT_FOUND), Some(IndexWrite::Absent));
        assert_eq!(classify_write(StatusCode::CREATED), Some(IndexWrite::Applied));
        assert_eq!(classify_write(StatusCode::BAD_REQUEST), None);
    }

    #[test]
    fn writes_carry_the_external_version() {
        let query = versioned_query(1700);
        assert_eq!(query[0], ("version", "1700".to_string()));
        assert_eq!(query[1], ("version_type", "external".to_string()));
    }

    #[test]
    fn missing_documents_decode_to_none() {
        let found: Option<UserDocument> = decode_source(json!({
            "found": true,
            "_source": {
                "user_id": 9,
                "nickname": "nine",
                "avatar_url": "",
                "bio": "",
                "followers_count": 2,
                "following_count": 0
            }
        }))
        .unwrap();
        assert_eq!(found.unwrap().followers_count, 2);
        let missing: Option<UserDocument> = decode_source(json!({"found": false})).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn author_update_targets_one_author() {
        let body = author_profile_update(9, "nine", "a.png");
        assert_eq!(body["query"]["term"]["author_id"], json!(9));
        assert_eq!(body["script"]["params"]["nickname"], json!("nine"));
    }
}
