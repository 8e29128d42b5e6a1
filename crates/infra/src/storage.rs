use std::time::Duration;

use cornerstone_domain::DomainResult;
use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::models::TempStorage;

use crate::config::AppConfig;
use crate::http::{RetrySettings, build_client, endpoint_url, error_for_status, send_with_retry};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// S3-style bucket reached by plain object PUTs.
#[derive(Clone)]
pub struct HttpTempStorage {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    public_base_url: String,
    retry: RetrySettings,
}

impl HttpTempStorage {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            http: build_client(UPLOAD_TIMEOUT),
            endpoint: config.storage_endpoint.trim_end_matches('/').to_string(),
            bucket: config.storage_temp_bucket.clone(),
            public_base_url: config.storage_public_base_url.trim_end_matches('/').to_string(),
            retry: RetrySettings::default(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        endpoint_url(&self.endpoint, &format!("{}/{}", self.bucket, key))
    }

    fn public_url(&self, key: &str) -> String {
        endpoint_url(&self.public_base_url, key)
    }
}

impl TempStorage for HttpTempStorage {
    fn upload(
        &self,
        object_key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'_, DomainResult<String>> {
        let key = object_key.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let url = self.object_url(&key);
            let size = bytes.len();
            let response = send_with_retry(self.retry, || {
                self.http
                    .put(&url)
                    .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                    .body(bytes.clone())
            })
            .await?;
            error_for_status(response).await?;
            tracing::debug!(key = %key, size, "temp object uploaded");
            Ok(self.public_url(&key))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> HttpTempStorage {
        HttpTempStorage {
            http: reqwest::Client::new(),
            endpoint: "http://minio:9000".into(),
            bucket: "audit-temp".into(),
            public_base_url: "https://cdn.example.com/audit-temp/".into(),
            retry: RetrySettings::default(),
        }
    }

    #[test]
    fn objects_land_in_the_temp_bucket() {
        let storage = storage();
        assert_eq!(
            storage.object_url("audit/frames/abc.jpg"),
            "http://minio:9000/audit-temp/audit/frames/abc.jpg"
        );
        assert_eq!(
            storage.public_url("audit/frames/abc.jpg"),
            "https://cdn.example.com/audit-temp/audit/frames/abc.jpg"
        );
    }
}
