use reqwest::Client;
use tracing::warn;

use crate::config::SbomConfig;
use crate::domain::repository::BlobStore;
use crate::error::SbomServiceError;

struct BlobTarget {
    endpoint: String,
    bucket: String,
    access_key: Option<String>,
    secret_key: Option<String>,
}

/// Best-effort object storage client. Uploads only run when both bucket and
/// endpoint are configured; any failure degrades to "no URL", and persisted
/// SBOMs carry the document either way.
pub struct HttpBlobStore {
    client: Client,
    target: Option<BlobTarget>,
}

impl HttpBlobStore {
    pub fn from_config(config: &SbomConfig) -> Self {
        let target = match (&config.blob_bucket, &config.blob_endpoint) {
            (Some(bucket), Some(endpoint)) => Some(BlobTarget {
                endpoint: endpoint.trim_end_matches('/').to_owned(),
                bucket: bucket.clone(),
                access_key: config.blob_access_key.clone(),
                secret_key: config.blob_secret_key.clone(),
            }),
            _ => None,
        };
        Self {
            client: Client::new(),
            target,
        }
    }

    #[cfg(test)]
    fn disabled() -> Self {
        Self {
            client: Client::new(),
            target: None,
        }
    }
}

impl BlobStore for HttpBlobStore {
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<Option<String>, SbomServiceError> {
        let Some(target) = &self.target else {
            return Ok(None);
        };

        let url = format!("{}/{}/{}", target.endpoint, target.bucket, key);
        let mut request = self
            .client
            .put(&url)
            .header("content-type", "application/json")
            .body(bytes.to_vec());
        if let (Some(access_key), Some(secret_key)) = (&target.access_key, &target.secret_key) {
            request = request.basic_auth(access_key, Some(secret_key));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => Ok(Some(url)),
            Ok(response) => {
                warn!(status = %response.status(), url, "blob upload rejected");
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, url, "blob upload failed");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_store_skips_upload() {
        let store = HttpBlobStore::disabled();
        let url = store.upload("sbom/web.json", b"{}").await.unwrap();
        assert_eq!(url, None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades_to_none() {
        let store = HttpBlobStore {
            client: Client::new(),
            target: Some(BlobTarget {
                endpoint: "http://127.0.0.1:1".to_owned(),
                bucket: "sboms".to_owned(),
                access_key: None,
                secret_key: None,
            }),
        };
        let url = store.upload("sbom/web.json", b"{}").await.unwrap();
        assert_eq!(url, None);
    }
}
