use super::{ObjectVersion, RemoteStore};
use crate::artifacts::ByteStream;
use crate::error::RemoteError;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use futures_util::StreamExt;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// Profile name meaning "use the static keys instead"
pub const PROFILE_NONE: &str = "None";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct S3Settings {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Named profile from the shared AWS credentials file
    pub profile: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        S3Settings {
            bucket_name: String::new(),
            region: "eu-central-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            profile: String::new(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl S3Settings {
    fn uses_profile(&self) -> bool {
        !self.profile.is_empty() && self.profile != PROFILE_NONE
    }

    /// Enough is configured to build a client.
    pub fn is_ready(&self) -> bool {
        if self.bucket_name.is_empty() {
            debug!("s3_settings: bucket name is empty");
            return false;
        }
        if self.region.is_empty() {
            debug!("s3_settings: region is empty");
            return false;
        }
        if !self.uses_profile()
            && (self.access_key_id.is_empty() || self.secret_access_key.is_empty())
        {
            debug!("s3_settings: no profile and no static keys");
            return false;
        }
        true
    }
}

/// Create an S3 client from settings, resolving a named profile through the
/// shared AWS config when one is set.
pub async fn create_s3_client(settings: &S3Settings) -> Result<Client, RemoteError> {
    if !settings.is_ready() {
        return Err(RemoteError::Transport(
            "S3 settings are incomplete".to_string(),
        ));
    }

    let mut builder = if settings.uses_profile() {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(&settings.profile)
            .region(Region::new(settings.region.clone()))
            .load()
            .await;
        S3ConfigBuilder::from(&shared)
    } else {
        let credentials = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None,
            None,
            "s3-link-settings",
        );
        S3ConfigBuilder::new()
            .credentials_provider(credentials)
            .region(Region::new(settings.region.clone()))
    };

    if let Some(endpoint_url) = settings.endpoint_url.as_deref() {
        builder = builder.endpoint_url(endpoint_url);
    }

    if settings.force_path_style {
        builder = builder.force_path_style(true);
    }

    Ok(Client::from_conf(builder.build()))
}

fn transport<E: std::error::Error>(context: &str, err: E) -> RemoteError {
    let message = format!("{}: {}", context, DisplayErrorContext(err));
    error!("s3_request_failed: {}", message);
    RemoteError::Transport(message)
}

/// [`RemoteStore`] backed by one S3 bucket.
#[derive(Debug, Clone)]
pub struct S3RemoteStore {
    client: Client,
    bucket: String,
}

impl S3RemoteStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn connect(settings: &S3Settings) -> Result<Self, RemoteError> {
        let client = create_s3_client(settings).await?;
        Ok(Self::new(client, settings.bucket_name.clone()))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl RemoteStore for S3RemoteStore {
    async fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>, RemoteError> {
        // (is_latest, version)
        let mut found: Vec<(bool, ObjectVersion)> = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            let response = self
                .client
                .list_object_versions()
                .bucket(&self.bucket)
                .prefix(key)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_id_marker.take())
                .send()
                .await
                .map_err(|e| transport("list_object_versions", e))?;

            let deleted = response
                .delete_markers()
                .iter()
                .any(|m| m.key() == Some(key) && m.is_latest() == Some(true));
            if deleted {
                debug!("list_versions: {} latest version is a delete marker", key);
                return Ok(Vec::new());
            }

            for version in response.versions() {
                if version.key() != Some(key) {
                    continue;
                }
                let Some(version_id) = version.version_id() else {
                    continue;
                };
                found.push((
                    version.is_latest().unwrap_or(false),
                    ObjectVersion {
                        version_id: version_id.to_string(),
                        last_modified: version.last_modified().and_then(|t| t.to_millis().ok()),
                    },
                ));
            }

            if response.is_truncated() != Some(true) {
                break;
            }
            key_marker = response.next_key_marker().map(str::to_string);
            version_id_marker = response.next_version_id_marker().map(str::to_string);
            if key_marker.is_none() && version_id_marker.is_none() {
                break;
            }
        }

        found.sort_by(|(a_latest, a), (b_latest, b)| {
            b_latest
                .cmp(a_latest)
                .then_with(|| b.last_modified.cmp(&a.last_modified))
        });
        debug!("list_versions: {} has {} versions", key, found.len());
        Ok(found.into_iter().map(|(_, v)| v).collect())
    }

    async fn get_object(&self, key: &str, version_id: &str) -> Result<ByteStream, RemoteError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()) == Some(true) {
                    RemoteError::NotFound(key.to_string())
                } else {
                    transport("get_object", e)
                }
            })?;

        Ok(ReaderStream::new(response.body.into_async_read()).boxed())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, RemoteError> {
        let presigning_config =
            PresigningConfig::expires_in(ttl).map_err(|e| transport("presigning_config", e))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| transport("presign_get_object", e))?;

        Ok(presigned_request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(endpoint: &str) -> S3Settings {
        S3Settings {
            bucket_name: "test-bucket".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            endpoint_url: Some(endpoint.to_string()),
            force_path_style: true,
            ..S3Settings::default()
        }
    }

    const LIST_VERSIONS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListVersionsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>test-bucket</Name>
  <Prefix>images/logo.png</Prefix>
  <KeyMarker></KeyMarker>
  <VersionIdMarker></VersionIdMarker>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Version>
    <Key>images/logo.png</Key>
    <VersionId>v1</VersionId>
    <IsLatest>false</IsLatest>
    <LastModified>2024-01-01T00:00:00.000Z</LastModified>
    <ETag>"aaa"</ETag>
    <Size>3</Size>
    <StorageClass>STANDARD</StorageClass>
  </Version>
  <Version>
    <Key>images/logo.png</Key>
    <VersionId>v2</VersionId>
    <IsLatest>true</IsLatest>
    <LastModified>2024-02-01T00:00:00.000Z</LastModified>
    <ETag>"bbb"</ETag>
    <Size>4</Size>
    <StorageClass>STANDARD</StorageClass>
  </Version>
  <Version>
    <Key>images/logo.png.bak</Key>
    <VersionId>v9</VersionId>
    <IsLatest>true</IsLatest>
    <LastModified>2024-03-01T00:00:00.000Z</LastModified>
    <ETag>"ccc"</ETag>
    <Size>5</Size>
    <StorageClass>STANDARD</StorageClass>
  </Version>
</ListVersionsResult>"#;

    #[test]
    fn readiness_requires_bucket_region_and_credentials() {
        let mut s = settings("http://localhost");
        assert!(s.is_ready());

        s.access_key_id.clear();
        assert!(!s.is_ready());

        s.profile = PROFILE_NONE.to_string();
        assert!(!s.is_ready());

        s.profile = "work".to_string();
        assert!(s.is_ready());

        s.bucket_name.clear();
        assert!(!s.is_ready());
    }

    #[test]
    fn settings_deserialize_from_camel_case() {
        let s: S3Settings = serde_json::from_str(
            r#"{"bucketName":"b","accessKeyId":"k","secretAccessKey":"s"}"#,
        )
        .unwrap();
        assert_eq!(s.bucket_name, "b");
        assert_eq!(s.region, "eu-central-1");
        assert!(s.is_ready());
    }

    #[tokio::test]
    async fn connect_rejects_incomplete_settings() {
        let err = S3RemoteStore::connect(&S3Settings::default()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)));
    }

    #[tokio::test]
    async fn list_versions_filters_exact_key_newest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test-bucket"))
            .and(query_param("prefix", "images/logo.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(LIST_VERSIONS_XML),
            )
            .mount(&server)
            .await;

        let store = S3RemoteStore::connect(&settings(&server.uri())).await.unwrap();
        let versions = store.list_versions("images/logo.png").await.unwrap();

        let ids: Vec<&str> = versions.iter().map(|v| v.version_id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v1"]);
        assert_eq!(
            store.latest_version("images/logo.png").await.unwrap().version_id,
            "v2"
        );
    }

    #[tokio::test]
    async fn get_object_streams_requested_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test-bucket/images/logo.png"))
            .and(query_param("versionId", "v2"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&server)
            .await;

        let store = S3RemoteStore::connect(&settings(&server.uri())).await.unwrap();
        let mut body = store.get_object("images/logo.png", "v2").await.unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"png-bytes");
    }

    #[tokio::test]
    async fn signed_url_is_presigned_locally() {
        let store = S3RemoteStore::connect(&settings("http://127.0.0.1:9")).await.unwrap();
        let url = store
            .signed_url("images/logo.png", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.contains("/test-bucket/images/logo.png"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=3600"));
    }
}
