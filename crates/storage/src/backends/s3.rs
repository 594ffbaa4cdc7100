//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobMeta, BlobStore, ByteStream};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// S3 caps a multipart upload at 10,000 parts.
const MAX_PARTS: i32 = 10_000;

/// Tag carried by ambient credential failures so they surface as config errors.
const AMBIENT_CREDENTIALS_TAG: &str = "silo-s3-ambient-credentials";

type DefaultChain = aws_config::default_provider::credentials::DefaultCredentialsChain;

/// The AWS default credential chain, built on the first signed request
/// rather than in the constructor, so a filesystem-only deployment or a
/// test without trust roots never touches it.
#[derive(Debug)]
struct AmbientCredentials {
    region: aws_config::Region,
    chain: OnceCell<DefaultChain>,
}

impl AmbientCredentials {
    fn new(region: &str) -> Self {
        Self {
            region: aws_config::Region::new(region.to_string()),
            chain: OnceCell::new(),
        }
    }

    async fn resolve(&self) -> aws_credential_types::provider::Result {
        let chain = self
            .chain
            .get_or_init(|| {
                DefaultChain::builder()
                    .region(self.region.clone())
                    .build()
            })
            .await;
        chain.provide_credentials().await.map_err(|e| {
            CredentialsError::provider_error(format!("{AMBIENT_CREDENTIALS_TAG}: {e}"))
        })
    }
}

impl ProvideCredentials for AmbientCredentials {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.resolve())
    }
}

fn sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if err.to_string().contains(AMBIENT_CREDENTIALS_TAG) {
        return StorageError::Config(
            "no S3 credentials: set storage access_key_id/secret_access_key or provide AWS credentials in the environment".to_string(),
        );
    }
    StorageError::S3(Box::new(err))
}

/// S3-compatible blob store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style (`bucket.endpoint/key`). Required for MinIO.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "silo-config");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(AmbientCredentials::new(&resolved_region));
        }

        // Bare host:port endpoints (e.g. "minio:9000") default to http
        let normalized_endpoint = endpoint.as_ref().map(|endpoint_url| {
            let endpoint_lower = endpoint_url.to_lowercase();
            if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
                endpoint_url.clone()
            } else {
                format!("http://{endpoint_url}")
            }
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // Plain-http endpoints need no trust roots
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let stored_endpoint = match &normalized_endpoint {
            Some(url) => url.clone(),
            None => format!("s3.{resolved_region}.amazonaws.com"),
        };

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.map(|p| p.trim_end_matches('/').to_string()),
            endpoint: stored_endpoint,
            region: resolved_region,
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Strip the configured prefix from a full object key.
    fn strip_prefix(&self, full_key: &str) -> String {
        match &self.prefix {
            Some(prefix) => full_key
                .strip_prefix(&format!("{prefix}/"))
                .unwrap_or(full_key)
                .to_string(),
            None => full_key.to_string(),
        }
    }

    /// `CopySource` header value for a key in this bucket.
    fn copy_source(&self, key: &str) -> String {
        let encoded_key = utf8_percent_encode(&self.full_key(key), NON_ALPHANUMERIC).to_string();
        format!("{}/{encoded_key}", self.bucket)
    }

    /// Convert an AWS SDK error to StorageError, mapping 404 to NotFound.
    fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err
            && service_err.raw().status().as_u16() == 404
        {
            return StorageError::NotFound(key.to_string());
        }
        sdk_error(err)
    }

    async fn copy_parts(
        &self,
        dest_full: &str,
        upload_id: &str,
        sources: &[String],
    ) -> StorageResult<()> {
        let mut parts = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            let part_number = i32::try_from(index + 1)
                .ok()
                .filter(|n| *n <= MAX_PARTS)
                .ok_or_else(|| {
                    StorageError::Config(format!("compose exceeds {MAX_PARTS} parts"))
                })?;

            let output = self
                .client
                .upload_part_copy()
                .bucket(&self.bucket)
                .key(dest_full)
                .upload_id(upload_id)
                .part_number(part_number)
                .copy_source(self.copy_source(source))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error(e, source))?;

            let e_tag = output
                .copy_part_result()
                .and_then(|r| r.e_tag())
                .map(str::to_string);
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(e_tag)
                    .build(),
            );
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(dest_full)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err
                    && service_err.raw().status().as_u16() == 404
                {
                    return Ok(false);
                }
                Err(sdk_error(err))
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<BlobMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let last_modified = output
            .last_modified()
            .and_then(|dt| time::OffsetDateTime::from_unix_timestamp(dt.secs()).ok());

        Ok(BlobMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?
            .into_bytes();

        Ok(bytes)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let reader_stream = ReaderStream::new(output.body.into_async_read());
        let stream = reader_stream.map(|result| result.map_err(StorageError::Io));

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(data.into())
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // DeleteObject succeeds on absent keys; probe first to report NotFound
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(())
    }

    #[instrument(skip(self, sources), fields(backend = "s3", parts = sources.len()))]
    async fn compose(&self, dest: &str, sources: &[String]) -> StorageResult<u64> {
        if sources.is_empty() {
            return Err(StorageError::EmptyCompose);
        }

        let dest_full = self.full_key(dest);
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&dest_full)
            .send()
            .await
            .map_err(sdk_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        if let Err(e) = self.copy_parts(&dest_full, &upload_id, sources).await {
            if let Err(abort_err) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(&dest_full)
                .upload_id(&upload_id)
                .send()
                .await
            {
                tracing::warn!(
                    key = %dest,
                    upload_id = %upload_id,
                    error = %abort_err,
                    "Failed to abort multipart compose"
                );
            }
            return Err(e);
        }

        Ok(self.head(dest).await?.size)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(sdk_error)?;

            for obj in output.contents() {
                if let Some(obj_key) = obj.key() {
                    results.push(self.strip_prefix(obj_key));
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        results.sort();
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

        let check = async {
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok(())
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
    }
}
