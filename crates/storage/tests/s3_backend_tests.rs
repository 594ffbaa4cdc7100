use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use bytes::Bytes;
use silo_storage::backends::s3::S3Backend;
use silo_storage::{BlobStore, BlobStoreExt, StorageError};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::{ContainerAsync, GenericImage, ImageExt, runners::AsyncRunner};

const MINIO_IMAGE: &str = "minio/minio";
const MINIO_TAG: &str = "RELEASE.2024-02-12T21-36-45Z";

fn should_skip_s3_tests() -> bool {
    std::env::var("SKIP_S3_TESTS").is_ok()
}

struct MinioContext {
    _container: ContainerAsync<GenericImage>,
    endpoint: String,
    access_key: String,
    secret_key: String,
}

impl MinioContext {
    async fn new() -> Result<Self, String> {
        let access_key = "minio-access-key".to_string();
        let secret_key = "minio-secret-key".to_string();

        let container: ContainerAsync<GenericImage> = GenericImage::new(MINIO_IMAGE, MINIO_TAG)
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("API:"))
            .with_env_var("MINIO_ROOT_USER", access_key.clone())
            .with_env_var("MINIO_ROOT_PASSWORD", secret_key.clone())
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .map_err(|e| format!("failed to start MinIO container: {e}"))?;

        let host = container
            .get_host()
            .await
            .map_err(|e| format!("failed to get host: {e}"))?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .map_err(|e| format!("failed to get port: {e}"))?;

        let endpoint = format!("http://{host}:{port}");

        Ok(Self {
            _container: container,
            endpoint,
            access_key,
            secret_key,
        })
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), String> {
        let credentials = Credentials::new(
            self.access_key.clone(),
            self.secret_key.clone(),
            None,
            None,
            "test",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .credentials_provider(credentials)
            .http_client(aws_smithy_http_client::Builder::new().build_http())
            .endpoint_url(self.endpoint.clone())
            .force_path_style(true)
            .build();

        let client = Client::from_conf(config);
        client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| format!("failed to create bucket: {e}"))?;
        Ok(())
    }
}

struct S3TestHarness {
    _context: MinioContext,
    backend: S3Backend,
}

impl S3TestHarness {
    async fn new(prefix: Option<String>) -> Result<Self, String> {
        let context = MinioContext::new().await?;
        let bucket = "silo-test";
        context.create_bucket(bucket).await?;

        let backend = S3Backend::new(
            bucket,
            Some(context.endpoint.clone()),
            Some("us-east-1".to_string()),
            prefix,
            Some(context.access_key.clone()),
            Some(context.secret_key.clone()),
            true,
        )
        .await
        .map_err(|e| format!("failed to create S3 backend: {e}"))?;

        Ok(Self {
            _context: context,
            backend,
        })
    }
}

#[tokio::test]
async fn test_s3_put_get_list_with_prefix() {
    if should_skip_s3_tests() {
        return;
    }

    let harness = match S3TestHarness::new(Some("prefix".to_string())).await {
        Ok(harness) => harness,
        Err(err) => {
            eprintln!("Skipping S3 test: {err}");
            return;
        }
    };
    let backend = &harness.backend;

    backend.put("files/a", Bytes::from_static(b"a")).await.unwrap();
    backend.put("files/b", Bytes::from_static(b"b")).await.unwrap();

    assert_eq!(backend.get("files/a").await.unwrap(), Bytes::from_static(b"a"));
    assert_eq!(
        backend.list("files/").await.unwrap(),
        vec!["files/a".to_string(), "files/b".to_string()]
    );
    backend.health_check().await.unwrap();
}

#[tokio::test]
async fn test_s3_compose_and_delete() {
    if should_skip_s3_tests() {
        return;
    }

    let harness = match S3TestHarness::new(None).await {
        Ok(harness) => harness,
        Err(err) => {
            eprintln!("Skipping S3 test: {err}");
            return;
        }
    };
    let backend = &harness.backend;

    // Every part but the last must be at least 5 MiB
    let first = vec![1u8; 5 * 1024 * 1024];
    let second = vec![2u8; 1024];
    backend
        .put("multipart/s/0", Bytes::from(first.clone()))
        .await
        .unwrap();
    backend
        .put("multipart/s/1", Bytes::from(second.clone()))
        .await
        .unwrap();

    let sources = vec!["multipart/s/0".to_string(), "multipart/s/1".to_string()];
    let size = backend.compose("files/joined", &sources).await.unwrap();
    assert_eq!(size as usize, first.len() + second.len());

    let joined = backend.get("files/joined").await.unwrap();
    assert_eq!(&joined[..first.len()], &first[..]);
    assert_eq!(&joined[first.len()..], &second[..]);

    backend.delete("files/joined").await.unwrap();
    assert!(matches!(
        backend.delete("files/joined").await,
        Err(StorageError::NotFound(_))
    ));
    assert!(!backend.delete_if_exists("files/joined").await.unwrap());
}
