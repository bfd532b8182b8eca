//! AWS S3 object-store sink.
//!
//! Stores every object in a single upstream S3 bucket under a key prefix:
//!   `{prefix}{storage_key}`
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit keys
//! are configured.

use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::backend::{ByteStream, Sink, SinkError, SinkFuture, SinkWriter};
use crate::domain::File;
use crate::path::StorageKey;

/// Cache policy attached to every uploaded object.  Artifacts are
/// immutable per version; documents are re-fetched through the server.
const CACHE_CONTROL: &str = "public, max-age=31536000";

/// Sink that forwards operations to AWS S3 (or an S3-compatible service).
pub struct ObjectStoreSink {
    /// AWS S3 SDK client.
    client: Client,
    /// The remote S3 bucket name.
    bucket: String,
    /// Key prefix for all objects in the upstream bucket.
    prefix: String,
}

impl ObjectStoreSink {
    /// Create a new S3 sink.
    ///
    /// Loads AWS credentials from the default credential chain and
    /// initializes the S3 client for the specified region.
    pub async fn new(
        bucket: String,
        region: String,
        prefix: String,
        endpoint_url: Option<String>,
        use_path_style: bool,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region));

        if let Some(ref endpoint) = endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        if let (Some(ref ak), Some(ref sk)) = (&access_key_id, &secret_access_key) {
            let creds = aws_sdk_s3::config::Credentials::new(
                ak,
                sk,
                None, // session_token
                None, // expiry
                "assetpipe-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "S3 object-store sink initialized: bucket={} prefix='{}'",
            bucket, prefix
        );

        Ok(Self {
            client,
            bucket,
            prefix,
        })
    }

    /// Map a storage key to an upstream S3 key.
    fn s3_key(&self, key: &StorageKey) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Map an AWS SDK error to a sink error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> SinkError {
        SinkError::Unavailable(anyhow::anyhow!("AWS S3 {context}: {err}"))
    }
}

/// Buffered upload: S3 objects appear atomically on `put_object`, so
/// nothing is sent until close.
struct ObjectStoreWriter {
    client: Client,
    bucket: String,
    s3_key: String,
    content_type: String,
    buf: BytesMut,
}

impl SinkWriter for ObjectStoreWriter {
    fn write(&mut self, chunk: Bytes) -> SinkFuture<'_, ()> {
        self.buf.extend_from_slice(&chunk);
        Box::pin(async { Ok(()) })
    }

    fn close(self: Box<Self>) -> SinkFuture<'static, ()> {
        let this = *self;
        Box::pin(async move {
            debug!(
                "AWS put_object: bucket={} key={} bytes={}",
                this.bucket,
                this.s3_key,
                this.buf.len()
            );
            this.client
                .put_object()
                .bucket(&this.bucket)
                .key(&this.s3_key)
                .content_type(&this.content_type)
                .cache_control(CACHE_CONTROL)
                .body(S3ByteStream::from(this.buf.freeze()))
                .send()
                .await
                .map_err(|e| ObjectStoreSink::map_sdk_error("put_object", e))?;
            Ok(())
        })
    }
}

impl Sink for ObjectStoreSink {
    fn write(&self, file: &File) -> SinkFuture<'_, Box<dyn SinkWriter>> {
        let writer: Box<dyn SinkWriter> = Box::new(ObjectStoreWriter {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            s3_key: self.s3_key(file.key()),
            content_type: file.content_type().to_string(),
            buf: BytesMut::new(),
        });
        Box::pin(async move { Ok(writer) })
    }

    fn read(&self, key: &StorageKey) -> SinkFuture<'_, ByteStream> {
        let key = key.clone();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);

            debug!("AWS get_object: bucket={} key={}", self.bucket, s3_key);

            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        SinkError::not_found(&key)
                    } else {
                        Self::map_sdk_error("get_object", service_err)
                    }
                })?;

            let reader = resp.body.into_async_read();
            Ok(ReaderStream::new(reader).map_err(SinkError::from).boxed())
        })
    }

    fn delete(&self, key: &StorageKey) -> SinkFuture<'_, ()> {
        let key = key.clone();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);

            debug!("AWS delete_object: bucket={} key={}", self.bucket, s3_key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;

            Ok(())
        })
    }
}
