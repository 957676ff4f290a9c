use std::path::Path;

use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::info;

use super::{ArchiveKey, ArchiveStore};
use crate::config::AwsConfig;
use crate::error::{Error, Result};

const DEFAULT_REGION: &str = "us-east-1";
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds the client from the default AWS provider chain. A custom endpoint (localstack,
    /// minio) switches to path style addressing.
    pub async fn connect(bucket: impl Into<String>, aws: &AwsConfig) -> Self {
        let bucket = bucket.into();
        let region_provider = RegionProviderChain::first_try(aws.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
        if let Some(endpoint_url) = &aws.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let shared_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
            .force_path_style(aws.endpoint_url.is_some())
            .build();

        info!(
            bucket = %bucket,
            region = ?shared_config.region(),
            endpoint = ?aws.endpoint_url,
            "Created S3 client"
        );
        Self::new(Client::from_conf(s3_config), bucket)
    }
}

impl ArchiveStore for S3Store {
    async fn put_file(&self, key: &ArchiveKey, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path).await.map_err(|e| {
            Error::Staging(format!(
                "Failed to open staged file {}: {e}",
                path.display()
            ))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(NDJSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                Error::Archive(format!(
                    "Failed to put s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}
