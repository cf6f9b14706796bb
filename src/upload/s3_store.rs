//! S3-backed object store

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client as S3Client;
use log::{debug, info};

use super::object_store::{ObjectStore, PartToken};
use crate::configuration::StoreSettings;
use crate::error_handling::types::StoreError;

pub struct S3ObjectStore {
    s3_client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(settings: &StoreSettings) -> Self {
        let credentials = Credentials::new(
            settings.credentials.access_key_id.clone(),
            settings.credentials.secret_access_key.clone(),
            None,
            None,
            "roadcrew",
        );

        let mut s3_config_builder = aws_sdk_s3::config::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials);

        // S3-compatible stores usually want path-style addressing
        if let Some(endpoint) = &settings.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        let s3_client = S3Client::from_conf(s3_config_builder.build());
        info!(
            "S3 object store configured for bucket {} in {}",
            settings.bucket, settings.region
        );

        Self {
            s3_client,
            bucket: settings.bucket.clone(),
        }
    }
}

fn request_failed<E>(op: &str, key: &str, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::RequestFailed(format!("{} {}: {}", op, key, DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        path: &Path,
        length: u64,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let body = ByteStream::read_from()
            .path(path)
            .length(Length::Exact(length))
            .build()
            .await
            .map_err(|e| request_failed("put_object", key, e))?;
        self.s3_client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_length(length as i64)
            .content_type(content_type)
            .acl(ObjectCannedAcl::Private)
            .send()
            .await
            .map_err(|e| request_failed("put_object", key, e))?;
        debug!("put_object {} ({} bytes) acknowledged", key, length);
        Ok(())
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String, StoreError> {
        let output = self
            .s3_client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .acl(ObjectCannedAcl::Private)
            .send()
            .await
            .map_err(|e| request_failed("create_multipart_upload", key, e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::MissingUploadId(key.to_string()))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<PartToken, StoreError> {
        let length = body.len() as i64;
        let output = self
            .s3_client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .content_length(length)
            .send()
            .await
            .map_err(|e| request_failed("upload_part", key, e))?;

        let etag = output
            .e_tag()
            .ok_or(StoreError::MissingETag(part_number))?
            .to_string();
        Ok(PartToken { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartToken],
    ) -> Result<(), StoreError> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect();

        self.s3_client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| request_failed("complete_multipart_upload", key, e))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.s3_client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| request_failed("abort_multipart_upload", key, e))?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), StoreError> {
        self.s3_client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| request_failed("list_objects_v2", &self.bucket, e))?;
        Ok(())
    }
}
