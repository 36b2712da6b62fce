// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud Storage uploads for cover images and profile pictures.
//!
//! Objects are written with the JSON API's simple media upload. Access tokens
//! come from Application Default Credentials through gcloud-sdk, which caches
//! them until shortly before they expire.

use crate::config::Config;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gcloud_sdk::{GoogleAuthTokenGenerator, TokenSourceType};
use image::ImageFormat;
use std::sync::Arc;
use std::time::Duration;

const UPLOAD_BASE_URL: &str = "https://storage.googleapis.com/upload/storage/v1/b";
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// An image accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    WebP,
}

impl ImageKind {
    /// Detect the format from the leading bytes of `bytes`.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::WebP => Some(ImageKind::WebP),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::WebP => "webp",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::WebP => "image/webp",
        }
    }
}

/// Validate an upload body and return its detected format.
pub fn check_image(bytes: &[u8], max_bytes: usize) -> Result<ImageKind, AppError> {
    if bytes.is_empty() {
        return Err(AppError::BadRequest("Image body is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::BadRequest(format!(
            "Image is {} bytes; the limit is {}",
            bytes.len(),
            max_bytes
        )));
    }
    ImageKind::sniff(bytes).ok_or_else(|| {
        AppError::BadRequest("Unsupported image format (expected JPEG, PNG or WebP)".to_string())
    })
}

/// Object name for a user's profile picture.
pub fn profile_picture_object(user_id: &str, kind: ImageKind) -> String {
    format!("profile_pictures/{}.{}", user_id, kind.extension())
}

/// Object name for a story cover, unique per upload.
pub fn story_cover_object(user_id: &str, uploaded_at: DateTime<Utc>, kind: ImageKind) -> String {
    format!(
        "story_covers/{}_{}.{}",
        user_id,
        uploaded_at.timestamp_millis(),
        kind.extension()
    )
}

#[derive(Clone)]
enum Backend {
    Gcs {
        http: reqwest::Client,
        tokens: Arc<GoogleAuthTokenGenerator>,
    },
    /// In-memory objects (test builds and offline runs).
    Memory(Arc<DashMap<String, Vec<u8>>>),
}

/// Blob store client.
#[derive(Clone)]
pub struct StorageService {
    bucket: String,
    public_base_url: String,
    backend: Backend,
}

impl StorageService {
    /// Create a Cloud Storage client for the configured bucket.
    ///
    /// Credentials are resolved the usual ADC way: `GOOGLE_APPLICATION_CREDENTIALS`,
    /// the gcloud well-known file, then the metadata server.
    pub async fn new(config: &Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        let tokens =
            GoogleAuthTokenGenerator::new(TokenSourceType::Default, vec![STORAGE_SCOPE.to_string()])
                .await
                .map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("Failed to load storage credentials: {}", e))
                })?;

        Ok(Self {
            bucket: config.storage_bucket.clone(),
            public_base_url: config.storage_public_base_url.clone(),
            backend: Backend::Gcs {
                http,
                tokens: Arc::new(tokens),
            },
        })
    }

    /// Create an in-memory store for testing (offline mode).
    pub fn new_mock(config: &Config) -> Self {
        Self {
            bucket: config.storage_bucket.clone(),
            public_base_url: config.storage_public_base_url.clone(),
            backend: Backend::Memory(Arc::new(DashMap::new())),
        }
    }

    /// Public retrieval URL of an object.
    pub fn public_url(&self, object_name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_base_url,
            self.bucket,
            urlencoding::encode(object_name).replace("%2F", "/")
        )
    }

    /// Store `bytes` under `object_name` and return its retrieval URL.
    pub async fn put_object(
        &self,
        object_name: &str,
        kind: ImageKind,
        bytes: Vec<u8>,
    ) -> Result<String, AppError> {
        match &self.backend {
            Backend::Memory(objects) => {
                objects.insert(object_name.to_string(), bytes);
            }
            Backend::Gcs { http, tokens } => {
                let token = tokens
                    .create_token()
                    .await
                    .map_err(|e| AppError::BlobStore(format!("Access token unavailable: {}", e)))?;
                let url = format!(
                    "{}/{}/o?uploadType=media&name={}",
                    UPLOAD_BASE_URL,
                    self.bucket,
                    urlencoding::encode(object_name)
                );

                let size = bytes.len();
                let response = http
                    .post(&url)
                    .header(reqwest::header::AUTHORIZATION, token.header_value())
                    .header(reqwest::header::CONTENT_TYPE, kind.content_type())
                    .body(bytes)
                    .send()
                    .await
                    .map_err(|e| AppError::BlobStore(e.to_string()))?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(AppError::BlobStore(format!("HTTP {}: {}", status, body)));
                }

                tracing::info!(object = object_name, size, "Uploaded object");
            }
        }

        Ok(self.public_url(object_name))
    }

    #[cfg(test)]
    fn has_object(&self, object_name: &str) -> bool {
        match &self.backend {
            Backend::Memory(objects) => objects.contains_key(object_name),
            Backend::Gcs { .. } => false,
        }
    }
}
