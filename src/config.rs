// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Cloud Run injects secrets as environment variables via secret bindings,
//! so everything is read once at startup and kept in memory.

use std::env;

/// Default public host for Cloud Storage objects.
pub const DEFAULT_STORAGE_PUBLIC_BASE_URL: &str = "https://storage.googleapis.com";

/// Default upload limit for images (5 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Default idle lifetime of a feed de-duplication session (24 hours).
pub const DEFAULT_FEED_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Cloud Storage bucket for covers and profile pictures
    pub storage_bucket: String,
    /// Base URL used to build public retrieval URLs for stored objects
    pub storage_public_base_url: String,
    /// Largest accepted image upload, in bytes
    pub max_upload_bytes: usize,
    /// Idle lifetime of a feed session before its seen-set is dropped
    pub feed_session_ttl_secs: u64,

    // --- Secrets ---
    /// Key shared with the identity provider for HS256 session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            storage_bucket: "test-bucket".to_string(),
            storage_public_base_url: DEFAULT_STORAGE_PUBLIC_BASE_URL.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            feed_session_ttl_secs: DEFAULT_FEED_SESSION_TTL_SECS,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: parse_or("PORT", 8080)?,
            storage_bucket: env::var("STORAGE_BUCKET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STORAGE_BUCKET"))?,
            storage_public_base_url: env::var("STORAGE_PUBLIC_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_STORAGE_PUBLIC_BASE_URL.to_string()),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            feed_session_ttl_secs: parse_or(
                "FEED_SESSION_TTL_SECS",
                DEFAULT_FEED_SESSION_TTL_SECS,
            )?,

            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
        })
    }
}

/// Parse an optional numeric variable, falling back to `default` when unset.
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
