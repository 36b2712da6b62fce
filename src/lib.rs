// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Storyline: story publishing and social reading backend
//!
//! This crate provides the API for writing multi-part stories, publishing
//! them, following authors, and reading a feed of followed authors' work.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::{FeedAssembler, StorageService};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub storage: StorageService,
    pub feed: FeedAssembler,
}
