// Copyright (c) James Kassemi, SC, US. All rights reserved.

use core_types::{ConfigurationError, RangeError};
use data_client::StoreError;
use doc_query::Side;
use thiserror::Error;

/// Rejected configuration or bounds. Nothing is changed when one is returned.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("invalid window range: {0}")]
    Range(#[from] RangeError),
}

/// Upstream failure, delivered to observers as an event.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("subscribe failed: {0}")]
    Subscribe(StoreError),
    #[error("snapshot fetch failed: {0}")]
    Snapshot(StoreError),
    #[error("{} backfill fetch failed: {source}", .side.as_str())]
    Backfill { side: Side, source: StoreError },
    #[error("change stream error: {0}")]
    Stream(StoreError),
    #[error("change stream ended")]
    StreamEnded,
}
