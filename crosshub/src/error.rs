// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the reconstruction engine.
//!
//! Three failure classes, kept in separate enums so callers can react
//! per class: ingest errors abort an `update()` batch with no partial
//! commit, lookup errors answer point-in-time queries that found no
//! applicable state, and fee/bundle errors wrap the collaborator and
//! lookup failures that surface during aggregation.

use ethers::types::Address;
use thiserror::Error;

use crosshub_types::events::EventConversionError;
use crosshub_types::{ChainId, GlobalConfigKey};

use crate::merkle::MerkleError;
use crate::sources::EventSourceError;

/// Result type for state-ingest operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Result type for point-in-time queries.
pub type LookupResult<T> = Result<T, LookupError>;

/// Result type for realized-LP-fee computation.
pub type FeeResult<T> = Result<T, FeeError>;

/// Result type for bundle aggregation.
pub type BundleResult<T> = Result<T, BundleError>;

/// Errors that abort an `update()`/`apply()` batch. State observed
/// before the error is discarded, never half-committed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(
        "{component} batch shape mismatch: {events} events against {timestamps} timestamps"
    )]
    BatchShape {
        component: &'static str,
        events: usize,
        timestamps: usize,
    },

    #[error(transparent)]
    MalformedEvent(#[from] EventConversionError),

    #[error(transparent)]
    Source(#[from] EventSourceError),
}

/// A point-in-time query found no applicable historical entry. Kept
/// distinct from legitimate zero/empty defaults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error(
        "no rate model for token {l1_token} on route {origin_chain_id}->{destination_chain_id} \
         at block {block}"
    )]
    RateModelNotFound {
        l1_token: Address,
        origin_chain_id: ChainId,
        destination_chain_id: ChainId,
        block: u64,
    },

    #[error("no {key} value in the config store at block {block}")]
    GlobalConfigNotFound { key: GlobalConfigKey, block: u64 },

    #[error("no spoke pool registered for chain {chain_id} at block {block}")]
    SpokePoolNotFound { chain_id: ChainId, block: u64 },

    #[error("no pool rebalance route for token {token} on chain {chain_id} at block {block}")]
    RouteNotFound {
        token: Address,
        chain_id: ChainId,
        block: u64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors from the realized-LP-fee batch computation.
#[derive(Debug, Error)]
pub enum FeeError {
    #[error("no hub block found at or before quote timestamp {timestamp}")]
    BlockResolution { timestamp: u64 },

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Source(#[from] EventSourceError),
}

/// Errors from pool-rebalance root construction.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Source(#[from] EventSourceError),

    #[error("previous-bundle reconstruction exceeded depth {0}")]
    RecursionDepthExceeded(u32),
}

impl IngestError {
    /// Short string identifying the error class for metrics labels.
    pub fn error_type(&self) -> &'static str {
        match self {
            IngestError::BatchShape { .. } => "batch_shape",
            IngestError::MalformedEvent(_) => "malformed_event",
            IngestError::Source(_) => "source",
        }
    }
}
