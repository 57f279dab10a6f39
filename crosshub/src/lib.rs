// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client-side reconstruction of cross-chain settlement state.
//!
//! Three event-sourced containers rebuild the protocol's hub state
//! from logs: [`config_store::ConfigStoreState`] replays the versioned
//! parameter store, [`hub_ledger::HubLedgerState`] replays token routes
//! and the root-bundle lifecycle, and [`bundle::BundleAggregator`]
//! folds classified settlement activity into the pool-rebalance and
//! relayer-refund merkle roots a proposer would commit on-chain. All
//! chain access happens through the collaborator traits in [`sources`];
//! the engine itself never opens a connection.

#![allow(clippy::too_many_arguments)]

pub mod bundle;
pub mod config_store;
pub mod error;
pub mod hub_ledger;
pub mod merkle;
pub mod metrics;
pub mod settings;
pub mod sources;
pub mod sync;

#[cfg(test)]
pub mod test_utils;

pub use bundle::{BundleAggregator, PoolRebalanceRoot, RelayerRefundRoot};
pub use config_store::ConfigStoreState;
pub use error::{BundleError, FeeError, IngestError, LookupError};
pub use hub_ledger::{HubLedgerState, SharedConfigStore};
pub use metrics::EngineMetrics;
pub use settings::EngineSettings;
pub use sync::StateIndexer;
