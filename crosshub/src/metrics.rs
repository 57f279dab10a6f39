// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGaugeVec, Registry,
};

const UPDATE_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10., 20., 30., 60., 120., 300.,
];

/// Engine-wide metrics. One instance is shared by the config-store
/// indexer, the hub ledger, the fee engine and the bundle aggregator;
/// the `component` label keeps their series apart.
#[derive(Clone, Debug)]
pub struct EngineMetrics {
    pub(crate) events_applied: IntCounterVec,
    pub(crate) events_skipped: IntCounterVec,
    pub(crate) last_block_searched: IntGaugeVec,
    pub(crate) update_duration_sec: HistogramVec,

    pub(crate) utilization_cache_hits: IntCounter,
    pub(crate) utilization_cache_misses: IntCounter,

    pub(crate) bundle_builds: IntCounter,
    pub(crate) bundle_reconstruction_depth: IntCounterVec,
}

impl EngineMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            events_applied: register_int_counter_vec_with_registry!(
                "crosshub_events_applied",
                "Total number of on-chain events folded into state",
                &["component", "kind"],
                registry,
            )
            .unwrap(),
            events_skipped: register_int_counter_vec_with_registry!(
                "crosshub_events_skipped",
                "Total number of on-chain events skipped during ingest",
                &["component", "reason"],
                registry,
            )
            .unwrap(),
            last_block_searched: register_int_gauge_vec_with_registry!(
                "crosshub_last_block_searched",
                "Latest block each indexer has ingested",
                &["component"],
                registry,
            )
            .unwrap(),
            update_duration_sec: register_histogram_vec_with_registry!(
                "crosshub_update_duration_sec",
                "Wall-clock duration of one update() pass",
                &["component"],
                UPDATE_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            utilization_cache_hits: register_int_counter_with_registry!(
                "crosshub_utilization_cache_hits",
                "Pool utilization lookups served from cache",
                registry,
            )
            .unwrap(),
            utilization_cache_misses: register_int_counter_with_registry!(
                "crosshub_utilization_cache_misses",
                "Pool utilization lookups that fell through to the chain",
                registry,
            )
            .unwrap(),
            bundle_builds: register_int_counter_with_registry!(
                "crosshub_bundle_builds",
                "Total number of pool rebalance roots built",
                registry,
            )
            .unwrap(),
            bundle_reconstruction_depth: register_int_counter_vec_with_registry!(
                "crosshub_bundle_reconstruction_depth",
                "Recursion depth reached while rebuilding pending bundles",
                &["depth"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
