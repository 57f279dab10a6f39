// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed view of the on-chain token-config JSON payload.
//!
//! The payload is an arbitrary string anyone could have pushed through
//! governance, so the decode step is fallible and nothing dynamically
//! typed escapes it. Every section is optional and absence is kept
//! distinct from emptiness: `None` means the update said nothing about
//! a section, not that it set the section to empty.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::rate_model::{RateModel, RateModelError};
use crate::ChainId;

/// `"originChainId-destinationChainId"` key for route-specific rate
/// models.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RouteKey {
    pub origin_chain_id: ChainId,
    pub destination_chain_id: ChainId,
}

impl RouteKey {
    pub fn new(origin_chain_id: ChainId, destination_chain_id: ChainId) -> Self {
        Self {
            origin_chain_id,
            destination_chain_id,
        }
    }
}

impl FromStr for RouteKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (origin, destination) = s.trim().split_once('-').ok_or(())?;
        Ok(Self {
            origin_chain_id: origin.trim().parse().map_err(|_| ())?,
            destination_chain_id: destination.trim().parse().map_err(|_| ())?,
        })
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin_chain_id, self.destination_chain_id)
    }
}

/// Per-chain liquidity bounds for one L1 token. Negative on-chain
/// values are clamped to zero at parse time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpokeTargetBalance {
    pub target: U256,
    pub threshold: U256,
}

/// One decoded token-config update. Unknown top-level fields are
/// ignored for forward compatibility; known sections decode strictly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub rate_model: Option<RateModel>,
    pub route_rate_models: Option<BTreeMap<RouteKey, RateModel>>,
    pub spoke_target_balances: Option<BTreeMap<ChainId, SpokeTargetBalance>>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenConfigError {
    #[error("token config is not valid json: {0}")]
    InvalidJson(String),
    #[error("token config is not a json object")]
    NotAnObject,
    #[error("token config section {0} is not a json object")]
    SectionShape(&'static str),
    #[error(transparent)]
    RateModel(#[from] RateModelError),
    #[error("route rate model key {0:?} is not of the form \"origin-destination\"")]
    RouteKey(String),
    #[error("spoke target balance entry {0:?} is malformed")]
    SpokeEntry(String),
}

impl TokenConfig {
    /// Decodes the raw on-chain JSON string. Any invariant violation in
    /// a known section rejects the whole update.
    pub fn parse(raw: &str) -> Result<Self, TokenConfigError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| TokenConfigError::InvalidJson(e.to_string()))?;
        let object = value.as_object().ok_or(TokenConfigError::NotAnObject)?;

        let rate_model = object
            .get("rateModel")
            .map(RateModel::from_json)
            .transpose()?;

        let route_rate_models = object
            .get("routeRateModel")
            .map(parse_route_rate_models)
            .transpose()?;

        let spoke_target_balances = object
            .get("spokeTargetBalances")
            .map(parse_spoke_target_balances)
            .transpose()?;

        Ok(Self {
            rate_model,
            route_rate_models,
            spoke_target_balances,
        })
    }
}

fn parse_route_rate_models(
    section: &Value,
) -> Result<BTreeMap<RouteKey, RateModel>, TokenConfigError> {
    let entries = section
        .as_object()
        .ok_or(TokenConfigError::SectionShape("routeRateModel"))?;
    let mut models = BTreeMap::new();
    for (key, model) in entries {
        let route: RouteKey = key
            .parse()
            .map_err(|_| TokenConfigError::RouteKey(key.clone()))?;
        models.insert(route, RateModel::from_json(model)?);
    }
    Ok(models)
}

fn parse_spoke_target_balances(
    section: &Value,
) -> Result<BTreeMap<ChainId, SpokeTargetBalance>, TokenConfigError> {
    let entries = section
        .as_object()
        .ok_or(TokenConfigError::SectionShape("spokeTargetBalances"))?;
    let mut balances = BTreeMap::new();
    for (key, entry) in entries {
        let (chain_id, balance) = parse_spoke_entry(key, entry)
            .ok_or_else(|| TokenConfigError::SpokeEntry(key.clone()))?;
        balances.insert(chain_id, balance);
    }
    Ok(balances)
}

fn parse_spoke_entry(chain_key: &str, entry: &Value) -> Option<(ChainId, SpokeTargetBalance)> {
    let chain_id: ChainId = chain_key.trim().parse().ok()?;
    let object = entry.as_object()?;
    let target = parse_clamped(object.get("target")?)?;
    let threshold = parse_clamped(object.get("threshold")?)?;
    Some((chain_id, SpokeTargetBalance { target, threshold }))
}

/// Unsigned decode with negative values clamped to zero; anything else
/// non-numeric is a decode failure.
fn parse_clamped(value: &Value) -> Option<U256> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Some(magnitude) = s.strip_prefix('-') {
                return U256::from_dec_str(magnitude).ok().map(|_| U256::zero());
            }
            U256::from_dec_str(s).ok()
        }
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Some(U256::from(v))
            } else if n.as_i64().is_some() {
                Some(U256::zero())
            } else {
                None
            }
        }
        _ => None,
    }
}
