// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interest-rate-model parsing.
//!
//! Rate models arrive embedded in token-config JSON strings that anyone
//! could have written on-chain, so parsing is strict: exactly the four
//! expected fields, unsigned values, and a kink point inside the open
//! interval `(0, 1e18)`. A model that fails any check poisons the whole
//! token-config update it came from.

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::fixed_point_one;

const RATE_MODEL_FIELDS: [&str; 4] = ["UBar", "R0", "R1", "R2"];

/// Piecewise-linear utilization curve, 1e18 fixed point. `u_bar` is the
/// kink utilization; `r0`/`r1`/`r2` are the intercept and the slopes
/// below and above the kink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateModel {
    pub u_bar: U256,
    pub r0: U256,
    pub r1: U256,
    pub r2: U256,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RateModelError {
    #[error("rate model is not a json object: {0}")]
    NotAnObject(String),
    #[error("rate model field {0} is missing")]
    MissingField(&'static str),
    #[error("rate model carries unexpected field {0}")]
    UnknownField(String),
    #[error("rate model field {field} is not an unsigned integer: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("rate model kink {0} is outside (0, 1e18)")]
    KinkOutOfRange(U256),
}

impl RateModel {
    /// Parses a rate model from its JSON object form. Rejects unknown
    /// fields so a typo'd key cannot silently change the curve.
    pub fn from_json(value: &Value) -> Result<Self, RateModelError> {
        let object = value
            .as_object()
            .ok_or_else(|| RateModelError::NotAnObject(value.to_string()))?;
        for key in object.keys() {
            if !RATE_MODEL_FIELDS.contains(&key.as_str()) {
                return Err(RateModelError::UnknownField(key.clone()));
            }
        }
        let u_bar = parse_field(object, "UBar")?;
        let r0 = parse_field(object, "R0")?;
        let r1 = parse_field(object, "R1")?;
        let r2 = parse_field(object, "R2")?;
        if u_bar.is_zero() || u_bar >= fixed_point_one() {
            return Err(RateModelError::KinkOutOfRange(u_bar));
        }
        Ok(Self { u_bar, r0, r1, r2 })
    }
}

fn parse_field(
    object: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<U256, RateModelError> {
    let value = object.get(field).ok_or(RateModelError::MissingField(field))?;
    parse_unsigned(value).ok_or_else(|| RateModelError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

/// Accepts the two encodings seen in the wild: a decimal string or a
/// bare JSON number. Anything negative or fractional is rejected.
fn parse_unsigned(value: &Value) -> Option<U256> {
    match value {
        Value::String(s) => U256::from_dec_str(s.trim()).ok(),
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    }
}
