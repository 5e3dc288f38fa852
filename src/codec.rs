//! Canonical Codec — deterministic serialization + hashing primitives.
//!
//! Every hash and every persisted byte in the decision core goes through
//! this module. The contract: identical inputs always canonicalize to
//! identical bytes, across runs and processes. Object keys are sorted
//! lexicographically, lists keep input order, integers are preserved
//! exactly, and floats are quantized to a pinned decimal precision before
//! encoding. Non-finite values fail closed with the offending field path:
//! silently coercing them would break replay equivalence.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Pinned quantization precision for floating-point fields (decimal
/// places, round-half-up). Changing this invalidates every previously
/// recorded hash, so it is deliberately not configurable.
pub const CANONICAL_SCALE: u32 = 8;

/// Convert any serializable value into a JSON tree for canonicalization.
pub fn to_canonical_value<T: Serialize>(value: &T) -> Result<Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::Encoding {
        path: "$".to_string(),
        reason: e.to_string(),
    })
}

/// Deterministic byte encoding of a JSON tree. Total over all finite
/// inputs; no side effects, no state.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CoreError> {
    let mut out = String::new();
    write_canonical(value, "$", &mut out)?;
    Ok(out.into_bytes())
}

/// SHA-256 over the canonical bytes, lowercase hex.
pub fn hash_canonical(value: &Value) -> Result<String, CoreError> {
    let bytes = canonicalize(value)?;
    Ok(hash_bytes(&bytes))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Quantize a float to `CANONICAL_SCALE` decimal places, round-half-up
/// (midpoint away from zero). Rejects NaN and ±Infinity.
pub fn quantize_f64(f: f64, path: &str) -> Result<Decimal, CoreError> {
    if !f.is_finite() {
        return Err(CoreError::Encoding {
            path: path.to_string(),
            reason: format!("non-finite number: {}", f),
        });
    }
    let d = Decimal::from_f64(f).ok_or_else(|| CoreError::Encoding {
        path: path.to_string(),
        reason: format!("number not representable at fixed precision: {}", f),
    })?;
    let q = d
        .round_dp_with_strategy(CANONICAL_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    Ok(q)
}

fn write_canonical(value: &Value, path: &str, out: &mut String) -> Result<(), CoreError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            // Integers pass through exactly; only true floats are quantized.
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                let f = n.as_f64().ok_or_else(|| CoreError::Encoding {
                    path: path.to_string(),
                    reason: format!("unsupported number: {}", n),
                })?;
                let q = quantize_f64(f, path)?;
                if q.is_zero() {
                    out.push('0');
                } else {
                    out.push_str(&q.to_string());
                }
            }
        }
        Value::String(s) => {
            // serde_json escaping is stable; reuse it rather than
            // hand-rolling a second escaper.
            out.push_str(&Value::String(s.clone()).to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let child = format!("{}[{}]", path, i);
                write_canonical(item, &child, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                let child = format!("{}.{}", path, key);
                // Sorted-key map access cannot miss.
                if let Some(v) = map.get(*key) {
                    write_canonical(v, &child, out)?;
                }
            }
            out.push('}');
        }
    }
    Ok(())
}
