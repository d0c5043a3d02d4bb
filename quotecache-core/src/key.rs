//! Cache keys: deterministic identification of logical requests.
//!
//! A key is `<endpoint>:<digest>`, where the digest is the first 128 bits of a
//! BLAKE3 hash over the canonical form of the parameter set, as 32 lowercase
//! hex characters. Canonicalization makes parameter order and list order of
//! unordered sets irrelevant, and folds `-0.0` into `0.0` and integral floats
//! into integers, so `2.0` and `2` address the same entry.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of the hex digest part of a key.
pub const DIGEST_HEX_LEN: usize = 32;

/// Largest magnitude at which every integer is exactly representable as f64.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("endpoint must not be empty")]
    EmptyEndpoint,

    #[error("endpoint '{0}' may only contain ASCII letters, digits, '_', '-', '.' and '/'")]
    InvalidEndpoint(String),

    #[error("parameter name must not be empty")]
    EmptyParamName,

    #[error("parameter '{0}' given more than once")]
    DuplicateParam(String),

    #[error("parameter '{name}' is not a finite number")]
    NonFiniteFloat { name: String },

    #[error("'{0}' is not a cache key")]
    Malformed(String),
}

/// A canonical cache key. Only constructed through [`CacheKeyBuilder`] or
/// parsed back with [`CacheKey::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse a key previously produced by the builder (e.g. read back from a store).
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let (endpoint, digest) = raw
            .split_once(':')
            .ok_or_else(|| KeyError::Malformed(raw.to_string()))?;
        validate_endpoint(endpoint).map_err(|_| KeyError::Malformed(raw.to_string()))?;
        let hex_ok = digest.len() == DIGEST_HEX_LEN
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !hex_ok {
            return Err(KeyError::Malformed(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn endpoint(&self) -> &str {
        self.0.split_once(':').map_or("", |(endpoint, _)| endpoint)
    }

    pub fn digest(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, digest)| digest)
    }

    /// First 64 bits of the digest, used for shard selection.
    pub fn shard_hash(&self) -> u64 {
        let digest = self.digest();
        u64::from_str_radix(&digest[..16.min(digest.len())], 16).unwrap_or(0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CacheKey::parse(&value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// A parameter value accepted by the key builder.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Unordered: sorted and de-duplicated during canonicalization.
    Set(Vec<ParamValue>),
    /// Ordered: kept as given.
    Seq(Vec<ParamValue>),
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        match i64::try_from(v) {
            Ok(v) => ParamValue::Int(v),
            Err(_) => ParamValue::Str(v.to_string()),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(v: NaiveDate) -> Self {
        ParamValue::Str(v.format("%Y-%m-%d").to_string())
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(v: NaiveDateTime) -> Self {
        ParamValue::Str(v.format("%Y-%m-%dT%H:%M:%S").to_string())
    }
}

/// Canonical value tree. Serialized with `serde_json`; the `BTreeMap` of
/// parameter names gives a deterministic field order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "v")]
enum Canonical {
    #[serde(rename = "s")]
    Str(String),
    #[serde(rename = "i")]
    Int(i64),
    #[serde(rename = "f")]
    Float(f64),
    #[serde(rename = "b")]
    Bool(bool),
    #[serde(rename = "set")]
    Set(Vec<Canonical>),
    #[serde(rename = "seq")]
    Seq(Vec<Canonical>),
}

fn canonicalize(name: &str, value: &ParamValue) -> Result<Canonical, KeyError> {
    Ok(match value {
        ParamValue::Str(s) => Canonical::Str(s.clone()),
        ParamValue::Int(i) => Canonical::Int(*i),
        ParamValue::Float(f) => {
            if !f.is_finite() {
                return Err(KeyError::NonFiniteFloat {
                    name: name.to_string(),
                });
            }
            if f.fract() == 0.0 && f.abs() < MAX_EXACT_INT {
                // Also folds -0.0 into 0.
                Canonical::Int(*f as i64)
            } else {
                Canonical::Float(*f)
            }
        }
        ParamValue::Bool(b) => Canonical::Bool(*b),
        ParamValue::Seq(items) => Canonical::Seq(
            items
                .iter()
                .map(|item| canonicalize(name, item))
                .collect::<Result<_, _>>()?,
        ),
        ParamValue::Set(items) => {
            let mut encoded: Vec<(String, Canonical)> = items
                .iter()
                .map(|item| {
                    let c = canonicalize(name, item)?;
                    Ok((encode(&c), c))
                })
                .collect::<Result<_, KeyError>>()?;
            encoded.sort_by(|a, b| a.0.cmp(&b.0));
            encoded.dedup_by(|a, b| a.0 == b.0);
            Canonical::Set(encoded.into_iter().map(|(_, c)| c).collect())
        }
    })
}

fn encode<T: Serialize>(value: &T) -> String {
    // Only strings, integers, finite floats and bools reach the serializer.
    serde_json::to_string(value).unwrap_or_default()
}

fn validate_endpoint(endpoint: &str) -> Result<(), KeyError> {
    if endpoint.is_empty() {
        return Err(KeyError::EmptyEndpoint);
    }
    let valid = endpoint
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'));
    if !valid {
        return Err(KeyError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(())
}

/// Builds a [`CacheKey`] from an endpoint and named parameters.
///
/// Errors are recorded as parameters are added and reported by [`build`](Self::build),
/// so a chain of `param` calls stays fluent.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    endpoint: String,
    params: BTreeMap<String, ParamValue>,
    error: Option<KeyError>,
}

impl CacheKeyBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            error: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let name = name.into();
        if self.error.is_some() {
            return self;
        }
        if name.is_empty() {
            self.error = Some(KeyError::EmptyParamName);
        } else if self.params.contains_key(&name) {
            self.error = Some(KeyError::DuplicateParam(name));
        } else {
            self.params.insert(name, value.into());
        }
        self
    }

    /// Add an unordered list parameter.
    pub fn set<I, V>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.param(name, ParamValue::Set(values))
    }

    /// Add an ordered list parameter.
    pub fn seq<I, V>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.param(name, ParamValue::Seq(values))
    }

    /// The canonical serialization that gets hashed.
    pub fn canonical(&self) -> Result<String, KeyError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        validate_endpoint(&self.endpoint)?;
        let canonical: BTreeMap<&str, Canonical> = self
            .params
            .iter()
            .map(|(name, value)| Ok((name.as_str(), canonicalize(name, value)?)))
            .collect::<Result<_, KeyError>>()?;
        Ok(encode(&canonical))
    }

    pub fn build(self) -> Result<CacheKey, KeyError> {
        let canonical = self.canonical()?;
        let hash = blake3::hash(canonical.as_bytes());
        let hex = hash.to_hex();
        Ok(CacheKey(format!(
            "{}:{}",
            self.endpoint,
            &hex.as_str()[..DIGEST_HEX_LEN]
        )))
    }
}
