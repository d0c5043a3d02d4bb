//! Response envelope returned to callers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::service::{Served, ServiceError};

pub const RET_OK: i32 = 0;
/// The request itself is wrong; retrying it unchanged will fail again.
pub const RET_CALLER_ERROR: i32 = -1;
/// The upstream failed in a way that may clear up (timeout, rate limit, breaker).
pub const RET_RETRYABLE: i32 = -2;

/// Where the payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceTag {
    Cache,
    Source,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub ret_code: i32,
    pub ret_msg: String,
    pub data: Option<Value>,
    pub cache_hit: bool,
    pub data_source: Option<DataSourceTag>,
    /// Seconds spent serving the request.
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl ResponseEnvelope {
    /// Success envelope around an already projected payload.
    pub fn ok(
        message: impl Into<String>,
        data: Value,
        cache_hit: bool,
        source: DataSourceTag,
        elapsed: Duration,
    ) -> Self {
        Self {
            ret_code: RET_OK,
            ret_msg: message.into(),
            data: Some(data),
            cache_hit,
            data_source: Some(source),
            execution_time: elapsed.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    pub fn from_served(message: impl Into<String>, served: Served<Value>) -> Self {
        Self::ok(
            message,
            served.data,
            served.cache_hit,
            served.source,
            served.elapsed,
        )
    }

    pub fn error(err: &ServiceError, elapsed: Duration) -> Self {
        Self {
            ret_code: err.ret_code(),
            ret_msg: err.to_string(),
            data: None,
            cache_hit: false,
            data_source: None,
            execution_time: elapsed.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ret_code == RET_OK
    }

    pub fn is_retryable(&self) -> bool {
        self.ret_code == RET_RETRYABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotecache_core::data::DataError;
    use serde_json::json;

    #[test]
    fn success_carries_the_payload_and_origin() {
        let env = ResponseEnvelope::ok(
            "bars served",
            json!([1, 2]),
            true,
            DataSourceTag::Cache,
            Duration::from_millis(1500),
        );
        assert!(env.is_ok());
        assert_eq!(env.data, Some(json!([1, 2])));
        assert_eq!(env.execution_time, 1.5);

        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["ret_code"], 0);
        assert_eq!(wire["data_source"], "cache");
        assert_eq!(wire["cache_hit"], true);
    }

    #[test]
    fn error_codes_split_caller_and_upstream_failures() {
        let caller = ResponseEnvelope::error(
            &ServiceError::InvalidRequest("symbol must not be empty".into()),
            Duration::ZERO,
        );
        assert_eq!(caller.ret_code, RET_CALLER_ERROR);
        assert!(caller.data.is_none());
        assert!(!caller.is_retryable());

        let timeout = ResponseEnvelope::error(
            &ServiceError::Source(DataError::Timeout(Duration::from_secs(10))),
            Duration::ZERO,
        );
        assert_eq!(timeout.ret_code, RET_RETRYABLE);
        assert!(timeout.ret_msg.contains("did not answer"));

        let missing = ResponseEnvelope::error(
            &ServiceError::Source(DataError::SymbolNotFound { symbol: "NOPE".into() }),
            Duration::ZERO,
        );
        assert_eq!(missing.ret_code, RET_CALLER_ERROR);
    }

    #[test]
    fn errors_serialize_data_as_null() {
        let env = ResponseEnvelope::error(&ServiceError::Codec("bad".into()), Duration::ZERO);
        let wire = serde_json::to_value(&env).unwrap();
        assert!(wire["data"].is_null());
        assert!(wire["data_source"].is_null());
    }
}
