//! JSON codec for cached values.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    Ok(serde_json::to_string(value)?)
}

/// Decode `raw` as `T`. A payload written for another type is an error, which
/// the store reports as a miss.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CacheError> {
    Ok(serde_json::from_str(raw)?)
}
