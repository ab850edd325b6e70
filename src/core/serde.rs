//! Serde helpers for flexible deserialization.
//!
//! Ids written by older tools may be JSON numbers rather than strings, and LLM
//! clients often send numeric arguments as strings. These helpers accept both.

use serde::{Deserialize, Deserializer};
use std::fmt::Display;
use std::str::FromStr;

/// Deserialize an identifier that may be a string, a non-negative integer, or
/// null. Missing and null ids become the empty string.
pub fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNum {
        Num(u64),
        Str(String),
    }

    match Option::<StringOrNum>::deserialize(deserializer)? {
        Some(StringOrNum::Num(n)) => Ok(n.to_string()),
        Some(StringOrNum::Str(s)) => Ok(s),
        None => Ok(String::new()),
    }
}

/// Deserialize an optional value that can be number, string, or null.
pub fn option_number_or_string<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNum<T> {
        Num(T),
        Str(String),
    }

    match Option::<StringOrNum<T>>::deserialize(deserializer)? {
        Some(StringOrNum::Num(n)) => Ok(Some(n)),
        Some(StringOrNum::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(StringOrNum::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
