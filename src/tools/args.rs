//! Argument decoding and coarse validation shared by all tools

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Post-deserialization checks for a tool's argument struct
pub trait Validate {
    fn validate(&self, _operation: &str) -> Result<()> {
        Ok(())
    }
}

/// Decode a tool's argument mapping into its typed form.
///
/// A missing or `null` mapping is read as an empty object.
pub fn parse<T>(operation: &str, arguments: Value) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let arguments = match arguments {
        Value::Null => Value::Object(Map::new()),
        Value::Object(map) => Value::Object(map),
        other => {
            return Err(Error::invalid_arguments(
                operation,
                format!("arguments must be an object, got {}", json_type(&other)),
            ));
        }
    };
    let parsed: T = serde_json::from_value(arguments)
        .map_err(|e| Error::invalid_arguments(operation, e.to_string()))?;
    parsed.validate(operation)?;
    Ok(parsed)
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accepts a JSON integer or a string holding one
pub fn lenient_integer<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected an integer, got {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected an integer, got \"{s}\""))),
        Some(other) => Err(D::Error::custom(format!(
            "expected an integer, got {}",
            json_type(&other)
        ))),
    }
}

/// Accepts a JSON string or a scalar number/boolean rendered as one
pub fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string, got {}",
            json_type(&other)
        ))),
    }
}

/// Optional variant of [`lenient_string`]
pub fn lenient_opt_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string, got {}",
            json_type(&other)
        ))),
    }
}

/// Accepts a boolean or the strings "true"/"false"
pub fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(D::Error::custom(format!("expected a boolean, got \"{s}\""))),
        },
        Some(other) => Err(D::Error::custom(format!(
            "expected a boolean, got {}",
            json_type(&other)
        ))),
    }
}

/// FHIR resource type names: an uppercase letter followed by letters
pub fn check_resource_type(operation: &str, field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphabetic())
        && value.len() <= 64;
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_arguments(
            operation,
            format!("'{field}' must be a FHIR resource type such as Patient, got \"{value}\""),
        ))
    }
}

/// FHIR logical ids: 1-64 characters from `[A-Za-z0-9-.]`
pub fn check_logical_id(operation: &str, field: &str, value: &str) -> Result<()> {
    let valid = (1..=64).contains(&value.len())
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && value != "."
        && value != "..";
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_arguments(
            operation,
            format!("'{field}' must be a FHIR id (1-64 of A-Z a-z 0-9 - .), got \"{value}\""),
        ))
    }
}

pub fn check_not_blank(operation: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::invalid_arguments(operation, format!("'{field}' must not be empty")))
    } else {
        Ok(())
    }
}

/// Page-size bounds applied to every count-style argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl PageLimits {
    /// Clamp a requested size into `[1, max_page_size]`
    pub fn clamp(&self, requested: i64) -> u32 {
        let max = i64::from(self.max_page_size.max(1));
        requested.clamp(1, max) as u32
    }

    /// Clamp when present, otherwise fall back to the default page size
    pub fn clamp_or_default(&self, requested: Option<i64>) -> u32 {
        match requested {
            Some(requested) => self.clamp(requested),
            None => self.clamp(i64::from(self.default_page_size)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "lenient_string")]
        id: String,
        #[serde(default, deserialize_with = "lenient_integer")]
        count: Option<i64>,
        #[serde(default, deserialize_with = "lenient_bool")]
        all: Option<bool>,
    }

    impl Validate for Sample {}

    #[test]
    fn test_parse_coerces_scalar_types() {
        let sample: Sample = parse("sample", json!({"id": 42, "count": "15", "all": "true"})).unwrap();
        assert_eq!(sample.id, "42");
        assert_eq!(sample.count, Some(15));
        assert_eq!(sample.all, Some(true));
    }

    #[test]
    fn test_parse_reports_missing_required_field() {
        let err = parse::<Sample>("sample", json!({"count": 3})).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArguments);
        assert!(err.to_string().contains("id"));
    }

    #[rstest]
    #[case(json!({"id": "a", "count": "ten"}))]
    #[case(json!({"id": "a", "count": 2.5}))]
    #[case(json!({"id": {"nested": true}}))]
    #[case(json!({"id": "a", "all": 1}))]
    #[case(json!(["not", "an", "object"]))]
    fn test_parse_rejects_wrong_types(#[case] arguments: Value) {
        let err = parse::<Sample>("sample", arguments).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArguments);
    }

    #[rstest]
    #[case("Patient", true)]
    #[case("MedicationRequest", true)]
    #[case("patient", false)]
    #[case("Patient/123", false)]
    #[case("", false)]
    fn test_resource_type_check(#[case] value: &str, #[case] ok: bool) {
        assert_eq!(check_resource_type("op", "resource_type", value).is_ok(), ok);
    }

    #[rstest]
    #[case("123", true)]
    #[case("example-1.2", true)]
    #[case("..", false)]
    #[case("a/b", false)]
    #[case("a b", false)]
    #[case("", false)]
    fn test_logical_id_check(#[case] value: &str, #[case] ok: bool) {
        assert_eq!(check_logical_id("op", "resource_id", value).is_ok(), ok);
    }

    #[test]
    fn test_page_size_clamped_not_rejected() {
        let limits = PageLimits {
            default_page_size: 20,
            max_page_size: 100,
        };
        assert_eq!(limits.clamp(1000), 100);
        assert_eq!(limits.clamp(0), 1);
        assert_eq!(limits.clamp(-5), 1);
        assert_eq!(limits.clamp_or_default(None), 20);
        assert_eq!(limits.clamp_or_default(Some(50)), 50);
    }

    proptest! {
        #[test]
        fn prop_clamp_stays_in_range(requested in any::<i64>(), max in 1u32..10_000) {
            let limits = PageLimits { default_page_size: 1, max_page_size: max };
            let clamped = limits.clamp(requested);
            prop_assert!(clamped >= 1 && clamped <= max);
        }
    }
}
