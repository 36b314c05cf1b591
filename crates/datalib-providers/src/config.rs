use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required config key `{0}`")]
    Missing(&'static str),
    #[error("config key `{key}` has invalid value `{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("unknown provider `{0}`")]
    UnknownProvider(String),
    #[error("provider `{provider}` has no dataset `{dataset}`")]
    UnknownDataset { provider: String, dataset: String },
}

pub fn required(config: &BTreeMap<String, String>, key: &'static str) -> Result<String, ConfigError> {
    config
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(key))
}

/// Requests per minute. Blank means "use the default".
pub fn rate_limit(config: &BTreeMap<String, String>, key: &'static str) -> Result<Option<i64>, ConfigError> {
    match config.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a whole number of requests per minute",
        }),
    }
}

/// Parses `key=value` pairs as given on the command line.
pub fn parse_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<BTreeMap<String, String>, String> {
    pairs
        .into_iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| format!("`{pair}` is not key=value"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn blank_required_key_is_missing() {
        let cfg = config(&[("apiKey", "  ")]);
        assert_eq!(required(&cfg, "apiKey"), Err(ConfigError::Missing("apiKey")));
        assert_eq!(required(&config(&[("apiKey", "k")]), "apiKey"), Ok("k".to_string()));
    }

    #[test]
    fn rate_limit_is_optional_but_numeric() {
        assert_eq!(rate_limit(&config(&[]), "rateLimit"), Ok(None));
        assert_eq!(rate_limit(&config(&[("rateLimit", "300")]), "rateLimit"), Ok(Some(300)));
        assert!(matches!(
            rate_limit(&config(&[("rateLimit", "fast")]), "rateLimit"),
            Err(ConfigError::Invalid { key: "rateLimit", .. })
        ));
    }

    #[test]
    fn pairs_split_on_first_equals() {
        let parsed = parse_pairs(["apiKey=abc=def", "rateLimit=5"]).unwrap();
        assert_eq!(parsed.get("apiKey").map(String::as_str), Some("abc=def"));
        assert!(parse_pairs(["novalue"]).is_err());
    }
}
