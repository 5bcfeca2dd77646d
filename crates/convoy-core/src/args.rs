//! Typed pipeline arguments
//!
//! `pipelines run <name>` forwards everything after the name as
//! `--key value` pairs. They are decoded into the pipeline's own argument
//! struct in one step; dashes become underscores and unknown keys, stray
//! tokens and repeated keys are rejected.

use crate::error::{CoreError, Result};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

pub fn decode_args<T: DeserializeOwned>(tokens: &[String]) -> Result<T> {
    let mut map = Map::new();
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        let Some(raw_key) = token.strip_prefix("--") else {
            return Err(CoreError::InvalidArgs(format!(
                "unexpected token '{}' (expected --key value)",
                token
            )));
        };
        let key = raw_key.replace('-', "_");
        if key.is_empty() {
            return Err(CoreError::InvalidArgs("empty option name".to_string()));
        }
        let value = iter
            .next()
            .ok_or_else(|| CoreError::InvalidArgs(format!("expected a value after '{}'", token)))?;
        if map.insert(key, Value::String(value.clone())).is_some() {
            return Err(CoreError::InvalidArgs(format!("'{}' given more than once", token)));
        }
    }
    serde_json::from_value(Value::Object(map)).map_err(|e| CoreError::InvalidArgs(e.to_string()))
}

/// `true`/`false` style option value.
pub fn de_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(de::Error::custom(format!("expected true or false, got '{}'", other))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployArgs {
    /// Overrides `DEPLOYMENT_NAME` and the timestamp default.
    pub deployment_name: Option<String>,
    pub os_version: Option<String>,
    pub instance_type: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    pub skip_dns: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestroyArgs {
    /// Leave descriptor, kubeconfig and state files in the infra directory.
    #[serde(default, deserialize_with = "de_flag")]
    pub keep_state: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsArgs {
    /// Role whose public address the record points at.
    pub role: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decode_deploy_args() {
        let args: DeployArgs = decode_args(&tokens(&[
            "--deployment-name",
            "demo",
            "--os-version",
            "22.04",
            "--skip-dns",
            "yes",
        ]))
        .unwrap();
        assert_eq!(args.deployment_name.as_deref(), Some("demo"));
        assert_eq!(args.os_version.as_deref(), Some("22.04"));
        assert!(args.instance_type.is_none());
        assert!(args.skip_dns);

        let empty: DeployArgs = decode_args(&[]).unwrap();
        assert_eq!(empty, DeployArgs::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = decode_args::<DeployArgs>(&tokens(&["--stack-name", "foo"])).unwrap_err();
        assert!(matches!(&err, CoreError::InvalidArgs(m) if m.contains("stack_name")));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert!(decode_args::<DeployArgs>(&tokens(&["stray"])).is_err());
        assert!(decode_args::<DeployArgs>(&tokens(&["--os-version"])).is_err());
        assert!(decode_args::<DeployArgs>(&tokens(&["--os-version", "a", "--os-version", "b"])).is_err());
        assert!(decode_args::<DestroyArgs>(&tokens(&["--keep-state", "maybe"])).is_err());
    }
}
