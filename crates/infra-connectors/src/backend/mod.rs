// Backend registry and shared argument parsing

pub mod git;
pub mod http;

pub use git::GitBackend;
pub use http::HttpBackend;

use quarry_core::domain::{BackendArgs, BackendType};
use quarry_core::port::{Backend, BackendError, BackendFactory};
use std::collections::BTreeMap;

/// Constructor registered for one backend type
pub type BackendConstructor =
    Box<dyn Fn(&BackendArgs) -> Result<Box<dyn Backend>, BackendError> + Send + Sync>;

/// Maps backend type to constructor
pub struct BackendRegistry {
    constructors: BTreeMap<BackendType, BackendConstructor>,
}

impl BackendRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with the bundled `git` and `http` backends
    pub fn with_defaults(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(
            BackendType::new(git::BACKEND_TYPE),
            Box::new(|args| Ok(Box::new(GitBackend::from_args(args)?) as Box<dyn Backend>)),
        );
        registry.register(
            BackendType::new(http::BACKEND_TYPE),
            Box::new(move |args| {
                Ok(Box::new(HttpBackend::from_args(client.clone(), args)?) as Box<dyn Backend>)
            }),
        );
        registry
    }

    pub fn register(&mut self, backend: BackendType, constructor: BackendConstructor) {
        self.constructors.insert(backend, constructor);
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFactory for BackendRegistry {
    fn create(
        &self,
        backend: &BackendType,
        args: &BackendArgs,
    ) -> Result<Box<dyn Backend>, BackendError> {
        let constructor = self
            .constructors
            .get(backend)
            .ok_or_else(|| BackendError::Unsupported(backend.to_string()))?;
        constructor(args)
    }

    fn supports(&self, backend: &BackendType) -> bool {
        self.constructors.contains_key(backend)
    }

    fn backend_types(&self) -> Vec<BackendType> {
        self.constructors.keys().cloned().collect()
    }
}

fn required_str<'a>(args: &'a BackendArgs, key: &str) -> Result<&'a str, BackendError> {
    match args.get(key) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(BackendError::Permanent(format!(
            "argument '{}' must be a non-empty string",
            key
        ))),
        None => Err(BackendError::Permanent(format!(
            "missing required argument '{}'",
            key
        ))),
    }
}

fn optional_str<'a>(args: &'a BackendArgs, key: &str) -> Result<Option<&'a str>, BackendError> {
    match args.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(BackendError::Permanent(format!(
            "argument '{}' must be a string",
            key
        ))),
    }
}

/// Positive integer argument; numeric strings are accepted too
fn positive_usize(args: &BackendArgs, key: &str, default: usize) -> Result<usize, BackendError> {
    let value = match args.get(key) {
        None | Some(serde_json::Value::Null) => return Ok(default),
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };
    match value {
        Some(n) if n > 0 => Ok(n as usize),
        _ => Err(BackendError::Permanent(format!(
            "argument '{}' must be a positive integer",
            key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> BackendArgs {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_defaults_register_git_and_http() {
        let registry = BackendRegistry::with_defaults(reqwest::Client::new());
        assert_eq!(
            registry.backend_types(),
            vec![BackendType::new("git"), BackendType::new("http")]
        );
        assert!(registry.supports(&BackendType::new("git")));
        assert!(!registry.supports(&BackendType::new("svn")));
    }

    #[test]
    fn test_unknown_backend_is_unsupported() {
        let registry = BackendRegistry::with_defaults(reqwest::Client::new());
        let err = registry
            .create(&BackendType::new("svn"), &BackendArgs::new())
            .err()
            .unwrap();
        assert_eq!(err, BackendError::Unsupported("svn".to_string()));
    }

    #[test]
    fn test_missing_required_argument_is_permanent() {
        let registry = BackendRegistry::with_defaults(reqwest::Client::new());
        let err = registry
            .create(&BackendType::new("http"), &BackendArgs::new())
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Permanent(msg) if msg.contains("'url'")));
    }

    #[test]
    fn test_positive_usize_parsing() {
        assert_eq!(positive_usize(&args(json!({})), "n", 7).unwrap(), 7);
        assert_eq!(positive_usize(&args(json!({"n": 3})), "n", 7).unwrap(), 3);
        assert_eq!(positive_usize(&args(json!({"n": "12"})), "n", 7).unwrap(), 12);
        assert!(positive_usize(&args(json!({"n": 0})), "n", 7).is_err());
        assert!(positive_usize(&args(json!({"n": "many"})), "n", 7).is_err());
    }
}
