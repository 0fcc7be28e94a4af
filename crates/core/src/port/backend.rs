// Backend Port
// A backend is a restartable, lazy, ordered, finite sequence of raw batches

use crate::domain::{BackendArgs, BackendType, Cursor, Item, RawBatch};
use async_trait::async_trait;
use thiserror::Error;

/// Backend errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network, timeout, rate limiting, server error: worth retrying
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Bad credentials, malformed identity, undecodable payload: never retried
    #[error("permanent backend error: {0}")]
    Permanent(String),

    #[error("unsupported backend: {0}")]
    Unsupported(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// One configured data source
#[async_trait]
pub trait Backend: Send + Sync {
    /// Next raw batch after `from` (`None` = start of stream); `None` when exhausted
    async fn fetch(&self, from: Option<&Cursor>) -> Result<Option<RawBatch>, BackendError>;

    /// Turn a raw payload (fresh or cached) into items
    fn decode(&self, payload: &[u8]) -> Result<Vec<Item>, BackendError>;
}

/// Registry of backend constructors, keyed by backend type
pub trait BackendFactory: Send + Sync {
    /// Instantiate a backend from an argument snapshot
    fn create(
        &self,
        backend: &BackendType,
        args: &BackendArgs,
    ) -> Result<Box<dyn Backend>, BackendError>;

    fn supports(&self, backend: &BackendType) -> bool;

    /// Registered backend types (one queue each)
    fn backend_types(&self) -> Vec<BackendType>;
}

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        batches: Vec<(Cursor, Vec<Item>)>,
        transient_failures: usize,
        permanent_after: Option<usize>,
        panic_after: Option<usize>,
        fetches: Vec<Option<Cursor>>,
    }

    /// Backend serving a fixed list of batches, with failure injection
    ///
    /// Clones share state, so a test keeps one handle and inspects it after the
    /// runner is done with its own copy.
    #[derive(Clone, Default)]
    pub struct ScriptedBackend {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedBackend {
        pub fn new(batches: Vec<(Cursor, Vec<Item>)>) -> Self {
            Self {
                script: Arc::new(Mutex::new(Script {
                    batches,
                    ..Script::default()
                })),
            }
        }

        /// `count` batches with cursors `c1..=cN`, each holding `items_per_batch` items
        pub fn with_batches(count: usize, items_per_batch: usize) -> Self {
            let batches = (1..=count)
                .map(|b| {
                    let items = (1..=items_per_batch)
                        .map(|i| {
                            Item::new(
                                format!("b{}-{}", b, i),
                                serde_json::json!({ "batch": b, "n": i }),
                            )
                        })
                        .collect();
                    (Cursor::new(format!("c{}", b)), items)
                })
                .collect();
            Self::new(batches)
        }

        /// The next `n` fetches fail with a transient error
        pub fn fail_transiently(&self, n: usize) {
            self.script.lock().unwrap().transient_failures = n;
        }

        /// Fetching batch number `index` (0-based) fails permanently
        pub fn fail_permanently_at(&self, index: Option<usize>) {
            self.script.lock().unwrap().permanent_after = index;
        }

        /// Fetching batch number `index` (0-based) panics
        pub fn panic_at(&self, index: Option<usize>) {
            self.script.lock().unwrap().panic_after = index;
        }

        /// Cursors passed to `fetch`, in call order
        pub fn fetches(&self) -> Vec<Option<Cursor>> {
            self.script.lock().unwrap().fetches.clone()
        }

        pub fn cursor_at(&self, index: usize) -> Cursor {
            self.script.lock().unwrap().batches[index].0.clone()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn fetch(&self, from: Option<&Cursor>) -> Result<Option<RawBatch>, BackendError> {
            let mut script = self.script.lock().unwrap();
            script.fetches.push(from.cloned());

            if script.transient_failures > 0 {
                script.transient_failures -= 1;
                return Err(BackendError::Transient("scripted timeout".to_string()));
            }

            let index = match from {
                None => 0,
                Some(cursor) => match script.batches.iter().position(|(c, _)| c == cursor) {
                    Some(position) => position + 1,
                    None => {
                        return Err(BackendError::Permanent(format!("unknown cursor {}", cursor)))
                    }
                },
            };

            if script.permanent_after == Some(index) {
                return Err(BackendError::Permanent("scripted refusal".to_string()));
            }
            if script.panic_after == Some(index) {
                drop(script);
                panic!("scripted backend panic at batch {}", index);
            }

            match script.batches.get(index) {
                Some((next, items)) => {
                    let payload = serde_json::to_vec(items)
                        .map_err(|e| BackendError::Permanent(e.to_string()))?;
                    Ok(Some(RawBatch::new(next.clone(), payload)))
                }
                None => Ok(None),
            }
        }

        fn decode(&self, payload: &[u8]) -> Result<Vec<Item>, BackendError> {
            serde_json::from_slice(payload).map_err(|e| BackendError::Permanent(e.to_string()))
        }
    }

    /// Factory handing out clones of one scripted backend under a single type
    pub struct ScriptedBackendFactory {
        backend_type: BackendType,
        backend: ScriptedBackend,
    }

    impl ScriptedBackendFactory {
        pub fn new(backend_type: &str, backend: ScriptedBackend) -> Self {
            Self {
                backend_type: BackendType::new(backend_type),
                backend,
            }
        }
    }

    impl BackendFactory for ScriptedBackendFactory {
        fn create(
            &self,
            backend: &BackendType,
            _args: &BackendArgs,
        ) -> Result<Box<dyn Backend>, BackendError> {
            if !self.supports(backend) {
                return Err(BackendError::Unsupported(backend.to_string()));
            }
            Ok(Box::new(self.backend.clone()))
        }

        fn supports(&self, backend: &BackendType) -> bool {
            *backend == self.backend_type
        }

        fn backend_types(&self) -> Vec<BackendType> {
            vec![self.backend_type.clone()]
        }
    }
}
