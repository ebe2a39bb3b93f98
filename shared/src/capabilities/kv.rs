use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PersistenceError;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Device-local key/value storage (browser `localStorage`, app sandbox files).
pub struct KeyValue<Ev> {
    context: CapabilityContext<KvOperation, Ev>,
}

impl<Ev> Capability<Ev> for KeyValue<Ev> {
    type Operation = KvOperation;
    type MappedSelf<MappedEv> = KeyValue<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        KeyValue::new(self.context.map_event(f))
    }
}

impl<Ev> KeyValue<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<KvOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn get<F>(&self, key: &KvKey, make_event: F)
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        self.dispatch(
            KvOperation::Get {
                key: key.as_str().to_string(),
            },
            make_event,
        );
    }

    /// Stores `value`, failing locally when it exceeds [`MAX_VALUE_SIZE`].
    pub fn set<F>(&self, key: &KvKey, value: Vec<u8>, make_event: F)
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        if value.len() > MAX_VALUE_SIZE {
            let context = self.context.clone();
            let size = value.len();
            self.context.spawn(async move {
                context.update_app(make_event(Err(KvError::ValueTooLarge {
                    size,
                    max: MAX_VALUE_SIZE,
                })));
            });
            return;
        }
        self.dispatch(
            KvOperation::Set {
                key: key.as_str().to_string(),
                value,
            },
            make_event,
        );
    }

    pub fn delete<F>(&self, key: &KvKey, make_event: F)
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        self.dispatch(
            KvOperation::Delete {
                key: key.as_str().to_string(),
            },
            make_event,
        );
    }

    fn dispatch<F>(&self, operation: KvOperation, make_event: F)
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey(String);

impl KvKey {
    pub fn new(key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), KvError> {
        if key.trim().is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(KvError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {MAX_KEY_LENGTH} bytes"),
            });
        }

        if key.chars().any(char::is_control) {
            return Err(KvError::InvalidKey {
                key: key.escape_default().to_string(),
                reason: "key contains control characters".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvOperation {
    Get {
        key: String,
    },
    Set {
        key: String,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    Delete {
        key: String,
    },
}

impl Operation for KvOperation {
    type Output = KvResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvOutput {
    /// Stored bytes, `None` when the key is absent.
    Value(Option<Vec<u8>>),
    Written,
    Deleted,
}

impl KvOutput {
    #[must_use]
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            KvOutput::Value(value) => value,
            KvOutput::Written | KvOutput::Deleted => None,
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl KvError {
    /// Maps a failed read or write onto the persistence taxonomy.
    #[must_use]
    pub fn into_persistence(self, reading: bool) -> PersistenceError {
        if reading {
            PersistenceError::ReadFailure(self.to_string())
        } else {
            PersistenceError::WriteFailure(self.to_string())
        }
    }
}

pub type KvResult = Result<KvOutput, KvError>;
