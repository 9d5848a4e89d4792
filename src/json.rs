//! JSON encoding with explicit per-type overrides.
//!
//! Most values go straight through serde. A domain type that needs a
//! different wire shape than its `Serialize` impl (the stored [`Comment`]
//! keeps private fields and raw markup; the API shape must not) gets an
//! encoder registered on a [`JsonEncoder`] value. The encoder is composed
//! where the application context is built and passed around; nothing global
//! is patched.
//!
//! [`Comment`]: crate::store::Comment

use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

type EncodeFn = Box<dyn Fn(&dyn Any) -> Value + Send + Sync>;

/// serde_json plus registered per-type encoders.
#[derive(Default)]
pub struct JsonEncoder {
    encoders: HashMap<TypeId, EncodeFn>,
}

impl JsonEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `encode` for every `T` this encoder meets, at the top level or
    /// as an element of a slice passed to [`values`](Self::values).
    #[must_use]
    pub fn register<T, F>(mut self, encode: F) -> Self
    where
        T: Any,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.encoders.insert(
            TypeId::of::<T>(),
            Box::new(move |any| any.downcast_ref::<T>().map_or(Value::Null, |v| encode(v))),
        );
        self
    }

    pub fn value<T: Serialize + Any>(&self, value: &T) -> Result<Value, serde_json::Error> {
        match self.encoders.get(&TypeId::of::<T>()) {
            Some(encode) => Ok(encode(value)),
            None => serde_json::to_value(value),
        }
    }

    pub fn values<T: Serialize + Any>(&self, items: &[T]) -> Result<Value, serde_json::Error> {
        items.iter().map(|item| self.value(item)).collect::<Result<_, _>>().map(Value::Array)
    }

    /// `None` encodes as `null`.
    pub fn optional<T: Serialize + Any>(&self, value: Option<&T>) -> Result<Value, serde_json::Error> {
        value.map_or(Ok(Value::Null), |v| self.value(v))
    }

    /// UTF-8 bytes of [`value`](Self::value).
    pub fn to_vec<T: Serialize + Any>(&self, value: &T) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.value(value)?)
    }
}
