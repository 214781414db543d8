// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Capability Registry
//!
//! Intent labels are resolved to handlers through an explicit registry
//! rather than open-ended dispatch. Each capability may publish a JSON Schema
//! for its `args`; the schema is compiled once at registration and every
//! inbound request is validated against it before the handler runs.
//!
//! Request payload convention:
//!
//! ```json
//! { "intent": "schedule_meeting", "args": { "title": "sync", "at": "…" } }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::envelope::Envelope;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    #[error("Payload rejected by capability '{intent}': {message}")]
    Validation { intent: String, message: String },

    #[error("No capability registered for intent '{0}'")]
    UnknownCapability(String),

    #[error("Capability handler failed: {0}")]
    Handler(String),

    #[error("Invalid payload schema for '{intent}': {message}")]
    InvalidSchema { intent: String, message: String },
}

impl CapabilityError {
    pub fn kind(&self) -> &'static str {
        match self {
            CapabilityError::Validation { .. } => "validation",
            CapabilityError::UnknownCapability(_) => "unknown_capability",
            CapabilityError::Handler(_) => "handler",
            CapabilityError::InvalidSchema { .. } => "invalid_schema",
        }
    }

    /// Payload of the `error` envelope reporting this failure.
    pub fn to_payload(&self) -> Value {
        json!({ "kind": self.kind(), "message": self.to_string() })
    }

    /// True when the sender's request itself is at fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CapabilityError::Validation { .. } | CapabilityError::UnknownCapability(_)
        )
    }
}

/// Decoded request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub intent: String,
    #[serde(default)]
    pub args: Value,
}

impl CapabilityCall {
    pub fn new(intent: impl Into<String>, args: Value) -> Self {
        Self {
            intent: intent.into(),
            args,
        }
    }

    pub fn to_payload(&self) -> Value {
        json!({ "intent": self.intent, "args": self.args })
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, CapabilityError> {
        serde_json::from_value(envelope.payload.clone()).map_err(|e| CapabilityError::Validation {
            intent: envelope.intent().unwrap_or("<missing>").to_string(),
            message: format!("payload must be {{\"intent\", \"args\"}}: {}", e),
        })
    }
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Intent label served.
    fn intent(&self) -> &str;

    /// JSON Schema for `args`, if the capability constrains its input.
    fn schema(&self) -> Option<Value> {
        None
    }

    async fn handle(&self, args: Value, request: &Envelope) -> Result<Value, CapabilityError>;
}

/// Adapter turning an async closure into a [`CapabilityHandler`].
pub struct FnCapability<F, Fut> {
    intent: String,
    schema: Option<Value>,
    handler: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnCapability<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    pub fn new(intent: impl Into<String>, handler: F) -> Self {
        Self {
            intent: intent.into(),
            schema: None,
            handler,
            _marker: PhantomData,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[async_trait]
impl<F, Fut> CapabilityHandler for FnCapability<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    fn intent(&self) -> &str {
        &self.intent
    }

    fn schema(&self) -> Option<Value> {
        self.schema.clone()
    }

    async fn handle(&self, args: Value, _request: &Envelope) -> Result<Value, CapabilityError> {
        (self.handler)(args).await
    }
}

struct RegisteredCapability {
    handler: Arc<dyn CapabilityHandler>,
    validator: Option<Arc<jsonschema::Validator>>,
}

impl Clone for RegisteredCapability {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            validator: self.validator.clone(),
        }
    }
}

/// Intent label → handler mapping. Cheap to clone.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, RegisteredCapability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, compiling its schema. Re-registering an intent
    /// replaces the previous handler.
    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) -> Result<(), CapabilityError> {
        let intent = handler.intent().to_string();
        let validator = match handler.schema() {
            Some(schema) => Some(Arc::new(jsonschema::validator_for(&schema).map_err(|e| {
                CapabilityError::InvalidSchema {
                    intent: intent.clone(),
                    message: e.to_string(),
                }
            })?)),
            None => None,
        };
        self.entries.insert(intent, RegisteredCapability { handler, validator });
        Ok(())
    }

    pub fn with(mut self, handler: Arc<dyn CapabilityHandler>) -> Result<Self, CapabilityError> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn contains(&self, intent: &str) -> bool {
        self.entries.contains_key(intent)
    }

    pub fn intents(&self) -> Vec<String> {
        let mut intents: Vec<String> = self.entries.keys().cloned().collect();
        intents.sort();
        intents
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check `call` against the target capability's expected shape and return its handler.
    pub fn resolve(&self, call: &CapabilityCall) -> Result<Arc<dyn CapabilityHandler>, CapabilityError> {
        let entry = self
            .entries
            .get(&call.intent)
            .ok_or_else(|| CapabilityError::UnknownCapability(call.intent.clone()))?;

        if let Some(validator) = &entry.validator {
            let problems: Vec<String> = validator.iter_errors(&call.args).map(|e| e.to_string()).collect();
            if !problems.is_empty() {
                return Err(CapabilityError::Validation {
                    intent: call.intent.clone(),
                    message: problems.join("; "),
                });
            }
        }
        Ok(Arc::clone(&entry.handler))
    }

    /// Validate and run in the caller's task.
    pub async fn invoke(&self, call: CapabilityCall, request: &Envelope) -> Result<Value, CapabilityError> {
        let handler = self.resolve(&call)?;
        handler.handle(call.args, request).await
    }
}
