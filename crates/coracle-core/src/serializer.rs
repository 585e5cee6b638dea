//! Deep-copy seam between the runtime and application payloads
//!
//! Results and exceptions handed back through the response path are
//! deep-copied so callers never alias buffers still owned by an invoker.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use bytes::Bytes;
use std::sync::Arc;

/// Payload deep-copy seam
pub trait Serializer: Send + Sync {
    /// Produce an independent copy of `payload`
    ///
    /// Fails when the payload does not survive the serializer's encoding.
    fn deep_copy(&self, payload: &Bytes) -> Result<Bytes>;

    fn name(&self) -> &'static str;
}

/// Standard serializer: JSON round-trip validation
///
/// Copying re-encodes the payload, so malformed payloads are caught at the
/// copy site rather than on the remote side.
#[derive(Debug, Default)]
pub struct StandardSerializer;

impl Serializer for StandardSerializer {
    fn deep_copy(&self, payload: &Bytes) -> Result<Bytes> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| ClientError::serialization_failed(e.to_string()))?;
        let encoded = serde_json::to_vec(&value)
            .map_err(|e| ClientError::serialization_failed(e.to_string()))?;
        Ok(Bytes::from(encoded))
    }

    fn name(&self) -> &'static str {
        "standard"
    }
}

/// Raw serializer: byte-level copy with no validation
#[derive(Debug, Default)]
pub struct RawSerializer;

impl Serializer for RawSerializer {
    fn deep_copy(&self, payload: &Bytes) -> Result<Bytes> {
        // Bytes payloads are immutable, so an owned handle is a deep copy.
        Ok(Bytes::copy_from_slice(payload))
    }

    fn name(&self) -> &'static str {
        "raw"
    }
}

/// Select the serializer flavor the configuration asks for
pub fn serializer_for(config: &ClientConfig) -> Arc<dyn Serializer> {
    if config.use_standard_serializer {
        Arc::new(StandardSerializer)
    } else {
        Arc::new(RawSerializer)
    }
}
