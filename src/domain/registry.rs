use super::objective::{Objective, ObjectiveRequest, Protocol};
use super::types::ObjectiveId;
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps objective id prefixes to the protocol that builds and decodes them.
///
/// Adding a protocol is a matter of registering it; neither the engine nor the
/// stores switch on concrete objective types.
#[derive(Default, Clone)]
pub struct ProtocolRegistry {
    protocols: HashMap<&'static str, Arc<dyn Protocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the direct funding and defunding protocols.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::protocols::directfund::DirectFundProtocol));
        registry.register(Arc::new(crate::protocols::directdefund::DirectDefundProtocol));
        registry
    }

    pub fn register(&mut self, protocol: Arc<dyn Protocol>) {
        self.protocols.insert(protocol.prefix(), protocol);
    }

    pub fn lookup(&self, id: &ObjectiveId) -> Result<&Arc<dyn Protocol>> {
        let prefix = id.prefix()?;
        self.protocols
            .get(prefix)
            .ok_or_else(|| EngineError::UnknownProtocol(prefix.to_string()))
    }

    pub fn for_request(&self, request: &ObjectiveRequest) -> Result<&Arc<dyn Protocol>> {
        self.protocols
            .values()
            .find(|p| p.handles(request))
            .ok_or_else(|| EngineError::UnknownProtocol(format!("{request:?}")))
    }

    pub fn decode(&self, id: &ObjectiveId, data: &[u8]) -> Result<Box<dyn Objective>> {
        self.lookup(id)?.decode(data)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &&'static str> {
        self.protocols.keys()
    }
}
