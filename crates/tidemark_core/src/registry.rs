//! Node registry.
//!
//! A registry assigns clock ids to urls. Any session can act as a registry;
//! by convention one node (the master) hands out identities for the rest.

use crate::error::{NodeError, NodeResult, Operation};
use crate::session::Session;
use tidemark_protocol::{ClockId, Node};
use tracing::info;

/// Role a session plays in a registration.
#[derive(Debug, Clone, Copy)]
pub enum Registration<'a> {
    /// Assign an id in this session's registry without binding it.
    Master,
    /// Assign an id and bind it as this session's own identity.
    ///
    /// With `master: None` the session is its own registry.
    Local {
        /// Registry that assigns the id.
        master: Option<&'a Session>,
    },
    /// Assign an id in `master` only; bind it later with
    /// [`Session::set_my_clock_id`].
    Deferred {
        /// Registry that assigns the id.
        master: &'a Session,
    },
}

impl Session {
    /// Registers `url` in the role given by `role`.
    ///
    /// Registering a url twice returns the id it already has and leaves its
    /// metadata unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Registration`] for an empty url or when binding
    /// would replace an identity this session already has.
    pub fn register(&self, role: Registration<'_>, url: &str, metadata: &[u8]) -> NodeResult<ClockId> {
        let clock_id = match role {
            Registration::Master => self.assign(url, metadata)?.clock_id,
            Registration::Local { master: None } => {
                let node = self.assign(url, metadata)?;
                self.set_my_clock_id(node.clock_id)?;
                node.clock_id
            }
            Registration::Local {
                master: Some(master),
            } => {
                let node = master.assign(url, metadata)?;
                self.store()
                    .import_node(&node)
                    .map_err(|e| e.fold(Operation::Register))?;
                self.set_my_clock_id(node.clock_id)?;
                node.clock_id
            }
            Registration::Deferred { master } => master.assign(url, metadata)?.clock_id,
        };
        info!(session = %self.name(), %clock_id, url, ?role, "registered");
        Ok(clock_id)
    }

    /// Registers `url` in this session's registry.
    pub fn register_master(&self, url: &str, metadata: &[u8]) -> NodeResult<ClockId> {
        self.register(Registration::Master, url, metadata)
    }

    /// Registers `url` through `master` (or locally) and binds the id here.
    pub fn register_local(&self, master: Option<&Session>, url: &str, metadata: &[u8]) -> NodeResult<ClockId> {
        self.register(Registration::Local { master }, url, metadata)
    }

    /// Registers `url` through `master` without binding the id here.
    pub fn register_local_to_master(&self, master: &Session, url: &str, metadata: &[u8]) -> NodeResult<ClockId> {
        self.register(Registration::Deferred { master }, url, metadata)
    }

    /// Binds this session's own identity.
    ///
    /// Binding the id already bound is a no-op.
    pub fn set_my_clock_id(&self, clock_id: ClockId) -> NodeResult<()> {
        self.store()
            .bind_clock_id(clock_id)
            .map_err(|e| e.fold(Operation::Register))
    }

    /// Returns this session's own identity.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Registration`] if no identity is bound yet.
    pub fn my_clock_id(&self) -> NodeResult<ClockId> {
        self.store()
            .my_clock_id()
            .map_err(|e| e.fold(Operation::Register))?
            .ok_or_else(|| NodeError::Registration(format!("{} is not registered", self.name())))
    }

    /// Looks up a node in this session's registry.
    pub fn node(&self, clock_id: ClockId) -> NodeResult<Node> {
        self.store()
            .node(clock_id)
            .map_err(|e| e.fold(Operation::Other))?
            .ok_or_else(|| NodeError::NotFound(format!("node {clock_id}")))
    }

    /// Lists the nodes in this session's registry.
    pub fn nodes(&self) -> NodeResult<Vec<Node>> {
        self.store().nodes().map_err(|e| e.fold(Operation::Other))
    }

    fn assign(&self, url: &str, metadata: &[u8]) -> NodeResult<Node> {
        self.store()
            .register_node(url, metadata)
            .map_err(|e| e.fold(Operation::Register))
    }
}
