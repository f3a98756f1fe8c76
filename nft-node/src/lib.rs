#![doc(issue_tracker_base_url = "https://github.com/nft-rs/nft/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! In-band telemetry processing for a packet pipeline.
//!
//! - [`Classifier`] inserts a telemetry block into packets of configured flows.
//! - [`Forwarder`] updates the block at every gate it is attached to and exports postcards
//!   through a bounded [`PostcardRing`].
//! - [`Node`] runs both on a Tokio task, serializing configuration commands with the data path.

use thiserror::Error;

mod classifier;
pub use classifier::*;

mod forwarder;
pub use forwarder::*;

mod gate;
pub use gate::*;

mod node;
pub use node::*;

mod packet;
pub use packet::*;

pub mod timer;

/// Errors returned by configuration calls. None of these have data-path effects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Gate {0} does not exist")]
    NotFound(GateId),
    #[error("Gate {0} already exists")]
    AlreadyExists(GateId),
}

impl ConfigError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
