#![doc(issue_tracker_base_url = "https://github.com/nft-rs/nft/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Synthetic traffic for exercising telemetry pipelines.

pub mod frame;
pub use frame::{parse, random_addr, FrameBuilder, FrameInfo};

mod protocol;
pub use protocol::{Protocol, UnknownProtocol};
