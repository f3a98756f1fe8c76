#![doc(issue_tracker_base_url = "https://github.com/nft-rs/nft/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use nft_common::{constants, unix_micros, Ipv4Prefix};
pub use nft_node::*;
pub use nft_wire::{postcard, telemetry, MetricType};
