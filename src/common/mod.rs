//! Common utilities and types shared across etcdmgr

pub mod config;
pub mod error;
pub mod paths;
pub mod utils;

pub use config::ControllerConfig;
pub use error::{Error, Result};
pub use paths::StorePaths;
pub use utils::{decode_segment, duration_millis, encode_segment, parse_duration, peer_url};
