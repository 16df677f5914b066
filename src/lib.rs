mod client;
mod climate;
mod config;
mod coordinator;
mod diff;
mod error;
mod logger;
mod normalize;
mod overlay;
mod protocol;
mod sign;
mod types;

pub use client::{CloudClient, CloudClientBuilder, Grant, DEFAULT_TIMEOUT};
pub use climate::{ClimateEntity, DEFAULT_FOLLOW_UP_DELAYS};
pub use config::{ClimateConfig, CloudConfig, EntryConfig};
pub use coordinator::{Coordinator, CoordinatorBuilder, Phase, DEFAULT_SCAN_INTERVAL};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use normalize::{decode_numeric, encode_numeric, normalize_spec, normalize_status};
pub use overlay::{PendingOverlay, DEFAULT_OVERLAY_TTL};
pub use protocol::{DEFAULT_TOKEN_INVALID_CODES, ListShape};
pub use sign::{sign, string_to_sign, SignInput};
pub use types::*;
