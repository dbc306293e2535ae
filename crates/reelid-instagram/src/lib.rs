//! Instagram adapters: the private REST API client and the realtime bridge.
//!
//! `InstagramClient` implements [`reelid_core::ports::AccountPort`] and
//! [`reelid_core::ports::DirectPort`]; `RealtimeBridge` implements
//! [`reelid_core::ports::RealtimePort`].

mod client;
mod realtime;
mod state;

pub use client::InstagramClient;
pub use realtime::{
    parse_bridge_line, BridgeConfig, RealtimeBridge, ENV_SEQ_ID, ENV_SESSION_FILE,
    ENV_SNAPSHOT_AT_MS,
};
pub use state::{AppConstants, ClientState, DeviceIdentity};
