// Jackson Coxson

//! A transparent TCP forwarder.
//!
//! Every connection accepted on one of the configured local addresses is
//! paired with a fresh connection to a single remote address, and bytes are
//! relayed in both directions until either side goes away.

pub mod config;
pub mod error;
pub mod events;
pub mod proxy;
pub mod relay;

pub use config::ProxyConfig;
pub use error::{ConfigError, ProxyError};
pub use events::{ChannelSink, Event, EventSink, LogSink};
pub use proxy::{Proxy, Running};
pub use relay::{relay, Teardown};
