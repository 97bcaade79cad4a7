// Jackson Coxson

//! Session lifecycle events and the sinks that record them.

use std::{fmt::Display, net::SocketAddr};

use kanal::{unbounded_async, AsyncReceiver, AsyncSender};
use log::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Listening {
        addr: SocketAddr,
    },
    Accepted {
        description: String,
    },
    AcceptFailed {
        listener: SocketAddr,
        cause: String,
    },
    Connected {
        inbound: String,
        outbound: String,
    },
    DialFailed {
        description: String,
        cause: String,
    },
    /// One relay direction is done and has released both of its ends.
    Closed {
        description: String,
        bytes: u64,
        cause: Option<String>,
    },
}

/// Where the proxy reports what it is doing.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Writes every event as a single line through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        match event {
            Event::Listening { addr } => info!("listening on {addr}"),
            Event::Accepted { description } => info!("accepted {description}"),
            Event::AcceptFailed { listener, cause } => {
                warn!("accept failed on {listener}: {cause}")
            }
            Event::Connected { inbound, outbound } => {
                info!("connected {inbound} [{outbound}]")
            }
            Event::DialFailed { description, cause } => {
                warn!("remote dial failed for {description}: {cause}")
            }
            Event::Closed {
                description,
                bytes,
                cause: None,
            } => info!("closed {description} ({bytes} bytes)"),
            Event::Closed {
                description,
                bytes,
                cause: Some(cause),
            } => info!("closed {description} ({bytes} bytes): {cause}"),
        }
    }
}

/// Forwards events over an unbounded channel, for anything that wants to
/// observe the proxy from the outside.
#[derive(Clone)]
pub struct ChannelSink {
    tx: AsyncSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, AsyncReceiver<Event>) {
        let (tx, rx) = unbounded_async();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        // Unbounded, so this only fails once the receiver is gone.
        let _ = self.tx.try_send(event);
    }
}

/// `peer -> local`
pub fn describe(from: impl Display, to: impl Display) -> String {
    format!("{from} -> {to}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_format() {
        let a: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        let b: SocketAddr = "[::1]:80".parse().unwrap();
        assert_eq!(describe(a, b), "10.1.2.3:5555 -> [::1]:80");
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, rx) = ChannelSink::new();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        sink.emit(Event::Listening { addr });
        sink.emit(Event::Accepted {
            description: "x -> y".into(),
        });
        assert_eq!(rx.recv().await.unwrap(), Event::Listening { addr });
        assert!(matches!(rx.recv().await.unwrap(), Event::Accepted { .. }));
    }

    #[test]
    fn channel_sink_outlives_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(Event::Accepted {
            description: "x -> y".into(),
        });
    }
}
