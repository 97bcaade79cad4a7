// Jackson Coxson

use std::{
    future::{poll_fn, Future},
    io,
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use log::{error, info};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
};

use crate::{
    config::ProxyConfig,
    error::ProxyError,
    events::{describe, Event, EventSink},
    relay::{relay, Teardown},
};

pub struct Proxy {
    config: ProxyConfig,
    events: Arc<dyn EventSink>,
}

/// Handle on a started proxy. Dropping it aborts the accept loops; sessions
/// already in flight run to completion.
pub struct Running {
    local_addrs: Vec<SocketAddr>,
    tasks: JoinSet<()>,
}

/// Everything a session task needs, shared by all sessions of all listeners.
struct Shared {
    remote: String,
    dial_timeout: Duration,
    limit: Option<Arc<Semaphore>>,
    events: Arc<dyn EventSink>,
}

impl Proxy {
    pub fn new(config: ProxyConfig, events: Arc<dyn EventSink>) -> Self {
        Self { config, events }
    }

    /// Binds every listen address, then starts one accept loop per listener.
    ///
    /// Nothing is spawned unless all binds succeed.
    pub async fn start(self) -> Result<Running, ProxyError> {
        let mut listeners = Vec::with_capacity(self.config.listen.len());
        for addr in &self.config.listen {
            let socket = TcpListener::bind(addr)
                .await
                .map_err(|source| ProxyError::Bind {
                    addr: addr.clone(),
                    source,
                })?;
            let local = socket.local_addr()?;
            listeners.push((socket, local));
        }

        let shared = Arc::new(Shared {
            remote: self.config.remote.clone(),
            dial_timeout: self.config.dial_timeout,
            limit: self
                .config
                .max_sessions
                .map(|max| Arc::new(Semaphore::new(max))),
            events: self.events.clone(),
        });

        let mut local_addrs = Vec::with_capacity(listeners.len());
        let mut tasks = JoinSet::new();
        for (socket, addr) in listeners {
            self.events.emit(Event::Listening { addr });
            local_addrs.push(addr);
            tasks.spawn(accept_loop(socket, addr, shared.clone()));
        }

        Ok(Running { local_addrs, tasks })
    }
}

impl Running {
    /// Bound addresses, in the order they were configured.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Waits on the accept loops. They never finish on their own, so this only
    /// returns if every one of them has crashed.
    pub async fn wait(mut self) {
        info!("Proxying on {} listener(s)", self.local_addrs.len());
        while let Some(res) = self.tasks.join_next().await {
            error!("Accept loop crashed: {:?}", res);
        }
    }
}

/// Pause after a failed accept. Errors like EMFILE persist until something
/// else lets go of a descriptor.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A source of inbound connections.
trait Incoming: Send + Sync + 'static {
    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>>;
}

impl Incoming for TcpListener {
    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        TcpListener::poll_accept(self, cx)
    }
}

async fn accept_loop<I: Incoming>(socket: I, addr: SocketAddr, shared: Arc<Shared>) {
    loop {
        match poll_fn(|cx| socket.poll_accept(cx)).await {
            Ok((stream, _)) => {
                tokio::spawn(handle_session(stream, addr, shared.clone()));
            }
            Err(e) => {
                shared.events.emit(Event::AcceptFailed {
                    listener: addr,
                    cause: e.to_string(),
                });
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn handle_session(inbound: TcpStream, listener: SocketAddr, shared: Arc<Shared>) {
    let connect = TcpStream::connect(shared.remote.clone());
    run_session(inbound, listener, shared, connect).await
}

/// Drives one session, dialing with `connect` under the configured timeout.
async fn run_session<F>(inbound: TcpStream, listener: SocketAddr, shared: Arc<Shared>, connect: F)
where
    F: Future<Output = io::Result<TcpStream>>,
{
    let inbound_desc = match (inbound.peer_addr(), inbound.local_addr()) {
        (Ok(peer), Ok(local)) => describe(peer, local),
        (Err(e), _) | (_, Err(e)) => {
            // Most likely reset by the client before we got here.
            shared.events.emit(Event::AcceptFailed {
                listener,
                cause: e.to_string(),
            });
            return;
        }
    };
    shared.events.emit(Event::Accepted {
        description: inbound_desc.clone(),
    });

    let permit = match acquire(&shared.limit).await {
        Ok(p) => p,
        Err(_) => return,
    };

    let outbound = match connect_within(connect, &shared.remote, shared.dial_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            shared.events.emit(Event::DialFailed {
                description: inbound_desc,
                cause: e.to_string(),
            });
            // Dropping `inbound` closes the client connection.
            return;
        }
    };
    let outbound_desc = match (outbound.local_addr(), outbound.peer_addr()) {
        (Ok(local), Ok(peer)) => describe(local, peer),
        _ => describe("?", &shared.remote),
    };
    shared.events.emit(Event::Connected {
        inbound: inbound_desc.clone(),
        outbound: outbound_desc.clone(),
    });

    let (inbound_rx, inbound_tx) = inbound.into_split();
    let (outbound_rx, outbound_tx) = outbound.into_split();
    let teardown = Teardown::new();

    // The reverse direction is not joined. The teardown bounds its lifetime to
    // that of the forward one, and the permit is only released once both have
    // let go of it.
    tokio::spawn({
        let teardown = teardown.clone();
        let shared = shared.clone();
        let permit = permit.clone();
        async move {
            let _ = relay(
                outbound_rx,
                inbound_tx,
                &outbound_desc,
                &teardown,
                &*shared.events,
            )
            .await;
            drop(permit);
        }
    });

    let _ = relay(
        inbound_rx,
        outbound_tx,
        &inbound_desc,
        &teardown,
        &*shared.events,
    )
    .await;
    drop(permit);
}

/// Waits for a session slot when admission control is on.
async fn acquire(
    limit: &Option<Arc<Semaphore>>,
) -> Result<Option<Arc<OwnedSemaphorePermit>>, tokio::sync::AcquireError> {
    match limit {
        Some(sem) => Ok(Some(Arc::new(sem.clone().acquire_owned().await?))),
        None => Ok(None),
    }
}

/// One attempt, no retries.
async fn connect_within<F, S>(connect: F, remote: &str, timeout: Duration) -> Result<S, ProxyError>
where
    F: Future<Output = io::Result<S>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ProxyError::Dial {
            addr: remote.to_string(),
            source,
        }),
        Err(_) => Err(ProxyError::DialTimeout {
            addr: remote.to_string(),
            timeout,
        }),
    }
}
