//! TCP server for answering server-list pings.
//!
//! Accepts connections, feeds received bytes through the per-connection
//! state machine and writes at most one reply before closing.

use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::{Action, Connection, Outcome};
use crate::protocol::{Handshake, NextState, PING_RESPONSE};
use crate::status::Responder;

/// Read buffer size
const BUFFER_SIZE: usize = 1024;

/// Deadlines applied to each connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionTimeouts {
    /// Wait for a complete handshake.
    pub handshake: Duration,
    /// Build and write the reply, including any reflector query.
    pub reply: Duration,
    /// Drain trailing client bytes after the reply before closing.
    pub linger: Duration,
}

impl ConnectionTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            handshake: config.handshake_timeout,
            reply: config.handshake_timeout + config.reflector_timeout,
            linger: config.handshake_timeout,
        }
    }
}

/// Server instance
pub struct Server {
    config: Config,
    responder: Arc<Responder>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let responder = Arc::new(Responder::from_config(&config));
        Self::with_responder(config, responder)
    }

    /// Create a server around an existing responder
    pub fn with_responder(config: Config, responder: Arc<Responder>) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));
        Server {
            config,
            responder,
            connection_limit,
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind the configured host, port and backlog.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        let addr = tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("cannot resolve listen host '{}'", self.config.host),
                )
            })?;

        let listener = create_listener(addr, self.config.backlog)?;
        info!(address = %listener.local_addr()?, backlog = self.config.backlog, "Server listening");
        Ok(listener)
    }

    /// Accept connections from `listener` forever.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, peer)) => {
                    let responder = Arc::clone(&self.responder);
                    let timeouts = ConnectionTimeouts::from_config(&self.config);

                    tokio::spawn(async move {
                        handle_connection(stream, peer, responder, timeouts).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Create a listening socket with an explicit backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    TcpListener::from_std(socket.into())
}

/// Handle a single client connection and report how it ended.
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    responder: Arc<Responder>,
    timeouts: ConnectionTimeouts,
) -> Outcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(%peer, "Connected");
    let mut conn = Connection::new();

    let received =
        tokio::time::timeout(timeouts.handshake, read_handshake(&mut stream, &mut conn)).await;

    match received {
        Err(_) => conn.on_timeout(),
        Ok(Err(e)) => conn.on_io_error(&e),
        Ok(Ok(None)) => {}
        Ok(Ok(Some(handshake))) => {
            info!(
                %peer,
                protocol_version = handshake.protocol_version,
                hostname = %handshake.hostname,
                port = handshake.port,
                next_state = ?handshake.next_state,
                "Received handshake"
            );
            let replied =
                tokio::time::timeout(timeouts.reply, respond(&mut stream, &handshake, &responder))
                    .await;
            match replied {
                Err(_) => conn.on_timeout(),
                Ok(Err(e)) => conn.on_io_error(&e),
                Ok(Ok(())) => linger(&mut stream, timeouts.linger).await,
            }
        }
    }

    let outcome = conn
        .close()
        .unwrap_or(Outcome::DisconnectedBeforeResponse);
    if let Outcome::Errored(_) = outcome {
        warn!(%peer, "{outcome}");
    } else {
        info!(%peer, "{outcome}");
    }
    outcome
}

/// Read until the state machine yields a handshake or gives up.
async fn read_handshake<S>(stream: &mut S, conn: &mut Connection) -> io::Result<Option<Handshake>>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        chunk.clear();
        if stream.read_buf(&mut chunk).await? == 0 {
            // Connection closed
            return Ok(None);
        }

        match conn.on_data(&chunk) {
            Action::Wait => continue,
            Action::Respond(handshake) => return Ok(Some(handshake)),
            Action::Close | Action::Ignore => return Ok(None),
        }
    }
}

/// Write the single reply for `handshake` and shut down the write side.
async fn respond<S>(stream: &mut S, handshake: &Handshake, responder: &Responder) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    match handshake.next_state {
        NextState::Login => {
            stream.write_all(&responder.kick_packet()).await?;
        }
        NextState::Status => {
            let status = responder.status_packet().await;
            stream.write_all(&status).await?;
            stream.write_all(&PING_RESPONSE).await?;
        }
    }
    stream.flush().await?;
    stream.shutdown().await
}

/// Discard whatever the client still sends until it closes its side.
///
/// Clients follow the handshake with a status request and a ping. Closing
/// with those bytes unread makes the kernel reset the connection and drop
/// reply bytes still in flight.
async fn linger<S>(stream: &mut S, limit: Duration)
where
    S: AsyncRead + Unpin,
{
    let mut scratch = [0u8; BUFFER_SIZE];
    let drained = tokio::time::timeout(limit, async {
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;

    if drained.is_err() {
        debug!("Client did not close after reply");
    }
}
