use crate::config::{Config, Mode};
use crate::interval_reporter::{banner, Reporter};
use crate::measurements::StreamSummary;
use crate::protocol::{send_ack, TokenScanner};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// Traffic sink.
///
/// Accepts connections until the process is terminated and counts each
/// stream's payload in its own task. There is no limit on concurrent
/// connections and no shutdown signal.
///
/// # Examples
///
/// ```no_run
/// use goodput::{Config, Reporter, Server};
/// use goodput::interval_reporter::run_reporter_task;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::server(8088);
/// let (reporter, receiver) = Reporter::new();
/// tokio::spawn(run_reporter_task(receiver, config.unit, false, std::io::stdout()));
///
/// let server = Server::new(config, reporter)?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    reporter: Reporter,
}

impl Server {
    /// Creates a new server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is not a valid server
    /// configuration.
    pub fn new(config: Config, reporter: Reporter) -> Result<Self> {
        if config.mode != Mode::Server {
            return Err(Error::Config(
                "server requires a server-mode configuration".to_string(),
            ));
        }
        config.validate()?;
        Ok(Self { config, reporter })
    }

    /// Binds the configured address and serves forever.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the address cannot be bound.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = self.config.bind_socket_addr();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::Connection(format!("failed to bind {}: {}", bind_addr, e)))?;
        info!("TCP server listening on {}", bind_addr);

        self.serve(listener).await
    }

    /// Accepts connections on an already bound listener.
    ///
    /// Each connection is handled in its own task; a failing connection is
    /// logged and does not affect the loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        self.reporter.notice(banner(&format!(
            "A goodput server is listening on port {}",
            local_addr.port()
        )));

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let accepted = Instant::now();
                    info!("New connection from {}", peer);
                    self.reporter.notice(format!(
                        "A goodput client with {} is connected with {}",
                        peer, local_addr
                    ));

                    let reporter = self.reporter.clone();
                    let chunk_size = self.config.chunk_size;
                    tokio::spawn(async move {
                        let handled =
                            handle_connection(stream, peer, accepted, chunk_size, &reporter).await;
                        if let Err(e) = handled {
                            error!("Error handling client {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    accepted: Instant,
    chunk_size: usize,
    reporter: &Reporter,
) -> Result<StreamSummary> {
    let summary = receive(&mut stream, &peer.to_string(), accepted, chunk_size, reporter).await?;
    debug!("Closing connection from {}", peer);
    Ok(summary)
}

/// Consumes one inbound stream.
///
/// Reads until the termination token, acknowledges it, and reports the
/// payload bytes that preceded the token over the time since `accepted`. If
/// the peer closes without sending the token, no acknowledgment is sent and
/// whatever was counted is reported.
pub async fn receive<S>(
    stream: &mut S,
    endpoint: &str,
    accepted: Instant,
    chunk_size: usize,
    reporter: &Reporter,
) -> Result<StreamSummary>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut scanner = TokenScanner::new();

    let payload = loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            warn!(
                "{} closed the connection without a termination token",
                endpoint
            );
            break None;
        }
        if let Some(payload) = scanner.feed(&buf[..n]) {
            break Some(payload);
        }
    };

    let bytes = match payload {
        Some(bytes) => {
            send_ack(stream).await?;
            bytes
        }
        None => scanner.payload_bytes(),
    };

    let summary = StreamSummary::new(Mode::Server, endpoint, bytes, accepted.elapsed());
    info!(
        "{}: received {} bytes in {:.2}s, {:.2} Mbps",
        endpoint, summary.bytes, summary.seconds, summary.mbps
    );
    reporter.summary(summary.clone());
    Ok(summary)
}
