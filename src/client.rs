use crate::config::{Config, Mode, TransferLimit};
use crate::interval_reporter::{banner, Reporter};
use crate::measurements::{StreamSummary, TransferStats};
use crate::protocol::{await_ack, send_termination, FILLER};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Traffic generator.
///
/// Opens `parallel` independent streams to the server, sends synthetic payload
/// on each until its limit is reached, and runs the termination handshake.
/// Every stream owns its own counters; results come back through the join.
///
/// # Examples
///
/// ```no_run
/// use goodput::{Client, Config, Reporter};
/// use goodput::interval_reporter::run_reporter_task;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("127.0.0.1".parse()?, 8088).with_byte_target(5_000_000);
/// let (reporter, receiver) = Reporter::new();
/// let printer = tokio::spawn(run_reporter_task(receiver, config.unit, false, std::io::stdout()));
///
/// let client = Client::new(config, reporter.clone())?;
/// let summaries = client.run().await?;
/// println!("{} streams finished", summaries.len());
///
/// reporter.complete();
/// printer.await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Arc<Config>,
    reporter: Reporter,
}

impl Client {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is not a valid client
    /// configuration.
    pub fn new(config: Config, reporter: Reporter) -> Result<Self> {
        if config.mode != Mode::Client {
            return Err(Error::Config(
                "client requires a client-mode configuration".to_string(),
            ));
        }
        config.validate()?;

        if config.interval.is_some() && config.byte_target.is_some() {
            warn!("Interval reports are not produced for byte-count transfers");
        }

        Ok(Self {
            config: Arc::new(config),
            reporter,
        })
    }

    /// Runs all streams and waits for every one of them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Test`] if any stream failed. Sibling streams still run
    /// to completion; their summaries have already been reported.
    pub async fn run(&self) -> Result<Vec<StreamSummary>> {
        let outcomes = self.run_streams().await;
        let total = outcomes.len();

        let mut summaries = Vec::with_capacity(total);
        let mut failed = 0;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!("Stream {} failed: {}", index, e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(Error::Test(format!("{} of {} streams failed", failed, total)));
        }
        Ok(summaries)
    }

    /// Runs all streams concurrently and returns each stream's outcome, in
    /// stream order.
    pub async fn run_streams(&self) -> Vec<Result<StreamSummary>> {
        let addr = match self.config.server_socket_addr() {
            Ok(addr) => addr,
            Err(e) => return vec![Err(e)],
        };

        self.reporter.notice(banner(&format!(
            "A goodput client connecting to server {}, port {}",
            addr.ip(),
            addr.port()
        )));

        let mut handles = Vec::with_capacity(self.config.parallel);
        for index in 0..self.config.parallel {
            let config = Arc::clone(&self.config);
            let reporter = self.reporter.clone();
            handles.push(tokio::spawn(async move {
                run_stream(index, addr, &config, &reporter).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Test(format!("stream task failed: {}", e))),
            });
        }
        outcomes
    }
}

async fn run_stream(
    index: usize,
    addr: SocketAddr,
    config: &Config,
    reporter: &Reporter,
) -> Result<StreamSummary> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::Connection(format!("failed to connect to {}: {}", addr, e)))?;
    info!("Stream {} connected to {}", index, addr);
    reporter.notice(format!(
        "Client connected with {} port {}",
        addr.ip(),
        addr.port()
    ));

    let summary = transfer(&mut stream, &addr.to_string(), config, reporter).await?;
    if let Err(e) = stream.shutdown().await {
        debug!("Error closing connection to {}: {}", addr, e);
    }
    Ok(summary)
}

/// Drives one outbound stream over an established connection.
///
/// Sends payload until the configured limit, runs the termination handshake,
/// and reports the aggregate summary once the acknowledgment has arrived.
///
/// # Errors
///
/// Any I/O error aborts the stream. If the acknowledgment never arrives the
/// stream fails with [`Error::Handshake`] and no summary is reported.
pub async fn transfer<S>(
    stream: &mut S,
    endpoint: &str,
    config: &Config,
    reporter: &Reporter,
) -> Result<StreamSummary>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = vec![FILLER; config.chunk_size];
    let mut stats = TransferStats::new(Instant::now());

    match config.limit() {
        TransferLimit::Bytes(target) => {
            while stats.bytes() < target {
                let n = (target - stats.bytes()).min(payload.len() as u64) as usize;
                stream.write_all(&payload[..n]).await?;
                stats.record(n as u64);
            }
        }
        TransferLimit::Duration(limit) => {
            while stats.elapsed(Instant::now()) < limit {
                stream.write_all(&payload).await?;
                stats.record(payload.len() as u64);

                if let Some(interval) = config.interval {
                    if let Some(record) = stats.roll_window(Instant::now(), interval) {
                        reporter.interval(endpoint, record);
                    }
                }
            }

            if let Some(interval) = config.interval {
                if let Some(record) = stats.flush_window(interval) {
                    reporter.interval(endpoint, record);
                }
                reporter.intervals_done(endpoint);
            }
        }
    }

    debug!(
        "{}: sent {} bytes, sending termination token",
        endpoint,
        stats.bytes()
    );
    send_termination(stream).await?;
    await_ack(stream).await?;

    let summary = StreamSummary::floored(
        Mode::Client,
        endpoint,
        stats.bytes(),
        stats.elapsed(Instant::now()),
    );
    info!(
        "{}: {} bytes in {:.2}s, {:.2} Mbps",
        endpoint, summary.bytes, summary.seconds, summary.mbps
    );
    reporter.summary(summary.clone());
    Ok(summary)
}
