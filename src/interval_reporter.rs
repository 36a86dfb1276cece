//! Serialized output sink.
//!
//! Stream tasks never print. They send [`ReportMessage`]s through a cloned
//! [`Reporter`] handle, and a single task drains the channel and writes each
//! message as a whole, so lines from concurrent streams never interleave.

use crate::config::Unit;
use crate::measurements::{IntervalRecord, StreamSummary};
use crate::Result;
use log::warn;
use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc;

const RULE_WIDTH: usize = 55;

/// Message sent to the reporter task
#[derive(Debug, Clone)]
pub enum ReportMessage {
    /// Free-form status line (suppressed in JSON mode)
    Notice(String),
    /// One closed sampling window of a stream
    Interval {
        endpoint: String,
        record: IntervalRecord,
    },
    /// A stream emitted its last interval line
    IntervalsDone { endpoint: String },
    /// Final statistics of a stream
    Summary(StreamSummary),
    /// Stop the reporter task
    Complete,
}

/// Handle for sending report messages
///
/// # Examples
///
/// ```
/// use goodput::interval_reporter::{ReportMessage, Reporter};
///
/// #[tokio::main]
/// async fn main() {
///     let (reporter, mut receiver) = Reporter::new();
///
///     reporter.clone().notice("hello");
///     reporter.complete();
///
///     assert!(matches!(receiver.recv().await, Some(ReportMessage::Notice(_))));
///     assert!(matches!(receiver.recv().await, Some(ReportMessage::Complete)));
/// }
/// ```
#[derive(Clone)]
pub struct Reporter {
    sender: mpsc::UnboundedSender<ReportMessage>,
}

impl Reporter {
    /// Creates a new reporter
    ///
    /// Returns a tuple of (reporter, receiver) where the receiver should be
    /// handed to [`run_reporter_task`].
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReportMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn notice(&self, line: impl Into<String>) {
        self.send(ReportMessage::Notice(line.into()));
    }

    pub fn interval(&self, endpoint: &str, record: IntervalRecord) {
        self.send(ReportMessage::Interval {
            endpoint: endpoint.to_string(),
            record,
        });
    }

    pub fn intervals_done(&self, endpoint: &str) {
        self.send(ReportMessage::IntervalsDone {
            endpoint: endpoint.to_string(),
        });
    }

    pub fn summary(&self, summary: StreamSummary) {
        self.send(ReportMessage::Summary(summary));
    }

    /// Signal that no more messages will follow
    pub fn complete(&self) {
        self.send(ReportMessage::Complete);
    }

    fn send(&self, msg: ReportMessage) {
        // A closed channel only means output is no longer wanted.
        let _ = self.sender.send(msg);
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum JsonLine<'a> {
    Interval {
        endpoint: &'a str,
        #[serde(flatten)]
        record: &'a IntervalRecord,
    },
    Summary(&'a StreamSummary),
}

fn encode(line: &JsonLine<'_>) -> Result<String> {
    Ok(serde_json::to_string(line)?)
}

/// Drains `receiver` into `out` until [`ReportMessage::Complete`] arrives or
/// every [`Reporter`] is dropped. Returns the writer.
pub async fn run_reporter_task<W: Write>(
    mut receiver: mpsc::UnboundedReceiver<ReportMessage>,
    unit: Unit,
    json: bool,
    mut out: W,
) -> W {
    let mut header_printed = false;

    while let Some(msg) = receiver.recv().await {
        let text = match msg {
            ReportMessage::Complete => break,
            ReportMessage::Notice(_) | ReportMessage::IntervalsDone { .. } if json => continue,
            ReportMessage::Notice(line) => line,
            ReportMessage::IntervalsDone { .. } => "-".repeat(RULE_WIDTH),
            ReportMessage::Interval { endpoint, record } if json => {
                let line = JsonLine::Interval {
                    endpoint: &endpoint,
                    record: &record,
                };
                match encode(&line) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to encode interval report: {}", e);
                        continue;
                    }
                }
            }
            ReportMessage::Interval { endpoint, record } => {
                let line = format_interval(&endpoint, &record, unit);
                if header_printed {
                    line
                } else {
                    header_printed = true;
                    format!("{}\n{}", header(), line)
                }
            }
            ReportMessage::Summary(summary) if json => {
                match encode(&JsonLine::Summary(&summary)) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to encode summary: {}", e);
                        continue;
                    }
                }
            }
            ReportMessage::Summary(summary) => {
                format!("{}\n{}", header(), format_summary(&summary, unit))
            }
        };

        if let Err(e) = writeln!(out, "{}", text).and_then(|_| out.flush()) {
            warn!("Failed to write report: {}", e);
        }
    }

    out
}

/// Column header shared by interval and summary lines.
pub fn header() -> String {
    format!("{:<21}  {:<11}  {:<11}  {}", "ID", "Interval", "Transfer", "Bandwidth")
}

/// Formats one interval line.
///
/// # Examples
///
/// ```
/// use goodput::config::Unit;
/// use goodput::interval_reporter::format_interval;
/// use goodput::measurements::IntervalRecord;
///
/// let record = IntervalRecord { index: 1, start: 2.0, end: 4.0, bytes: 3_000_000, mbps: 12.0 };
/// assert_eq!(
///     format_interval("10.0.0.1:8088", &record, Unit::MB),
///     "10.0.0.1:8088  2.0 - 4.0  3.00 MB  12.00 Mbps"
/// );
/// ```
pub fn format_interval(endpoint: &str, record: &IntervalRecord, unit: Unit) -> String {
    format!(
        "{}  {:.1} - {:.1}  {:.2} {}  {:.2} Mbps",
        endpoint,
        record.start,
        record.end,
        unit.convert(record.bytes),
        unit,
        record.mbps
    )
}

/// Formats the aggregate line of a finished stream.
pub fn format_summary(summary: &StreamSummary, unit: Unit) -> String {
    format!(
        "{}  0.0 - {:.1}  {:.2} {}  {:.2} Mbps",
        summary.endpoint,
        summary.seconds,
        unit.convert(summary.bytes),
        unit,
        summary.mbps
    )
}

/// Dashed banner around a status line.
pub fn banner(line: &str) -> String {
    let rule = "-".repeat(RULE_WIDTH.max(line.len()));
    format!("{}\n{}\n{}", rule, line, rule)
}
