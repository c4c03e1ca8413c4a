//! TCP link transport — hello handshake, link objects and the per-link monitor.
//!
//! A link is a plain TCP stream. The dialing side writes one JSON hello line,
//! after which both sides only exchange heartbeats. The monitor task owns the
//! socket and reports the link to the registry once it goes down.

pub mod dialer;
pub mod listener;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshlink_services::metrics::link_metric_name;
use meshlink_services::{LinkError, SharedLink, UsageRegistry, Xlink};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

pub const TCP_PROTOCOL: &str = "tcp";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// First line sent by the dialer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub link_id: String,
    pub router_id: String,
    pub router_version: String,
    #[serde(default)]
    pub dialer_binding: String,
    pub protocol: String,
    pub iteration: u32,
}

impl Hello {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

/// Shared by every link the transport creates.
#[derive(Clone)]
pub struct LinkContext {
    pub metrics: Arc<UsageRegistry>,
    /// Monitors push links here when they go down.
    pub closed_tx: mpsc::UnboundedSender<SharedLink>,
}

/// Identity of a link, fixed at handshake.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub id: String,
    pub key: String,
    pub dest_id: String,
    pub dest_version: String,
    pub protocol: String,
    pub dial_address: String,
    pub dialed: bool,
    pub iteration: u32,
}

pub struct TcpLink {
    info: LinkInfo,
    closed: AtomicBool,
    duplicates: AtomicU32,
    stop: watch::Sender<bool>,
}

impl TcpLink {
    /// Wrap an established stream and start its monitor.
    pub fn start(stream: TcpStream, info: LinkInfo, ctx: &LinkContext) -> SharedLink {
        let (stop, stop_rx) = watch::channel(false);
        let link = Arc::new(TcpLink {
            info,
            closed: AtomicBool::new(false),
            duplicates: AtomicU32::new(0),
            stop,
        });
        tokio::spawn(monitor(link.clone(), stream, stop_rx, ctx.clone()));
        link
    }
}

impl Xlink for TcpLink {
    fn id(&self) -> &str {
        &self.info.id
    }

    fn key(&self) -> &str {
        &self.info.key
    }

    fn close(&self) -> Result<(), LinkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(LinkError::AlreadyClosed(self.info.id.clone()));
        }
        self.stop.send_replace(true);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_dialed(&self) -> bool {
        self.info.dialed
    }

    fn iteration(&self) -> u32 {
        self.info.iteration
    }

    fn destination_id(&self) -> &str {
        &self.info.dest_id
    }

    fn dest_version(&self) -> &str {
        &self.info.dest_version
    }

    fn link_protocol(&self) -> &str {
        &self.info.protocol
    }

    fn dial_address(&self) -> &str {
        &self.info.dial_address
    }

    fn duplicates_rejected(&self) -> u32 {
        self.duplicates.fetch_add(1, Ordering::SeqCst) + 1
    }
}

// ── Monitor ───────────────────────────────────────────────────────────────────

async fn monitor(
    link: Arc<TcpLink>,
    stream: TcpStream,
    mut stop: watch::Receiver<bool>,
    ctx: LinkContext,
) {
    let rx_meter = ctx.metrics.meter(&link_metric_name(link.id(), "rx.bytesrate"));
    let tx_meter = ctx.metrics.meter(&link_metric_name(link.id(), "tx.bytesrate"));

    let (mut reader, mut writer) = stream.into_split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            r = reader.read(&mut buf) => match r {
                Ok(0) => {
                    tracing::info!(link_id = link.id(), dest = link.destination_id(), "link closed by peer");
                    break;
                }
                Ok(n) => rx_meter.mark(n as u64),
                Err(e) => {
                    tracing::warn!(link_id = link.id(), error = %e, "link read failed");
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if let Err(e) = writer.write_all(b"\n").await {
                    tracing::warn!(link_id = link.id(), error = %e, "link heartbeat failed");
                    break;
                }
                tx_meter.mark(1);
            }
            _ = stop.changed() => {
                tracing::debug!(link_id = link.id(), "link closed locally");
                break;
            }
        }
    }

    link.closed.store(true, Ordering::SeqCst);
    let _ = writer.shutdown().await;

    let link: SharedLink = link;
    let _ = ctx.closed_tx.send(link);
}
