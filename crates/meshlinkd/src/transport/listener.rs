//! Inbound TCP links.
//!
//! Accepts connections, reads the dialer's hello and presents the link to the
//! registry. A link the registry rejects as a duplicate stays open until the
//! registry's delayed close fires.

use std::time::Duration;

use anyhow::{Context, Result};
use meshlink_core::config::LinkListenerConfig;
use meshlink_services::{ApplyOutcome, CloseNotify, LinkRegistry, Xlink};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::{Hello, LinkContext, LinkInfo, TcpLink, TCP_PROTOCOL};

const HELLO_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HELLO_LEN: usize = 4096;

pub struct LinkListener {
    listener: TcpListener,
    config: LinkListenerConfig,
    registry: LinkRegistry,
    ctx: LinkContext,
    close: CloseNotify,
}

impl LinkListener {
    pub async fn bind(
        config: LinkListenerConfig,
        registry: LinkRegistry,
        ctx: LinkContext,
        close: CloseNotify,
    ) -> Result<Self> {
        if config.protocol != TCP_PROTOCOL {
            anyhow::bail!("unsupported listener protocol '{}'", config.protocol);
        }
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("failed to bind link listener on {}", config.bind))?;
        tracing::info!(
            addr = %listener.local_addr()?,
            groups = ?config.groups,
            binding = %config.binding,
            "link listener ready"
        );
        Ok(Self {
            listener,
            config,
            registry,
            ctx,
            close,
        })
    }

    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.close.closed() => {
                    tracing::info!(bind = %self.config.bind, "link listener shutting down");
                    return;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "link accept failed");
                            continue;
                        }
                    };
                    let registry = self.registry.clone();
                    let ctx = self.ctx.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = accept_link(stream, &config, &registry, &ctx).await {
                            tracing::warn!(peer = %peer, error = %e, "inbound link handshake failed");
                        }
                    });
                }
            }
        }
    }
}

async fn accept_link(
    stream: TcpStream,
    config: &LinkListenerConfig,
    registry: &LinkRegistry,
    ctx: &LinkContext,
) -> Result<()> {
    let local = stream.local_addr()?;
    let mut reader = BufReader::new(stream);

    let hello = tokio::time::timeout(HELLO_TIMEOUT, read_hello(&mut reader))
        .await
        .context("timed out waiting for hello")??;
    if hello.protocol != config.protocol {
        anyhow::bail!("hello protocol '{}' does not match listener", hello.protocol);
    }

    let key = registry.get_link_key(&hello.dialer_binding, &config.protocol, &hello.router_id, &config.binding);
    let info = LinkInfo {
        id: hello.link_id,
        key,
        dest_id: hello.router_id,
        dest_version: hello.router_version,
        protocol: config.protocol.clone(),
        dial_address: local.to_string(),
        dialed: false,
        iteration: hello.iteration,
    };
    let link = TcpLink::start(reader.into_inner(), info, ctx);

    match registry.link_accepted(link.clone()) {
        ApplyOutcome::Registered => {
            tracing::info!(link_id = link.id(), dest = link.destination_id(), "inbound link registered")
        }
        ApplyOutcome::AlreadyRegistered => {}
        ApplyOutcome::Rejected { survivor } => tracing::info!(
            link_id = link.id(),
            survivor_id = survivor.id(),
            "inbound link rejected as duplicate"
        ),
        ApplyOutcome::Closed => {
            tracing::debug!(link_id = link.id(), "inbound link closed before registration")
        }
    }
    Ok(())
}

/// Read one hello line. Never buffers more than `MAX_HELLO_LEN` bytes.
async fn read_hello<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Hello> {
    let mut line = String::new();
    let read = reader
        .take(MAX_HELLO_LEN as u64 + 1)
        .read_line(&mut line)
        .await?;
    if read == 0 {
        anyhow::bail!("connection closed before hello");
    }
    if line.len() > MAX_HELLO_LEN {
        anyhow::bail!("hello longer than {MAX_HELLO_LEN} bytes");
    }
    if !line.ends_with('\n') {
        anyhow::bail!("connection closed mid-hello");
    }

    let hello = Hello::from_line(&line).context("malformed hello")?;
    if hello.router_id.is_empty() || hello.link_id.is_empty() {
        anyhow::bail!("hello is missing router or link id");
    }
    Ok(hello)
}
