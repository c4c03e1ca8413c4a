//! Outbound TCP links.

use std::time::Duration;

use async_trait::async_trait;
use meshlink_core::config::DialerConfig;
use meshlink_core::BackoffConfig;
use meshlink_services::{DialError, DialTarget, Dialer, SharedLink};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{Hello, LinkContext, LinkInfo, TcpLink, TCP_PROTOCOL};

pub struct TcpDialer {
    groups: Vec<String>,
    binding: String,
    healthy_backoff: BackoffConfig,
    unhealthy_backoff: BackoffConfig,
    connect_timeout: Duration,
    router_id: String,
    router_version: String,
    ctx: LinkContext,
}

impl TcpDialer {
    pub fn new(config: &DialerConfig, router_id: &str, router_version: &str, ctx: LinkContext) -> Self {
        Self {
            groups: config.groups.clone(),
            binding: config.binding.clone(),
            healthy_backoff: config.healthy_backoff.clone(),
            unhealthy_backoff: config.unhealthy_backoff.clone(),
            connect_timeout: config.connect_timeout(),
            router_id: router_id.to_string(),
            router_version: router_version.to_string(),
            ctx,
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    fn groups(&self) -> &[String] {
        &self.groups
    }

    fn binding(&self) -> &str {
        &self.binding
    }

    fn healthy_backoff(&self) -> &BackoffConfig {
        &self.healthy_backoff
    }

    fn unhealthy_backoff(&self) -> &BackoffConfig {
        &self.unhealthy_backoff
    }

    async fn dial(&self, target: DialTarget) -> Result<SharedLink, DialError> {
        if target.link_protocol != TCP_PROTOCOL {
            return Err(DialError::UnsupportedProtocol(target.link_protocol));
        }

        tracing::debug!(
            link_id = %target.link_id,
            address = %target.address,
            iteration = target.iteration,
            "dialing link"
        );

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target.address))
            .await
            .map_err(|_| DialError::Timeout(target.address.clone()))?
            .map_err(|source| DialError::Connect {
                address: target.address.clone(),
                source,
            })?;

        let hello = Hello {
            link_id: target.link_id.clone(),
            router_id: self.router_id.clone(),
            router_version: self.router_version.clone(),
            dialer_binding: self.binding.clone(),
            protocol: TCP_PROTOCOL.to_string(),
            iteration: target.iteration,
        };
        let line = hello.to_line().map_err(|e| DialError::Handshake {
            address: target.address.clone(),
            reason: e.to_string(),
        })?;
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|source| DialError::Connect {
                address: target.address.clone(),
                source,
            })?;

        let info = LinkInfo {
            id: target.link_id,
            key: target.link_key,
            dest_id: target.router_id,
            dest_version: target.router_version,
            protocol: TCP_PROTOCOL.to_string(),
            dial_address: target.address,
            dialed: true,
            iteration: target.iteration,
        };
        tracing::info!(link_id = %info.id, dest = %info.dest_id, address = %info.dial_address, "link dialed");
        Ok(TcpLink::start(stream, info, &self.ctx))
    }
}
