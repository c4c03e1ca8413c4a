//! Destination and link state commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{base_url, delete_json, get_json, post_json_body};

#[derive(Deserialize)]
struct InspectResponse {
    destinations: Vec<DestInfo>,
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct DestInfo {
    id: String,
    version: String,
    healthy: bool,
    unhealthy_since_secs: Option<u64>,
    link_states: Vec<StateInfo>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct StateInfo {
    id: String,
    key: String,
    status: String,
    dial_attempts: u64,
    connected_count: u64,
    retry_delay_ms: u64,
    next_dial_in_ms: u64,
    target_address: String,
    target_groups: Vec<String>,
    target_binding: String,
    dialer_groups: Vec<String>,
    dialer_binding: String,
}

#[derive(Deserialize)]
struct DestinationResponse {
    id: String,
    accepted: bool,
}

pub async fn cmd_dests(port: u16) -> Result<()> {
    let resp: InspectResponse = get_json(&format!("{}/links", base_url(port))).await?;

    for e in &resp.errors {
        eprintln!("warning: {}", e);
    }

    if resp.destinations.is_empty() {
        println!("No link destinations.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Link Destinations ({})", resp.destinations.len());
    println!("═══════════════════════════════════════");

    for d in &resp.destinations {
        let health = match d.unhealthy_since_secs {
            Some(secs) if !d.healthy => format!("unhealthy for {}s", secs),
            _ => "healthy".to_string(),
        };
        println!("  ┌─ {} ({})", d.id, d.version);
        println!("  │  health : {}", health);
        if d.link_states.is_empty() {
            println!("  └─ no link states");
            continue;
        }
        for (i, s) in d.link_states.iter().enumerate() {
            let corner = if i + 1 == d.link_states.len() { "└─" } else { "├─" };
            println!("  {} {}", corner, s.key);
            println!("  │    status     : {}", s.status);
            println!("  │    target     : {}", s.target_address);
            println!("  │    attempts   : {}", s.dial_attempts);
            println!("  │    connected  : {}", s.connected_count);
            println!("  │    retry in   : {}ms (delay {}ms)", s.next_dial_in_ms, s.retry_delay_ms);
        }
    }

    Ok(())
}

pub async fn cmd_add_dest(
    port: u16,
    id: &str,
    address: &str,
    protocol: &str,
    version: &str,
) -> Result<()> {
    #[derive(Serialize)]
    struct ListenerBody<'a> {
        address: &'a str,
        protocol: &'a str,
        groups: Vec<&'a str>,
    }

    #[derive(Serialize)]
    struct DestinationBody<'a> {
        id: &'a str,
        version: &'a str,
        healthy: bool,
        listeners: Vec<ListenerBody<'a>>,
    }

    let body = DestinationBody {
        id,
        version,
        healthy: true,
        listeners: vec![ListenerBody {
            address,
            protocol,
            groups: vec!["default"],
        }],
    };

    let resp: DestinationResponse =
        post_json_body(&format!("{}/destinations", base_url(port)), &body).await?;

    if resp.accepted {
        println!("✓ Destination added: {} via {}:{}", resp.id, protocol, address);
    }

    Ok(())
}

pub async fn cmd_remove_dest(port: u16, id: &str) -> Result<()> {
    let resp: DestinationResponse =
        delete_json(&format!("{}/destinations/{}", base_url(port), id)).await?;

    if resp.accepted {
        println!("✓ Destination removed: {}", resp.id);
    }

    Ok(())
}
