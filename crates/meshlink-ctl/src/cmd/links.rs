//! Live link commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct InspectResponse {
    links: Vec<LinkInfo>,
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct LinkInfo {
    id: String,
    key: String,
    dest_router_id: String,
    protocol: String,
    dial_address: String,
    dialed: bool,
    iteration: u32,
    closed: bool,
}

pub async fn cmd_links(port: u16) -> Result<()> {
    let resp: InspectResponse = get_json(&format!("{}/links", base_url(port))).await?;

    for e in &resp.errors {
        eprintln!("warning: {}", e);
    }

    if resp.links.is_empty() {
        println!("No live links.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Live Links ({})", resp.links.len());
    println!("═══════════════════════════════════════");

    for l in &resp.links {
        let direction = if l.dialed { "dialed" } else { "accepted" };
        println!("  ┌─ {}", l.id);
        println!("  │  key       : {}", l.key);
        println!("  │  dest      : {}", l.dest_router_id);
        println!("  │  protocol  : {}", l.protocol);
        println!("  │  address   : {}", l.dial_address);
        println!("  │  direction : {}", direction);
        println!("  │  iteration : {}", l.iteration);
        println!("  └─ closed    : {}", l.closed);
    }

    Ok(())
}

pub async fn cmd_forget(port: u16, link_id: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct ForgetResponse {
        link_id: String,
        forgotten: bool,
    }

    let resp: ForgetResponse =
        post_json(&format!("{}/links/{}/forget", base_url(port), link_id)).await?;

    if resp.forgotten {
        println!("✓ Link forgotten: {}", resp.link_id);
    } else {
        println!("Link not found: {}", link_id);
    }

    Ok(())
}
