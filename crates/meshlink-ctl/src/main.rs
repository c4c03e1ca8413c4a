//! meshlink-ctl — command-line interface for the meshlink daemon.

use anyhow::{Context, Result};

mod cmd;

use cmd::dests::{cmd_add_dest, cmd_dests, cmd_remove_dest};
use cmd::links::{cmd_forget, cmd_links};

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("Usage: meshlink-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  links                                     List live links");
    println!("  dests                                     Show destinations and link states");
    println!("  add-dest <id> <address> [protocol] [version]");
    println!("                                            Add or update a destination");
    println!("  remove-dest <id>                          Remove a destination and close its links");
    println!("  forget <link-id>                          Drop a link from the registry without closing it");
    println!("  help                                      Show this message");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["links"] | [] => cmd_links(port).await,
        ["dests"] => cmd_dests(port).await,
        ["add-dest", id, address] => cmd_add_dest(port, id, address, "tcp", "").await,
        ["add-dest", id, address, protocol] => cmd_add_dest(port, id, address, protocol, "").await,
        ["add-dest", id, address, protocol, version] => {
            cmd_add_dest(port, id, address, protocol, version).await
        }
        ["remove-dest", id] => cmd_remove_dest(port, id).await,
        ["forget", link_id] => cmd_forget(port, link_id).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
