//! Ticketline CLI - talks JSON-RPC to a running ticketline daemon

mod rpc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use rpc::RpcClient;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9630";

#[derive(Parser)]
#[command(name = "ticketline")]
#[command(about = "Ticketline queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "TICKETLINE_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind an identity to the daemon session
    Login {
        /// Public identity id
        public_id: String,
    },

    /// Release the bound identity
    Logout,

    /// Show the bound identity
    Whoami,

    /// Set your display name
    Name { name: String },

    /// Manage your notification endpoint
    #[command(subcommand)]
    Push(PushCommands),

    /// Create and manage locations
    #[command(subcommand)]
    Location(LocationCommands),

    /// Take a number at a location
    Take { location_id: String },

    /// Give your number back
    Leave { location_id: String },

    /// Mark a number served (manager only)
    Serve {
        location_id: String,
        number: u64,
    },

    /// Show your place in a queue
    Status { location_id: String },

    /// Follow a queue until Ctrl+C
    Watch {
        location_id: String,

        /// Refresh interval in seconds
        #[arg(short, long, default_value = "2")]
        interval: u64,
    },

    /// List live queue entries (manager only)
    Entries { location_id: String },

    /// Control automatic serving of expired entries (manager only)
    #[command(subcommand)]
    Expiry(ExpiryCommands),
}

#[derive(Subcommand)]
enum PushCommands {
    /// Register an endpoint descriptor
    Register { endpoint: String },
    /// Remove the registered endpoint
    Clear,
}

#[derive(Subcommand)]
enum LocationCommands {
    /// Create a location managed by you
    Create {
        name: String,

        /// Auto-serve entries waiting longer than this many minutes (0 = off)
        #[arg(short, long)]
        auto_serve: Option<u32>,
    },
    /// Show one location
    Show { location_id: String },
    /// List locations
    List {
        /// Only locations you manage
        #[arg(long)]
        mine: bool,
    },
    Rename { location_id: String, name: String },
    /// Change the auto-serve threshold in minutes (0 = off)
    AutoServe { location_id: String, minutes: u32 },
}

#[derive(Subcommand)]
enum ExpiryCommands {
    Start { location_id: String },
    Stop { location_id: String },
    /// Serve expired entries once, now
    Sweep { location_id: String },
}

#[derive(Deserialize, Tabled)]
struct LocationRow {
    #[tabled(rename = "id")]
    location_id: String,
    name: String,
    #[tabled(rename = "created by")]
    creator_name: String,
    #[tabled(rename = "serving")]
    last_served_number: u64,
    #[tabled(rename = "next")]
    current_number: u64,
    waiting: usize,
    #[tabled(rename = "auto-serve (min)")]
    auto_serve_time: u32,
    #[tabled(rename = "mine")]
    managed_by_me: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryRecord {
    number: u64,
    holder: HolderRecord,
    timestamp: i64,
    served: bool,
    served_at: Option<i64>,
}

#[derive(Deserialize)]
struct HolderRecord {
    public_id: String,
}

#[derive(Tabled)]
struct EntryRow {
    number: u64,
    holder: String,
    taken: String,
    status: String,
}

impl From<EntryRecord> for EntryRow {
    fn from(e: EntryRecord) -> Self {
        let status = match (e.served, e.served_at) {
            (true, Some(at)) => format!("served {}", clock_time(at)),
            (true, None) => "served".to_string(),
            (false, _) => "waiting".to_string(),
        };
        Self {
            number: e.number,
            holder: e.holder.public_id,
            taken: clock_time(e.timestamp),
            status,
        }
    }
}

#[derive(Deserialize, PartialEq)]
struct ViewRecord {
    exists: bool,
    name: String,
    now_serving: u64,
    next_number: u64,
    waiting: usize,
    my_number: Option<u64>,
    my_position: Option<usize>,
    my_ticket_served: bool,
}

fn clock_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_view(view: &ViewRecord) {
    if !view.exists {
        println!("{}", "Location not found".yellow());
        return;
    }
    println!("{}", view.name.cyan().bold());
    println!("  {} {}", "Now serving:".bold(), view.now_serving);
    println!("  {} {}", "Next number:".bold(), view.next_number);
    println!("  {} {}", "Waiting:".bold(), view.waiting);
    match (view.my_number, view.my_ticket_served) {
        (Some(n), true) => println!("  {} #{} {}", "Your number:".bold(), n, "(served)".green()),
        (Some(n), false) => {
            let ahead = view.my_position.unwrap_or(0);
            println!("  {} #{} ({} ahead)", "Your number:".bold(), n, ahead);
            if ahead == 0 {
                println!("  {}", "You're next!".green().bold());
            }
        }
        (None, _) => println!("  {} none", "Your number:".bold()),
    }
}

fn print_identity(identity: &Value) {
    match identity["public_id"].as_str() {
        Some(id) => {
            let name = identity["display_name"].as_str().unwrap_or("Anonymous");
            println!("  {} {}", "Identity:".bold(), id);
            println!("  {} {}", "Name:".bold(), name);
        }
        None => println!("  {}", "No identity bound".yellow()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = RpcClient::new(cli.rpc_url);

    match cli.command {
        Commands::Login { public_id } => {
            let identity: Value = client
                .call("identity.bind.v1", json!({ "public_id": public_id }))
                .await?;
            println!("{}", "✓ Logged in".green().bold());
            print_identity(&identity);
        }

        Commands::Logout => {
            let _: Value = client.call("identity.leave.v1", json!({})).await?;
            println!("{}", "✓ Logged out".green().bold());
        }

        Commands::Whoami => {
            let identity: Value = client.call("identity.show.v1", json!({})).await?;
            print_identity(&identity);
        }

        Commands::Name { name } => {
            let _: Value = client
                .call("profile.set_name.v1", json!({ "name": name }))
                .await?;
            println!("{}", format!("✓ Display name set to {}", name).green().bold());
        }

        Commands::Push(PushCommands::Register { endpoint }) => {
            let _: Value = client
                .call("push.register.v1", json!({ "endpoint": endpoint }))
                .await?;
            println!("{}", "✓ Notification endpoint registered".green().bold());
        }

        Commands::Push(PushCommands::Clear) => {
            let _: Value = client.call("push.clear.v1", json!({})).await?;
            println!("{}", "✓ Notification endpoint removed".green().bold());
        }

        Commands::Location(LocationCommands::Create { name, auto_serve }) => {
            let created: Value = client
                .call(
                    "location.create.v1",
                    json!({ "name": name, "auto_serve_time": auto_serve }),
                )
                .await?;
            println!("{}", "✓ Location created".green().bold());
            println!("  {} {}", "Id:".bold(), created["location_id"].as_str().unwrap_or("-"));
        }

        Commands::Location(LocationCommands::Show { location_id }) => {
            let row: LocationRow = client
                .call("location.get.v1", json!({ "location_id": location_id }))
                .await?;
            println!("{}", Table::new(vec![row]));
        }

        Commands::Location(LocationCommands::List { mine }) => {
            let rows: Vec<LocationRow> = client
                .call("location.list.v1", json!({ "mine": mine }))
                .await?;
            if rows.is_empty() {
                println!("{}", "No locations".yellow());
            } else {
                println!("{}", Table::new(rows));
            }
        }

        Commands::Location(LocationCommands::Rename { location_id, name }) => {
            let _: Value = client
                .call(
                    "location.rename.v1",
                    json!({ "location_id": location_id, "name": name }),
                )
                .await?;
            println!("{}", "✓ Location renamed".green().bold());
        }

        Commands::Location(LocationCommands::AutoServe {
            location_id,
            minutes,
        }) => {
            let _: Value = client
                .call(
                    "location.set_auto_serve.v1",
                    json!({ "location_id": location_id, "minutes": minutes }),
                )
                .await?;
            if minutes == 0 {
                println!("{}", "✓ Auto-serve disabled".green().bold());
            } else {
                println!(
                    "{}",
                    format!("✓ Auto-serve after {} minutes", minutes).green().bold()
                );
            }
        }

        Commands::Take { location_id } => {
            let taken: Value = client
                .call("ticket.take.v1", json!({ "location_id": location_id }))
                .await?;
            println!(
                "{} {}",
                "✓ Your number is".green().bold(),
                taken["number"].to_string().bold()
            );
        }

        Commands::Leave { location_id } => {
            let res: Value = client
                .call("ticket.relinquish.v1", json!({ "location_id": location_id }))
                .await?;
            match res["number"].as_u64() {
                Some(n) => println!("{}", format!("✓ Number {} given back", n).green().bold()),
                None => println!("{}", "You had no number here".yellow()),
            }
        }

        Commands::Serve {
            location_id,
            number,
        } => {
            let res: Value = client
                .call(
                    "ticket.serve.v1",
                    json!({ "location_id": location_id, "number": number }),
                )
                .await?;
            match res["status"].as_str() {
                Some("served") => println!("{}", format!("✓ Number {} served", number).green().bold()),
                _ => println!("{}", format!("Number {} was already served", number).yellow()),
            }
        }

        Commands::Status { location_id } => {
            let view: ViewRecord = client
                .call("ticket.status.v1", json!({ "location_id": location_id }))
                .await?;
            print_view(&view);
        }

        Commands::Watch {
            location_id,
            interval,
        } => {
            let mut tick = tokio::time::interval(Duration::from_secs(interval.max(1)));
            let mut last: Option<ViewRecord> = None;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tick.tick() => {
                        let view: ViewRecord = client
                            .call("ticket.status.v1", json!({ "location_id": location_id }))
                            .await?;
                        if last.as_ref() != Some(&view) {
                            println!();
                            print_view(&view);
                            last = Some(view);
                        }
                    }
                }
            }
        }

        Commands::Entries { location_id } => {
            let entries: Vec<EntryRecord> = client
                .call("queue.entries.v1", json!({ "location_id": location_id }))
                .await?;
            if entries.is_empty() {
                println!("{}", "Queue is empty".yellow());
            } else {
                let rows: Vec<EntryRow> = entries.into_iter().map(EntryRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Expiry(ExpiryCommands::Start { location_id }) => {
            let _: Value = client
                .call("expiry.start.v1", json!({ "location_id": location_id }))
                .await?;
            println!("{}", "✓ Expiry timer running".green().bold());
        }

        Commands::Expiry(ExpiryCommands::Stop { location_id }) => {
            let _: Value = client
                .call("expiry.stop.v1", json!({ "location_id": location_id }))
                .await?;
            println!("{}", "✓ Expiry timer stopped".green().bold());
        }

        Commands::Expiry(ExpiryCommands::Sweep { location_id }) => {
            let report: Value = client
                .call("expiry.sweep.v1", json!({ "location_id": location_id }))
                .await?;
            match report["status"].as_str() {
                Some("completed") => {
                    println!("{}", "✓ Sweep completed".green().bold());
                    println!("  {} {}", "Served:".bold(), report["served"]);
                    println!("  {} {}", "Failed:".bold(), report["failed"]);
                }
                Some("disabled") => println!("{}", "Auto-serve is off for this location".yellow()),
                _ => println!("{}", "A sweep is already running".yellow()),
            }
        }
    }

    Ok(())
}
