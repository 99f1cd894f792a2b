use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kvlease::{
    Admin, Config, LeaseEngine, NetworkDescriptor, Result, StoreClient, Topology, VERSION,
};

#[derive(Parser)]
#[command(name = "kvlease")]
#[command(author, version, about = "Store-backed DHCPv4 lease allocation", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "kvlease.json")]
    config: PathBuf,

    /// Default log filter when RUST_LOG is unset. Overrides the config file.
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an address for a MAC, committing a pool entry if needed.
    Allocate { mac: String },
    /// Write a JSON topology file into the store.
    Apply { file: PathBuf },
    /// List dynamic networks.
    Networks,
    /// Show one network as the engine sees it.
    Network { name: String },
    /// List a network's pool entries.
    Pool { name: String },
    AddMember { network: String, mac: String },
    RemoveMember { network: String, mac: String },
    /// Bind a MAC to a fixed address in a network.
    Bind {
        mac: String,
        address: Ipv4Addr,
        network: String,
    },
    Unbind { mac: String },
    /// Look up the static address of a named member.
    Resolve { name: String },
    /// Remove a network, its members and its pool.
    DeleteNetwork { name: String },
    ShowConfig,
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_create(&cli.config).await?;
    let log_level = cli.log_level.unwrap_or_else(|| config.log_level.clone());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    if let Commands::ShowConfig = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    if let Commands::Version = cli.command {
        println!("kvlease {}", VERSION);
        return Ok(());
    }

    let store = config.open_store().await?;
    let settings = config.settings();
    let client = StoreClient::new(store.clone(), settings.store_timeout);
    let admin = Admin::new(client.clone());

    match cli.command {
        Commands::Allocate { mac } => {
            let engine = LeaseEngine::new(store, settings);
            match engine.allocate(&mac).await {
                Ok(assignment) => {
                    println!("{} -> {} ({})", mac, assignment.address, assignment.network);
                    for option in &assignment.options {
                        println!("  {}", option);
                    }
                }
                Err(no_assignment) => println!("{}: {}", mac, no_assignment),
            }
        }
        Commands::Apply { file } => {
            let topology = Topology::load(&file).await?;
            admin.apply(&topology).await?;
            info!(
                "Applied {} network(s) from {:?}",
                topology.networks.len(),
                file
            );
        }
        Commands::Networks => {
            let networks = admin.networks().await;
            if networks.is_empty() {
                println!("No dynamic networks.");
            }
            for name in networks {
                println!("{}", name);
            }
        }
        Commands::Network { name } => {
            let network = NetworkDescriptor::load(&client, &name).await?;
            print_network(&network);
        }
        Commands::Pool { name } => {
            let entries = admin.pool_entries(&name).await?;
            let range = NetworkDescriptor::load(&client, &name)
                .await
                .ok()
                .and_then(|network| network.ip_range);

            if entries.is_empty() {
                println!("Pool of {} is empty.", name);
            } else {
                println!("{:<8} {:<16} {:<20}", "Offset", "IP Address", "MAC");
                println!("{}", "-".repeat(46));
                for entry in entries {
                    let address = range
                        .and_then(|range| range.address_at(entry.offset))
                        .map(|address| address.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{:<8} {:<16} {:<20}", entry.offset, address, entry.mac);
                }
            }
        }
        Commands::AddMember { network, mac } => {
            admin.add_member(&network, &mac).await?;
            println!("Added {} to {}.", mac, network);
        }
        Commands::RemoveMember { network, mac } => {
            if admin.remove_member(&network, &mac).await? {
                println!("Removed {} from {}.", mac, network);
            } else {
                println!("{} is not a member of {}.", mac, network);
            }
        }
        Commands::Bind {
            mac,
            address,
            network,
        } => {
            admin.bind_static(&mac, address, &network).await?;
            println!("Bound {} to {} in {}.", mac, address, network);
        }
        Commands::Unbind { mac } => {
            if admin.unbind_static(&mac).await? {
                println!("Unbound {}.", mac);
            } else {
                println!("{} has no static binding.", mac);
            }
        }
        Commands::Resolve { name } => match admin.resolve_name(&name).await? {
            Some(address) => println!("{} -> {}", name, address),
            None => println!("{} does not resolve.", name),
        },
        Commands::DeleteNetwork { name } => {
            let removed = admin.delete_network(&name).await?;
            println!("Deleted {} ({} key(s)).", name, removed);
        }
        Commands::ShowConfig | Commands::Version => {}
    }

    client.flush().await
}

fn print_network(network: &NetworkDescriptor) {
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    println!("{:<12} {}", "Name", network.name);
    println!("{:<12} {}", "Subnet", network.subnet);
    println!("{:<12} {}", "Domain", or_dash(network.domain.clone()));
    println!(
        "{:<12} {}",
        "Range",
        or_dash(
            network
                .ip_range
                .map(|range| format!("{} - {}", range.begin, range.end))
        )
    );
    println!(
        "{:<12} {}",
        "MAC range",
        or_dash(
            network
                .mac_range
                .map(|range| format!("{:012x} - {:012x}", range.begin, range.end))
        )
    );
    println!(
        "{:<12} {}",
        "Gateways",
        or_dash(network.gateways.as_ref().map(|list| list.join(", ")))
    );
    println!(
        "{:<12} {}",
        "Nameservers",
        or_dash(network.nameservers.as_ref().map(|list| list.join(", ")))
    );
    if let Some(options) = &network.options {
        for opt in options {
            println!("{:<12} {} = {:?}", "Option", opt.number, opt.value);
        }
    }
    if let Some(members) = &network.members {
        for member in members {
            println!("{:<12} {}", "Member", member.mac);
        }
    }
}
