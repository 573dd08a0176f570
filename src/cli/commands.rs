use crate::router::RouterRole;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cluster-link")]
pub struct Opt {
    #[arg(
        long = "config",
        global = true,
        help = "TOML file with ports, bind address and download directory"
    )]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "router", about = "Run a cluster router")]
    Router {
        #[arg(help = "Router role: 'server' waits for its peer, 'client' dials it")]
        role: RouterRole,
        #[arg(help = "Address of the server router (client role only)")]
        remote: Option<IpAddr>,
    },
    #[command(name = "node", about = "Attach a node to a router and open its menu")]
    Node {
        #[arg(help = "Address of the router to attach to")]
        router: IpAddr,
        #[arg(
            long = "local",
            help = "Address this node is known by and listens for peers on"
        )]
        local: Option<IpAddr>,
    },
}
