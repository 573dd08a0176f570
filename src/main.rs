// This is my entry point for running a router or a node from the command line
use clap::Parser;
use cluster_link::cli::{run_node_menu, run_router_console};
use cluster_link::{
    ClientRouter, Command, Node, Opt, Router, RouterRole, ServerRouter, Settings, GLOBAL_CONFIG,
};
use log::{error, info, LevelFilter};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::process;
use std::sync::Arc;
use std::thread;

fn main() {
    // I initialize logging so I can follow every link as it opens and closes
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    // A config file replaces the defaults, the CLUSTER_* variables still win
    if let Some(path) = &opt.config {
        if let Err(e) = GLOBAL_CONFIG.load_file(path) {
            error!("Error: {e}");
            process::exit(1);
        }
    }

    if let Err(e) = run_command(opt.command, GLOBAL_CONFIG.settings()) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command, settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Router { role, remote } => match role {
            RouterRole::Server => {
                if remote.is_some() {
                    return Err("a server router does not take a remote address".into());
                }
                let router = Arc::new(ServerRouter::bind(settings)?);
                // Nodes are only accepted once the two routers are linked
                router.listen_for_router()?;
                router.spawn_node_listener()?;
                exit_on_fatal(Arc::clone(&router));

                let stdin = io::stdin();
                run_router_console(router.table(), &mut stdin.lock(), &mut io::stdout())?;
                let closed = router.shutdown();
                info!("Closed {closed} links, bye");
            }
            RouterRole::Client => {
                let remote: IpAddr = remote.ok_or("a client router needs the server's address")?;
                let router = Arc::new(ClientRouter::new(settings));
                router.connect_to_router(remote)?;
                router.spawn_node_listener()?;
                exit_on_fatal(Arc::clone(&router));

                let stdin = io::stdin();
                run_router_console(router.table(), &mut stdin.lock(), &mut io::stdout())?;
                router.table().close_all();
            }
        },
        Command::Node { router, local } => {
            let router_addr = SocketAddr::new(router, settings.node_port);
            let node = Node::attach(router_addr, settings, local)?;
            let stdin = io::stdin();
            run_node_menu(&node, &mut stdin.lock(), &mut io::stdout())?;
        }
    }
    Ok(())
}

// A broken router link or a garbled discovery line takes the whole router down
fn exit_on_fatal<R: Router + Send + Sync + 'static>(router: Arc<R>) {
    thread::spawn(move || {
        let err = router.wait_for_fatal();
        error!("Fatal: {err}");
        process::exit(1);
    });
}
