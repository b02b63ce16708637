use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use pngcomp::config::ServerConfig;
use pngcomp::logging::init_logging;

/// Composite PNG rendering service.
#[derive(Debug, Parser)]
#[command(name = "pngcomp", version, about)]
struct Args {
    /// JSON config file
    #[arg(short, long, env = "PNGCOMP_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (mut config, source) = match ServerConfig::load(args.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("pngcomp: {}", e);
            std::process::exit(2);
        },
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("pngcomp: {}", e);
        std::process::exit(2);
    }
    source.log();

    if let Err(e) = pngcomp::run(config).await {
        log::error!("[SERVER] {}", e);
        std::process::exit(1);
    }
}
