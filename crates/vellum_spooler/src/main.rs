//! Vellum print spooler daemon.
//!
//! Usage:
//!     vellum-spooler --bind 127.0.0.1:6631 --spool-root /var/spool/vellum

use clap::Parser;
use vellum_spooler::config::ServerConfig;
use vellum_spooler::server::Spooler;

#[derive(Parser, Debug)]
#[command(name = "vellum-spooler", about = "IPP print scheduler for Vellum")]
struct Args {
    /// Listen address for the framed request channel
    #[arg(long)]
    bind: Option<String>,

    /// Advertised server name
    #[arg(long)]
    server_name: Option<String>,

    /// Spool directory (control files, documents, credentials)
    #[arg(long)]
    spool_root: Option<std::path::PathBuf>,

    /// Fail requests on conformance violations instead of repairing them
    #[arg(long)]
    strict: bool,

    /// Allow file: device uris
    #[arg(long)]
    file_device: bool,

    /// Verbose console logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    vellum_logging::init_logging("vellum-spooler", args.verbose)?;

    let mut config = ServerConfig::default();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(name) = args.server_name {
        config.server_name = name;
    }
    if let Some(root) = args.spool_root {
        config.spool_root = root;
    }
    config.strict_conformance = args.strict;
    config.file_device = args.file_device;

    tracing::info!("starting vellum spooler");
    tracing::info!("  bind: {}", config.bind_addr);
    tracing::info!("  spool: {}", config.spool_root.display());
    tracing::info!("  strict conformance: {}", config.strict_conformance);

    let spooler = Spooler::bind(config).await?;
    spooler.run().await
}
