use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use zedmon_remote::{Session, Settings};

/// Z80 remote debug monitor
#[derive(Parser, Debug)]
#[command(name = "zedmon")]
#[command(about = "Connect to a DZRP remote, load a snapshot, watch it run", long_about = None)]
struct Args {
    /// Remote endpoint (host:port)
    #[arg(short, long, default_value = "localhost:12000")]
    connect: String,

    /// Snapshot (.sna/.nex) to load after connecting
    #[arg(short, long)]
    load: Option<PathBuf>,

    /// Settings file (JSON); command-line flags override it
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Per-request response timeout in milliseconds
    #[arg(long)]
    response_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut settings: Settings = match &args.settings {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Settings::default(),
    };
    settings.endpoint = args.connect.clone();
    if let Some(ms) = args.response_timeout {
        settings.response_timeout_ms = ms;
    }
    if let Some(path) = args.load {
        settings.auto_load = Some(path);
    }
    let auto_load = settings.auto_load.clone();

    let mut session = Session::connect(settings).await?;
    info!("connected: {}", session.banner());

    if let Some(path) = auto_load {
        session.load_snapshot(&path).await?;
        info!("loaded {}", path.display());
    }

    // Run the target, printing every user-visible stop; Ctrl-C pauses,
    // a second Ctrl-C exits.
    let pause = session.pause_handle();
    tokio::spawn(async move {
        let mut interrupts = 0u32;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            interrupts += 1;
            if interrupts > 1 {
                std::process::exit(0);
            }
            let _ = pause.pause().await;
        }
    });

    loop {
        let reason = session.resume().await?;
        let regs = session.get_registers().await?;
        if reason.is_empty() {
            info!("stopped at {:#06x}", regs.pc());
        } else {
            info!("{reason} (PC={:#06x})", regs.pc());
        }
        if reason == "Manual break." {
            info!("paused; press Enter to continue, Ctrl-C to quit");
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
        }
    }
}
