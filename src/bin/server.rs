use std::path::PathBuf;

use anyhow::Context as _;
use clap::{ArgAction, Parser};
use kalah_arena::logger::Logger;
use kalah_arena::server::Server;
use kalah_arena::store::UserStore;
use tokio::net::TcpListener;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name    = "server",
    version,
    about   = "Kalah Arena — authoritative game server",
    long_about = "Accepts TCP clients, authenticates players, matches them into\n\
                  Kalah sessions, referees the games, and keeps a persistent\n\
                  per-player scoreboard. Protocol is line-delimited ASCII."
)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:31337")]
    bind: String,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Where user records are kept
    #[arg(short = 'f', long, default_value = "users.ron")]
    users_file: PathBuf,

    /// Keep user records in memory only; nothing is written to disk
    #[arg(long)]
    ephemeral: bool,
}

// ── ENTRY POINT ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = Logger::new(args.verbose);

    let store = if args.ephemeral {
        UserStore::in_memory()
    } else {
        UserStore::open(args.users_file.clone())
            .with_context(|| format!("loading {}", args.users_file.display()))?
    };
    log.verbose(format!("{} registered users loaded", store.len()));

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;

    Server::new(store, log).run(listener).await;
    Ok(())
}
