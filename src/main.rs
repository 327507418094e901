use clap::Parser;
use std::io::{self, BufRead, Write};
use std::time::{Duration, Instant};
use taskgraph::cli::{Cli, Command};
use taskgraph::core::config::Config;
use taskgraph::core::store::Store;
use taskgraph::rpc::{self, protocol::Request};

const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Init => {
            Store::open(&config.db_path)?;
            println!("initialized {}", config.db_path.display());
        }
        Command::Checkpoint => {
            let store = Store::open(&config.db_path)?;
            store.checkpoint()?;
            println!("checkpointed {}", config.db_path.display());
        }
        Command::Serve => serve(config)?,
    }
    Ok(())
}

/// Single-threaded request loop. A WAL checkpoint is squeezed in between
/// reads once `CHECKPOINT_INTERVAL` has elapsed, never while a request is
/// in flight, so it never competes with an RPC handler for the connection.
fn serve(config: Config) -> anyhow::Result<()> {
    let store = Store::open(&config.db_path)?;
    let mut last_checkpoint = Instant::now();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;

        if last_checkpoint.elapsed() >= CHECKPOINT_INTERVAL {
            if let Err(e) = store.checkpoint() {
                eprintln!("taskgraph: checkpoint failed: {e}");
            }
            last_checkpoint = Instant::now();
        }

        if line.trim().is_empty() {
            continue;
        }
        let req: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                eprintln!("taskgraph: malformed request ignored: {e}");
                continue;
            }
        };
        if let Some(response) = rpc::handle_request(&store, &config, req) {
            writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
