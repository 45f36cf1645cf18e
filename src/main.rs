use anyhow::Context;
use clap::Parser;
use mini_reldb::storage::Storage;
use mini_reldb::{parse, Catalog, SqlExec, Store};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "mini-reldb", about = "Interactive SQL shell over a sled-backed catalog")]
struct Cli {
    /// Database directory
    #[arg(long, default_value = "data_dir")]
    data: PathBuf,

    /// Use a throwaway database that is deleted on exit
    #[arg(long)]
    temporary: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber")?;

    let store = if cli.temporary {
        Store::temporary()?
    } else {
        Store::open(&cli.data).with_context(|| format!("opening {}", cli.data.display()))?
    };
    info!("database opened at {}", cli.data.display());
    let mut exec = SqlExec::new(Catalog::open(store.clone())?);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!("SQL> ");
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "quit" {
            break;
        }
        let commands = match parse(query) {
            Ok(commands) => commands,
            Err(e) => {
                println!("Error: {e}");
                continue;
            }
        };
        for command in &commands {
            println!("{command}");
            match exec.execute(command) {
                Ok(result) => println!("{result}"),
                Err(e) => println!("Error: {e}"),
            }
        }
        store.flush()?;
    }
    Ok(())
}
