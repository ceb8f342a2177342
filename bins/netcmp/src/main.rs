use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

mod session;

use session::Session;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut session = Session::new();

    if !args.command.is_empty() {
        for line in args.command.iter() {
            if !session.execute(line)? {
                return Ok(());
            }
        }
        return Ok(());
    }

    match args.script {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot open script {:?}", path))?;
            for line in text.lines() {
                match session.execute(line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    // Batch scripts report the failing command but
                    // keep going, like the interactive shell.
                    Err(err) => eprintln!("error: {:#}", err),
                }
            }
        }
        None => {
            let stdin = std::io::stdin();
            let interactive = stdin.is_terminal();
            let mut lines = stdin.lock().lines();
            loop {
                if interactive {
                    print!("netcmp> ");
                    std::io::stdout().flush()?;
                }
                let Some(line) = lines.next() else { break };
                match session.execute(&line?) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => eprintln!("error: {:#}", err),
                }
            }
        }
    }
    Ok(())
}

/// Arguments to the netcmp shell.
#[derive(Parser)]
#[command(
    version,
    about,
    long_about = "Compare two netlists by graph isomorphism.\n\n\
                  Runs the given command script, or reads commands from \
                  standard input. See the `readnet`, `compare`, `run`, and \
                  `verify` commands to get started."
)]
pub struct Args {
    /// A command script to execute, one command per line.
    script: Option<PathBuf>,
    /// Commands to execute directly, in order.
    #[arg(short, long)]
    command: Vec<String>,
}
