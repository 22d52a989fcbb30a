use clap::{Parser, Subcommand};
use std::path::PathBuf;

use walkgen::context::Context;
use walkgen::spec::SessionSpec;

#[derive(Parser)]
#[command(
    name = "walkgen",
    version,
    about = "RISC-V virtual-memory test-vector generator — Sv32/Sv39/Sv48 page-table walks"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session spec and emit the walk snapshot as JSON
    Generate {
        /// Path to the session spec (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// RNG seed (overrides the spec's `seed` field)
        #[arg(long)]
        seed: Option<u64>,

        /// Write the snapshot here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            spec,
            seed,
            out,
            pretty,
        } => {
            let text = std::fs::read_to_string(&spec).unwrap_or_else(|e| {
                eprintln!("Failed to read spec {}: {}", spec.display(), e);
                std::process::exit(1);
            });
            let mut session: SessionSpec = serde_json::from_str(&text).unwrap_or_else(|e| {
                eprintln!("Failed to parse spec {}: {}", spec.display(), e);
                std::process::exit(1);
            });
            if seed.is_some() {
                session.seed = seed;
            }

            let mut ctx = Context::from_spec(&session).unwrap_or_else(|e| {
                eprintln!("Failed to create session: {}", e);
                std::process::exit(1);
            });
            if let Err(e) = ctx.run(&session.test_cases) {
                eprintln!("Generation failed: {}", e);
                std::process::exit(1);
            }

            let snapshot = ctx.snapshot();
            let rendered = if pretty {
                serde_json::to_string_pretty(&snapshot)
            } else {
                serde_json::to_string(&snapshot)
            }
            .expect("snapshot serializes");

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered).unwrap_or_else(|e| {
                        eprintln!("Failed to write {}: {}", path.display(), e);
                        std::process::exit(1);
                    });
                    log::info!("snapshot written to {}", path.display());
                }
                None => println!("{}", rendered),
            }
        }
    }
}
