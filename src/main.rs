//! Hearth command line: assemble and inspect layered policies.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hearth::assets::Assets;
use hearth::observability::init_logging;

#[derive(Parser)]
#[command(name = "hearth", version, about = "Extensible application host")]
struct Cli {
    /// Builtin asset directory (lowest layer).
    #[arg(long, default_value = "assets/builtin")]
    builtin: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble and validate the policy in FOLDER, reporting the first
    /// error found.
    Check { folder: PathBuf },
    /// Assemble the policy in FOLDER and print the merged document.
    Print { folder: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(None, None)?;

    match cli.command {
        Command::Check { folder } => {
            Assets::open(cli.builtin, Some(folder), None)?;
            println!("policy ok");
        }
        Command::Print { folder } => {
            let assets = Assets::open(cli.builtin, Some(folder), None)?;
            println!("{}", serde_json::to_string_pretty(&*assets.config())?);
        }
    }
    Ok(())
}
