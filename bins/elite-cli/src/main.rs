mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "elite-cli")]
#[command(about = "Elite CLI - Normalize test cases, submit jobs, and check toolchains", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize raw test-case text into canonical JSON
    Normalize {
        /// File with the raw text ("-" reads stdin)
        #[arg(short, long, default_value = "-")]
        file: String,
    },

    /// Queue a job file and wait for its verdict
    Submit {
        /// Job JSON: {code, language, testCase, timeout?, mode?, job_id?}
        #[arg(short, long)]
        file: PathBuf,

        /// Redis URL (defaults to REDIS_URL or redis://127.0.0.1:6379)
        #[arg(long)]
        redis_url: Option<String>,

        /// Seconds to wait for the verdict
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Validate the language toolchain configuration
    CheckConfig {
        /// Path to languages.json
        #[arg(short, long, default_value = "config/languages.json")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Normalize { file } => {
            commands::normalize_file(&file)?;
        }
        Commands::Submit {
            file,
            redis_url,
            timeout_secs,
        } => {
            commands::submit_job(&file, redis_url, timeout_secs).await?;
        }
        Commands::CheckConfig { path } => {
            commands::check_config(&path)?;
        }
    }

    Ok(())
}
