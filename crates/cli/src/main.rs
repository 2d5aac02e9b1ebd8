use cairn_cli::commands::{inspect, search, timeline, verify};
use cairn_node::wal_reader::SearchOptions;
use cairn_persistence::DEFAULT_MAX_RECORD_SIZE;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cairn")]
#[command(about = "Cairn Forensic CLI - read-only tools for consensus WAL and store files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the status of a node's WAL, block file and saved state.
    /// With --dir the standard layout under the node home is used.
    Inspect {
        /// Node home directory.
        #[arg(long, short)]
        dir: Option<PathBuf>,

        /// Path to the WAL file (overrides the layout)
        #[arg(long)]
        wal_path: Option<PathBuf>,

        /// Path to the block file (overrides the layout)
        #[arg(long)]
        blocks_path: Option<PathBuf>,

        /// Path to the state file (overrides the layout)
        #[arg(long)]
        state_path: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
    /// Check every WAL record and the height marker order
    Verify {
        wal_path: PathBuf,

        #[arg(long, default_value_t = DEFAULT_MAX_RECORD_SIZE)]
        max_record_size: u32,
    },
    /// List the heights recorded in a WAL
    Timeline {
        wal_path: PathBuf,

        /// Skip damaged records instead of stopping
        #[arg(long)]
        ignore_corruption: bool,

        #[arg(long)]
        json: bool,
    },
    /// Print the messages logged for one height
    Search {
        wal_path: PathBuf,

        #[arg(long)]
        height: u64,

        /// Skip damaged records instead of stopping
        #[arg(long)]
        ignore_corruption: bool,

        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect {
            dir,
            wal_path,
            blocks_path,
            state_path,
            json,
        } => {
            let paths = inspect::StorePaths::resolve(dir, wal_path, blocks_path, state_path);
            inspect::run(&paths, json).map(|_| ())
        }
        Commands::Verify {
            wal_path,
            max_record_size,
        } => verify::run(&wal_path, max_record_size).map(|_| ()),
        Commands::Timeline {
            wal_path,
            ignore_corruption,
            json,
        } => {
            let options = SearchOptions {
                ignore_data_corruption: ignore_corruption,
            };
            timeline::run(&wal_path, options, json).map(|_| ())
        }
        Commands::Search {
            wal_path,
            height,
            ignore_corruption,
            json,
        } => {
            let options = SearchOptions {
                ignore_data_corruption: ignore_corruption,
            };
            search::run(&wal_path, height, options, json).map(|_| ())
        }
    }
}
