use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "classpath-loader")]
#[command(about = "Resolve classes and resources from directory and archive roots")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Classpath root (directory or archive), in search order.
    #[arg(long = "root", value_name = "PATH", global = true)]
    pub roots: Vec<PathBuf>,

    /// JSON file with loader options.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub no_index: bool,

    #[arg(long, global = true)]
    pub lazy: bool,

    #[arg(long, global = true)]
    pub persist_index: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Find {
        class_name: String,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    Resource {
        path: String,
    },
    Index,
    Stats,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
