use crate::report::OutputFormat;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file. Defaults to the first of the usual locations.
    #[clap(long, value_parser)]
    pub config: Option<PathBuf>,

    #[clap(long, value_parser)]
    pub log: Option<PathBuf>,

    #[clap(long, value_parser, default_value_t = false)]
    pub verbose: bool,

    /// Print engine counters to stderr on exit.
    #[clap(long, value_parser, default_value_t = false)]
    pub metrics: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one query. A period followed by a space (`Foo. bar`) searches the
    /// active document's declarations instead of file names.
    Search {
        query: String,

        /// Project directory. May be given more than once.
        #[clap(short = 'p', long = "project", value_parser, default_value = ".")]
        projects: Vec<PathBuf>,

        /// Source file treated as the active document.
        #[clap(long, value_parser)]
        active: Option<PathBuf>,

        #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Give up and cancel the search after this many milliseconds.
        #[clap(long, value_parser, default_value_t = 30_000)]
        timeout_ms: u64,
    },
    /// Read queries and commands from stdin until `:q` or end of input.
    Interactive {
        #[clap(short = 'p', long = "project", value_parser, default_value = ".")]
        projects: Vec<PathBuf>,

        #[clap(long, value_parser)]
        active: Option<PathBuf>,
    },
    Completions {
        #[clap(value_parser)]
        shell: Shell,
    },
}
