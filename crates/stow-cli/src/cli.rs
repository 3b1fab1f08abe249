use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stow",
    about = "stow: inspect and edit structured storage files",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new, empty store file
    Init(InitArgs),
    /// List the children of a container
    Ls(LsArgs),
    /// Show the whole container tree
    Tree(FileArgs),
    /// Create a container
    Mkdir(MkdirArgs),
    /// Write a file's content into an object
    Put(PutArgs),
    /// Print an object's content
    Cat(PathArgs),
    /// Remove a container, object or property set
    Rm(PathArgs),
    /// Rename a container, object or property set
    Mv(MvArgs),
    /// Read and edit properties
    Prop(PropArgs),
    /// Show or edit the summary information
    Summary(SummaryArgs),
}

#[derive(Args)]
pub struct FileArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct InitArgs {
    pub file: PathBuf,
    /// Replace an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct LsArgs {
    pub file: PathBuf,
    /// Container path, `/`-separated; the root when omitted
    pub path: Option<String>,
}

#[derive(Args)]
pub struct MkdirArgs {
    pub file: PathBuf,
    pub path: String,
    /// Create missing parent containers
    #[arg(short, long)]
    pub parents: bool,
}

#[derive(Args)]
pub struct PutArgs {
    pub file: PathBuf,
    /// Object path, `/`-separated
    pub path: String,
    /// File to read the content from
    pub source: PathBuf,
}

#[derive(Args)]
pub struct PathArgs {
    pub file: PathBuf,
    pub path: String,
}

#[derive(Args)]
pub struct MvArgs {
    pub file: PathBuf,
    pub path: String,
    pub new_name: String,
}

#[derive(Args)]
pub struct PropArgs {
    #[command(subcommand)]
    pub action: PropAction,
}

#[derive(Subcommand)]
pub enum PropAction {
    /// Print one property
    Get {
        file: PathBuf,
        /// Property set path, `/`-separated
        path: String,
        name: String,
    },
    /// Set a property; the set is created when missing
    Set {
        file: PathBuf,
        path: String,
        name: String,
        /// JSON value; text that is not JSON is stored as a string
        value: String,
        /// Store the value as a string even if it parses as JSON
        #[arg(long)]
        string: bool,
    },
    /// List the properties of a set
    Ls { file: PathBuf, path: String },
    /// Delete a property
    Rm {
        file: PathBuf,
        path: String,
        name: String,
    },
}

#[derive(Args)]
pub struct SummaryArgs {
    pub file: PathBuf,
    /// Set a field, as `field=value`; repeatable
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    pub set: Vec<String>,
}
