use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand};

use crate::application::data::LogLevel;

/// Keeps edits as a tree of patches over a base snapshot.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Cli {
    #[clap(long, short, default_value = "warn", value_enum, global = true)]
    pub log_level: LogLevel,

    /// The root directory holding patchtree.yaml
    #[clap(long, short, default_value = ".", global = true)]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the patch tree
    Tree,
    /// Show a node's record
    Show { id: String },
    /// List a directory as seen by a node
    Ls {
        id: String,
        #[arg(default_value = "")]
        dir: String,
        #[arg(long)]
        recursive: bool,
        /// Include entries deleted along the chain
        #[arg(long)]
        deleted: bool,
    },
    /// Print a file as seen by a node
    Cat {
        id: String,
        path: String,
        /// Print the parent's content instead
        #[arg(long)]
        base: bool,
    },
    /// Write a file in a node, from stdin unless --from is given
    Write {
        id: String,
        path: String,
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Delete a file in a node
    Rm { id: String, path: String },
    /// Rename a file in a node
    Mv { id: String, from: String, to: String },
    /// Create a node under a parent
    New {
        parent: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Rename a node
    Rename { id: String, new: String },
    /// Delete a node, moving its children to its parent
    Delete {
        id: String,
        /// Delete even when the node still changes files
        #[arg(long)]
        force: bool,
    },
    /// Fold a node into its parent
    MergeUp { id: String },
    /// Move a node to sit directly below another node on its line
    Move { id: String, new_base: String },
    /// Show the changes a node makes
    Diff { id: String },
    /// Set a node's notes
    Note { id: String, text: String },
    /// Mark or unmark a node as draft
    Draft {
        id: String,
        #[arg(action = ArgAction::Set)]
        draft: bool,
    },
    /// Set a node's effective date
    EffectiveDate { id: String, date: NaiveDate },
    /// Set an annotation, or remove it when no value is given
    Annotate {
        id: String,
        key: String,
        value: Option<String>,
    },
    /// Print an unfinished restructuring, if any
    Journal,
}
