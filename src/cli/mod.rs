mod cli;
mod output;

pub use cli::{Cli, Command};
pub use output::{init_color, render_diff, render_entries, render_node, render_tree};
