use std::io::Read as _;

use snafu::prelude::*;
use tracing::info;

use crate::application::application::{
    ApplicationError, InputNotUtf8Snafu, InputSnafu, JournalSnafu, NotDeletedSnafu,
    StoreCommandSnafu, TreeMutationSnafu,
};
use crate::cli::{Command, render_diff, render_entries, render_node, render_tree};
use crate::content_store::ContentStore;
use crate::ext::BestEffortPathExt;
use crate::layout::layout;
use crate::management::{Journal, TreeMutation};
use crate::patches::{DeleteOutcome, Node, PatchStore, StoreError, WriteGuard};

async fn load<S: ContentStore>(store: &PatchStore<S>, id: &str) -> Result<Node, ApplicationError> {
    store.load(id).await.context(StoreCommandSnafu {
        action: format!("load '{id}'"),
    })
}

fn failed(action: impl Into<String>) -> impl FnOnce(StoreError) -> ApplicationError {
    let action = action.into();
    move |source| ApplicationError::StoreCommandError { action, source }
}

impl Command {
    pub async fn execute<S: ContentStore>(
        self,
        store: &PatchStore<S>,
    ) -> Result<(), ApplicationError> {
        match self {
            Command::Tree => {
                let nodes = store.all_nodes().await.map_err(failed("list nodes"))?;
                let root = store.root().await.map_err(failed("find the root"))?;
                print!("{}", render_tree(&layout(&nodes, &root)));
            }
            Command::Show { id } => {
                let node = load(store, &id).await?;
                print!("{}", render_node(&node));
            }
            Command::Ls {
                id,
                dir,
                recursive,
                deleted,
            } => {
                let node = load(store, &id).await?;
                let entries = store
                    .get_paths(&node, &dir, recursive, deleted)
                    .await
                    .map_err(failed(format!("list '{dir}' in '{id}'")))?;
                print!("{}", render_entries(&entries));
            }
            Command::Cat { id, path, base } => {
                let node = load(store, &id).await?;
                let content = store
                    .get_path_content(&node, &path, base)
                    .await
                    .map_err(failed(format!("read '{path}' in '{id}'")))?;
                let text = if base {
                    content.base.unwrap_or_default()
                } else {
                    content.current
                };
                print!("{}", text);
            }
            Command::Write { id, path, from } => {
                let content = match from {
                    Some(file) => {
                        let from = file.best_effort_path_display();
                        let bytes = compio::fs::read(&file)
                            .await
                            .context(InputSnafu { from: &from })?;
                        String::from_utf8(bytes).context(InputNotUtf8Snafu { from })?
                    }
                    None => {
                        let mut content = String::new();
                        std::io::stdin()
                            .read_to_string(&mut content)
                            .context(InputSnafu { from: "stdin" })?;
                        content
                    }
                };
                let node = load(store, &id).await?;
                store
                    .write_path_content(&node, &path, &content, WriteGuard::Checked)
                    .await
                    .map_err(failed(format!("write '{path}' in '{id}'")))?;
                info!("Wrote {} chars to '{}' in '{}'", content.chars().count(), path, id);
            }
            Command::Rm { id, path } => {
                let node = load(store, &id).await?;
                store
                    .write_path_content(&node, &path, "", WriteGuard::Checked)
                    .await
                    .map_err(failed(format!("delete '{path}' in '{id}'")))?;
            }
            Command::Mv { id, from, to } => {
                let node = load(store, &id).await?;
                store
                    .rename_path(&node, &from, &to)
                    .await
                    .map_err(failed(format!("rename '{from}' to '{to}' in '{id}'")))?;
            }
            Command::New { parent, name } => {
                let parent = load(store, &parent).await?;
                let child = store
                    .create_child(&parent, name.as_deref())
                    .await
                    .map_err(failed(format!("create a node under '{}'", parent.id)))?;
                println!("{}", child.id);
            }
            Command::Rename { id, new } => {
                let node = load(store, &id).await?;
                store
                    .rename(&node, &new)
                    .await
                    .map_err(failed(format!("rename '{id}' to '{new}'")))?;
            }
            Command::Delete { id, force } => {
                let node = load(store, &id).await?;
                let outcome = store
                    .delete(&node, force)
                    .await
                    .map_err(failed(format!("delete '{id}'")))?;
                if let DeleteOutcome::Modified { paths } = outcome {
                    return NotDeletedSnafu { id, paths }.fail();
                }
            }
            Command::MergeUp { id } => {
                let node = load(store, &id).await?;
                let parent = TreeMutation::new(store)
                    .merge_up(&node)
                    .await
                    .context(TreeMutationSnafu)?;
                println!("Merged '{}' into '{}'", id, parent.id);
            }
            Command::Move { id, new_base } => {
                let node = load(store, &id).await?;
                let new_base = load(store, &new_base).await?;
                TreeMutation::new(store)
                    .move_to(&node, &new_base)
                    .await
                    .context(TreeMutationSnafu)?;
                println!("Moved '{}' below '{}'", id, new_base.id);
            }
            Command::Diff { id } => {
                let node = load(store, &id).await?;
                let diffs = store
                    .get_diff(&node)
                    .await
                    .map_err(failed(format!("diff '{id}'")))?;
                print!("{}", render_diff(&diffs));
            }
            Command::Note { id, text } => {
                let node = load(store, &id).await?;
                store
                    .set_notes(&node, &text)
                    .await
                    .map_err(failed(format!("update the notes of '{id}'")))?;
            }
            Command::Draft { id, draft } => {
                let node = load(store, &id).await?;
                store
                    .set_draft(&node, draft)
                    .await
                    .map_err(failed(format!("update the draft flag of '{id}'")))?;
            }
            Command::EffectiveDate { id, date } => {
                let node = load(store, &id).await?;
                store
                    .set_effective_date(&node, Some(date))
                    .await
                    .map_err(failed(format!("update the effective date of '{id}'")))?;
            }
            Command::Annotate { id, key, value } => {
                let node = load(store, &id).await?;
                store
                    .set_annotation(&node, &key, value.as_deref())
                    .await
                    .map_err(failed(format!("annotate '{id}'")))?;
            }
            Command::Journal => match Journal::new(store.workspace())
                .read()
                .await
                .context(JournalSnafu)?
            {
                Some(entry) => print!("{}", entry),
                None => println!("No unfinished restructuring"),
            },
        }
        Ok(())
    }
}
