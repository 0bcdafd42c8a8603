use similar::{ChangeTag, TextDiff};

use crate::content_store::ContentStore;
use crate::patches::node::Node;
use crate::patches::store::{PatchStore, StoreError};

pub const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum DiffTag {
    #[display("+")]
    Added,
    #[display("-")]
    Removed,
    #[display(" ")]
    Unchanged,
    #[display("~")]
    Ellipsis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub tag: DiffTag,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub hunks: Vec<DiffHunk>,
}

/// Line diff of `base` against `current`. Unchanged runs longer than twice `context` keep only
/// `context` lines on each side of an ellipsis.
pub fn line_diff(base: &str, current: &str, context: usize) -> Vec<DiffHunk> {
    let diff = TextDiff::from_lines(base, current);

    let mut runs: Vec<(ChangeTag, Vec<&str>)> = Vec::new();
    for change in diff.iter_all_changes() {
        match runs.last_mut() {
            Some((tag, lines)) if *tag == change.tag() => lines.push(change.value()),
            _ => runs.push((change.tag(), vec![change.value()])),
        }
    }

    let mut hunks = Vec::new();
    for (tag, lines) in runs {
        match tag {
            ChangeTag::Insert => hunks.push(DiffHunk {
                tag: DiffTag::Added,
                text: lines.concat(),
            }),
            ChangeTag::Delete => hunks.push(DiffHunk {
                tag: DiffTag::Removed,
                text: lines.concat(),
            }),
            ChangeTag::Equal if lines.len() > 2 * context + 1 => {
                let head = lines[..context].concat();
                let tail = lines[lines.len() - context..].concat();
                if !head.is_empty() {
                    hunks.push(DiffHunk {
                        tag: DiffTag::Unchanged,
                        text: head,
                    });
                }
                hunks.push(DiffHunk {
                    tag: DiffTag::Ellipsis,
                    text: ELLIPSIS.to_string(),
                });
                if !tail.is_empty() {
                    hunks.push(DiffHunk {
                        tag: DiffTag::Unchanged,
                        text: tail,
                    });
                }
            }
            ChangeTag::Equal => hunks.push(DiffHunk {
                tag: DiffTag::Unchanged,
                text: lines.concat(),
            }),
        }
    }
    hunks
}

impl<S: ContentStore> PatchStore<S> {
    /// Human readable diff of every path `node` changes.
    pub async fn get_diff(&self, node: &Node) -> Result<Vec<FileDiff>, StoreError> {
        let mut diffs = Vec::new();
        if node.is_root() {
            return Ok(diffs);
        }

        for path in node.changes.keys() {
            let content = self.get_path_content(node, path, true).await?;
            let base = content.base.unwrap_or_default();
            diffs.push(FileDiff {
                path: path.clone(),
                hunks: line_diff(&base, &content.current, self.settings.diff_context),
            });
        }
        Ok(diffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patches::WriteGuard;
    use crate::patches::store::test_support::fixture;

    fn tags(hunks: &[DiffHunk]) -> Vec<DiffTag> {
        hunks.iter().map(|hunk| hunk.tag).collect()
    }

    #[test]
    fn long_unchanged_runs_collapse() {
        let hunks = line_diff("a\nb\nc\nd\ne\n", "a\nb\nc\nd\nE\n", 1);
        assert_eq!(
            tags(&hunks),
            vec![
                DiffTag::Unchanged,
                DiffTag::Ellipsis,
                DiffTag::Unchanged,
                DiffTag::Removed,
                DiffTag::Added
            ]
        );
        assert_eq!(hunks[0].text, "a\n");
        assert_eq!(hunks[2].text, "d\n");
        assert_eq!(hunks[4].text, "E\n");
    }

    #[test]
    fn short_unchanged_runs_stay() {
        let hunks = line_diff("a\nb\nc\n", "a\nB\nc\n", 1);
        assert_eq!(
            tags(&hunks),
            vec![
                DiffTag::Unchanged,
                DiffTag::Removed,
                DiffTag::Added,
                DiffTag::Unchanged
            ]
        );
    }

    #[test]
    fn zero_context_leaves_only_the_marker() {
        let hunks = line_diff("a\nb\nc\n", "a\nb\nc\nd\n", 0);
        assert_eq!(tags(&hunks), vec![DiffTag::Ellipsis, DiffTag::Added]);
        assert_eq!(hunks[0].text, ELLIPSIS);
    }

    #[compio::test]
    async fn diff_lists_every_changed_path() {
        let f = fixture(&[("a.txt", "one\ntwo\n")]).await;
        let root = f.store.root().await.unwrap();
        let node = f.store.create_child(&root, None).await.unwrap();
        f.store
            .write_path_content(&node, "a.txt", "one\n2\n", WriteGuard::Checked)
            .await
            .unwrap();
        let node = f
            .store
            .write_path_content(&node, "b.txt", "new\n", WriteGuard::Checked)
            .await
            .unwrap();

        let diffs = f.store.get_diff(&node).await.unwrap();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, "a.txt");
        assert_eq!(
            tags(&diffs[0].hunks),
            vec![DiffTag::Unchanged, DiffTag::Removed, DiffTag::Added]
        );
        assert_eq!(diffs[1].hunks, vec![DiffHunk {
            tag: DiffTag::Added,
            text: "new\n".into()
        }]);
    }
}
