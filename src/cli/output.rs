use std::fmt::Write as _;

use colored::Colorize;
use supports_color::Stream;

use crate::content_store::EntryKind;
use crate::layout::LayoutEntry;
use crate::patches::{DiffTag, FileDiff, Node, NodeView, PathEntry};

/// Colors output only when stdout can show them.
pub fn init_color() {
    colored::control::set_override(supports_color::on(Stream::Stdout).is_some());
}

pub fn render_tree(entries: &[LayoutEntry<'_>]) -> String {
    let mut out = String::new();
    for entry in entries {
        let view = NodeView::from(entry.node);
        let marker = if entry.is_mainline { "*" } else { "+" };
        let name = if entry.is_mainline {
            view.title.bold()
        } else {
            view.title.normal()
        };
        let _ = write!(out, "{}{} {}", "  ".repeat(entry.indent), marker, name);
        if entry.node.is_root() {
            let _ = write!(out, " {}", "(root)".dimmed());
        }
        if view.draft {
            let _ = write!(out, " {}", "(draft)".yellow());
        }
        out.push('\n');
    }
    out
}

pub fn render_node(node: &Node) -> String {
    let view = NodeView::from(node);
    let mut out = String::new();
    let _ = writeln!(out, "{}", view.title.bold());
    let _ = writeln!(out, "  identity:  {}", view.identity);
    let _ = writeln!(out, "  kind:      {:?}", view.kind);
    let _ = writeln!(out, "  address:   {}", view.address);
    let _ = writeln!(out, "  created:   {}", view.created_formatted);
    let _ = writeln!(out, "  children:  {}", view.child_count);
    let _ = writeln!(out, "  modifiable: {}", view.can_modify);
    if let Some(commit) = &node.base_commit {
        let _ = writeln!(out, "  base:      {}", commit);
    }
    if view.draft {
        let _ = writeln!(out, "  {}", "draft".yellow());
    }
    if let Some(date) = node.metadata.effective_date {
        let _ = writeln!(out, "  effective: {}", date);
    }
    for (key, value) in &node.metadata.annotations {
        let _ = writeln!(out, "  {}: {}", key, value);
    }
    if !node.changes.is_empty() {
        let _ = writeln!(out, "  changes:");
        for path in node.changes.keys() {
            let _ = writeln!(out, "    {}", path);
        }
    }
    if !node.metadata.notes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", node.metadata.notes);
    }
    out
}

pub fn render_entries(entries: &[PathEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let name = match entry.kind {
            EntryKind::Tree => format!("{}/", entry.name).blue(),
            EntryKind::Blob => entry.name.normal(),
        };
        if entry.deleted {
            let _ = writeln!(out, "{} {}", name.strikethrough(), "(deleted)".red());
        } else {
            let _ = writeln!(out, "{}", name);
        }
    }
    out
}

pub fn render_diff(diffs: &[FileDiff]) -> String {
    let mut out = String::new();
    for diff in diffs {
        let _ = writeln!(out, "{}", format!("=== {}", diff.path).bold());
        for hunk in &diff.hunks {
            for line in hunk.text.lines() {
                let line = format!("{}{}", hunk.tag, line);
                let line = match hunk.tag {
                    DiffTag::Added => line.green(),
                    DiffTag::Removed => line.red(),
                    DiffTag::Unchanged => line.normal(),
                    DiffTag::Ellipsis => line.dimmed(),
                };
                let _ = writeln!(out, "{}", line);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::layout;
    use crate::patches::DiffHunk;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn tree_lines_are_indented_and_marked() {
        plain();
        let mut root = Node::new_root("root", "base");
        let mut main = Node::new_child("Main", root.identity);
        let side = Node::new_child("Side", root.identity);
        let tail = Node::new_child("Tail", main.identity);
        main.children.push(tail.identity);
        root.children = vec![main.identity, side.identity];
        let nodes = vec![root.clone(), main, side, tail];

        let rendered = render_tree(&layout(&nodes, &root));
        assert_eq!(rendered, "* root (root)\n  + Side\n* Main\n* Tail\n");
    }

    #[test]
    fn deleted_entries_are_flagged() {
        plain();
        let entries = vec![
            PathEntry {
                name: "docs".into(),
                kind: EntryKind::Tree,
                deleted: false,
            },
            PathEntry {
                name: "old.txt".into(),
                kind: EntryKind::Blob,
                deleted: true,
            },
        ];
        assert_eq!(render_entries(&entries), "docs/\nold.txt (deleted)\n");
    }

    #[test]
    fn diff_lines_carry_their_tag() {
        plain();
        let diffs = vec![FileDiff {
            path: "a.txt".into(),
            hunks: vec![
                DiffHunk {
                    tag: DiffTag::Unchanged,
                    text: "same\n".into(),
                },
                DiffHunk {
                    tag: DiffTag::Removed,
                    text: "old\n".into(),
                },
                DiffHunk {
                    tag: DiffTag::Added,
                    text: "new\nnewer\n".into(),
                },
            ],
        }];
        assert_eq!(
            render_diff(&diffs),
            "=== a.txt\n same\n-old\n+new\n+newer\n"
        );
    }

    #[test]
    fn node_record_lists_changes_and_notes() {
        plain();
        let mut node = Node::new_child("P1", Node::new_root("root", "base").identity);
        node.changes
            .insert("a.txt".into(), crate::patches::Change::Delete);
        node.metadata.notes = "why this exists".into();
        let rendered = render_node(&node);
        assert!(rendered.starts_with("P1\n"));
        assert!(rendered.contains("address:   /patch/P1"));
        assert!(rendered.contains("    a.txt\n"));
        assert!(rendered.ends_with("\nwhy this exists\n"));
    }
}
