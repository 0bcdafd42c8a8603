use std::collections::{HashMap, HashSet};

use crate::patches::{Identity, Node};

/// One line of the tree display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEntry<'a> {
    pub node: &'a Node,
    pub indent: usize,
    pub is_mainline: bool,
}

/// Orders the tree under `root` for display.
///
/// At every branch the child with the deepest subtree continues the current line; the other
/// children follow their parent as indented side branches, in children order. Children missing
/// from `nodes` are skipped.
pub fn layout<'a>(nodes: &'a [Node], root: &'a Node) -> Vec<LayoutEntry<'a>> {
    let by_identity: HashMap<Identity, &Node> = nodes
        .iter()
        .chain([root])
        .map(|node| (node.identity, node))
        .collect();
    let heights = subtree_heights(&by_identity, root);

    let children_of = |node: &Node| -> Vec<&'a Node> {
        node.children
            .iter()
            .filter_map(|child| by_identity.get(child).copied())
            .filter(|child| heights.contains_key(&child.identity))
            .collect()
    };

    let mut entries = Vec::new();
    let mut visited = HashSet::new();
    let mut pending = vec![(root, 0, true)];

    while let Some((node, indent, is_mainline)) = pending.pop() {
        if !visited.insert(node.identity) {
            continue;
        }
        entries.push(LayoutEntry {
            node,
            indent,
            is_mainline,
        });

        let children = children_of(node);
        let Some(main) = mainline_child(&children, &heights) else {
            continue;
        };

        pending.push((children[main], indent, is_mainline));
        for (index, side) in children.iter().enumerate().rev() {
            if index != main {
                pending.push((side, indent + 1, false));
            }
        }
    }

    entries
}

/// First child with the greatest height.
fn mainline_child(children: &[&Node], heights: &HashMap<Identity, usize>) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (index, child) in children.iter().enumerate() {
        let height = heights.get(&child.identity).copied().unwrap_or(0);
        if best.is_none_or(|(_, best_height)| height > best_height) {
            best = Some((index, height));
        }
    }
    best.map(|(index, _)| index)
}

/// Height of every subtree reachable from `root`, computed bottom-up without recursion.
fn subtree_heights(by_identity: &HashMap<Identity, &Node>, root: &Node) -> HashMap<Identity, usize> {
    let mut heights = HashMap::new();
    let mut seen = HashSet::new();
    let mut pending = vec![(root.identity, false)];

    while let Some((identity, expanded)) = pending.pop() {
        let Some(node) = by_identity.get(&identity) else {
            continue;
        };

        if expanded {
            let height = 1 + node
                .children
                .iter()
                .filter_map(|child| heights.get(child))
                .max()
                .copied()
                .unwrap_or(0);
            heights.insert(identity, height);
        } else if seen.insert(identity) {
            pending.push((identity, true));
            pending.extend(node.children.iter().map(|child| (*child, false)));
        }
    }

    heights
}
