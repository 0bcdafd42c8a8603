use similar::{ChangeTag, TextDiff};

use crate::operations::operation::{Component, Operation, char_len};

/// Token size used when turning two texts into an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, derive_more::Display)]
pub enum DiffGranularity {
    #[default]
    #[display("words")]
    Words,
    #[display("chars")]
    Chars,
    #[display("lines")]
    Lines,
}

impl DiffGranularity {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "words" => Some(DiffGranularity::Words),
            "chars" => Some(DiffGranularity::Chars),
            "lines" => Some(DiffGranularity::Lines),
            _ => None,
        }
    }
}

/// Computes the operation turning `base` into `new`.
///
/// The result is deterministic and `diff_to_operation(t, t)` is the identity.
pub fn diff_to_operation(base: &str, new: &str, granularity: DiffGranularity) -> Operation {
    let diff = match granularity {
        DiffGranularity::Words => TextDiff::from_words(base, new),
        DiffGranularity::Chars => TextDiff::from_chars(base, new),
        DiffGranularity::Lines => TextDiff::from_lines(base, new),
    };

    Operation::from_components(diff.iter_all_changes().map(|change| {
        let value = change.value();
        match change.tag() {
            ChangeTag::Equal => Component::Retain(char_len(value)),
            ChangeTag::Delete => Component::Delete(value.to_string()),
            ChangeTag::Insert => Component::Insert(value.to_string()),
        }
    }))
}
