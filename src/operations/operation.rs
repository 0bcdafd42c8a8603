use bincode::{Decode, Encode};
use snafu::Snafu;

use Component::*;

/// A single step of a traversal over a text.
///
/// Lengths are counted in unicode scalar values, never bytes.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Component {
    Retain(usize),
    Delete(String),
    Insert(String),
}

impl Component {
    /// Length of the component in the text the operation is applied to.
    pub fn pre_len(&self) -> usize {
        match self {
            Retain(n) => *n,
            Delete(text) => char_len(text),
            Insert(_) => 0,
        }
    }

    /// Length of the component in the text the operation produces.
    pub fn post_len(&self) -> usize {
        match self {
            Retain(n) => *n,
            Delete(_) => 0,
            Insert(text) => char_len(text),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Retain(n) => *n == 0,
            Delete(text) | Insert(text) => text.is_empty(),
        }
    }
}

/// A transformation of one file's content.
///
/// Operations always traverse the whole input text, so the expected input length is known and a
/// stale operation is detected instead of silently producing garbage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Operation {
    components: Vec<Component>,
}

impl Operation {
    /// Builds a normalized operation. Adjacent components of the same kind are merged, empty
    /// components are dropped and inside every replaced region the delete comes first.
    pub fn from_components(components: impl IntoIterator<Item = Component>) -> Self {
        let mut normalized: Vec<Component> = Vec::new();
        let mut deleted = String::new();
        let mut inserted = String::new();

        for component in components.into_iter().filter(|c| !c.is_empty()) {
            match component {
                Delete(text) => deleted.push_str(&text),
                Insert(text) => inserted.push_str(&text),
                Retain(n) => {
                    flush_replacement(&mut normalized, &mut deleted, &mut inserted);
                    match normalized.last_mut() {
                        Some(Retain(prev)) => *prev += n,
                        _ => normalized.push(Retain(n)),
                    }
                }
            }
        }
        flush_replacement(&mut normalized, &mut deleted, &mut inserted);

        Operation {
            components: normalized,
        }
    }

    /// The operation which leaves a text of `len` characters untouched.
    pub fn identity(len: usize) -> Self {
        Self::from_components([Retain(len)])
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn base_len(&self) -> usize {
        self.components.iter().map(Component::pre_len).sum()
    }

    pub fn target_len(&self) -> usize {
        self.components.iter().map(Component::post_len).sum()
    }

    pub fn is_identity(&self) -> bool {
        self.components.iter().all(|c| matches!(c, Retain(_)))
    }

    /// Applies the operation to `text`.
    pub fn apply(&self, text: &str) -> Result<String, OperationError> {
        let actual = char_len(text);
        let expected = self.base_len();
        if actual != expected {
            return Err(OperationError::LengthMismatch { expected, actual });
        }

        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        let mut position = 0;

        for component in &self.components {
            match component {
                Retain(n) => {
                    let (head, tail) = split_chars(rest, *n);
                    result.push_str(head);
                    rest = tail;
                    position += n;
                }
                Delete(deleted) => {
                    let n = char_len(deleted);
                    let (head, tail) = split_chars(rest, n);
                    if head != deleted {
                        return Err(OperationError::ContentMismatch { position });
                    }
                    rest = tail;
                    position += n;
                }
                Insert(inserted) => result.push_str(inserted),
            }
        }

        Ok(result)
    }

    /// Returns the operation undoing this one: `invert(op).apply(op.apply(t)) == t`.
    pub fn invert(&self) -> Operation {
        Operation::from_components(self.components.iter().map(|c| match c {
            Retain(n) => Retain(*n),
            Delete(text) => Insert(text.clone()),
            Insert(text) => Delete(text.clone()),
        }))
    }

    /// Composes `self` followed by `next` into a single operation.
    pub fn compose(&self, next: &Operation) -> Result<Operation, OperationError> {
        if self.target_len() != next.base_len() {
            return Err(OperationError::LengthMismatch {
                expected: next.base_len(),
                actual: self.target_len(),
            });
        }

        let mut first = self.components.iter().cloned();
        let mut second = next.components.iter().cloned();
        let mut a = first.next();
        let mut b = second.next();
        let mut result = Vec::new();
        let mut position = 0;

        loop {
            match (a.take(), b.take()) {
                (None, None) => break,
                (Some(Delete(text)), other) => {
                    result.push(Delete(text));
                    a = first.next();
                    b = other;
                }
                (other, Some(Insert(text))) => {
                    position += char_len(&text);
                    result.push(Insert(text));
                    a = other;
                    b = second.next();
                }
                (Some(Retain(n)), Some(Retain(m))) => {
                    let k = n.min(m);
                    result.push(Retain(k));
                    position += k;
                    a = remainder_retain(n, k).or_else(|| first.next());
                    b = remainder_retain(m, k).or_else(|| second.next());
                }
                (Some(Insert(text)), Some(Delete(deleted))) => {
                    let k = char_len(&text).min(char_len(&deleted));
                    let (inserted_head, inserted_tail) = split_chars(&text, k);
                    let (deleted_head, deleted_tail) = split_chars(&deleted, k);
                    if inserted_head != deleted_head {
                        return Err(OperationError::ContentMismatch { position });
                    }
                    a = remainder_text(inserted_tail, Insert).or_else(|| first.next());
                    b = remainder_text(deleted_tail, Delete).or_else(|| second.next());
                }
                (Some(Insert(text)), Some(Retain(m))) => {
                    let k = char_len(&text).min(m);
                    let (head, tail) = split_chars(&text, k);
                    result.push(Insert(head.to_string()));
                    position += k;
                    a = remainder_text(tail, Insert).or_else(|| first.next());
                    b = remainder_retain(m, k).or_else(|| second.next());
                }
                (Some(Retain(n)), Some(Delete(deleted))) => {
                    let k = n.min(char_len(&deleted));
                    let (head, tail) = split_chars(&deleted, k);
                    result.push(Delete(head.to_string()));
                    a = remainder_retain(n, k).or_else(|| first.next());
                    b = remainder_text(tail, Delete).or_else(|| second.next());
                }
                (None, Some(_)) | (Some(_), None) => {
                    // Lengths were checked up front, so only a malformed operation gets here.
                    return Err(OperationError::LengthMismatch {
                        expected: next.base_len(),
                        actual: self.target_len(),
                    });
                }
            }
        }

        Ok(Operation::from_components(result))
    }

    /// Whether both operations make the same change. Text a region deletes and inserts again is
    /// treated as retained, so `Delete("ab"), Insert("ab")` matches `Retain(2)`.
    pub fn same_effect(&self, other: &Operation) -> bool {
        self.trimmed() == other.trimmed()
    }

    /// Shrinks every replaced region by the prefix and suffix it deletes and inserts unchanged.
    fn trimmed(&self) -> Operation {
        let mut components = Vec::with_capacity(self.components.len());
        let mut start = 0;
        for hunk in self.hunks() {
            let prefix = common_prefix(&hunk.old, &hunk.new);
            let (_, old) = split_chars(&hunk.old, prefix);
            let (_, new) = split_chars(&hunk.new, prefix);
            let suffix = common_suffix(old, new);
            let (old, _) = split_chars(old, char_len(old) - suffix);
            let (new, _) = split_chars(new, char_len(new) - suffix);

            components.push(Retain(hunk.start - start + prefix));
            components.push(Delete(old.to_string()));
            components.push(Insert(new.to_string()));
            components.push(Retain(suffix));
            start = hunk.end();
        }
        components.push(Retain(self.base_len() - start));
        Operation::from_components(components)
    }

    /// The maximal replaced regions of the operation, in input coordinates.
    pub fn hunks(&self) -> Vec<Hunk> {
        let mut hunks = Vec::new();
        let mut position = 0;
        let mut current: Option<Hunk> = None;

        for component in &self.components {
            match component {
                Retain(n) => {
                    hunks.extend(current.take());
                    position += n;
                }
                Delete(text) => {
                    let hunk = current.get_or_insert_with(|| Hunk::empty_at(position));
                    hunk.old.push_str(text);
                    position += char_len(text);
                }
                Insert(text) => {
                    let hunk = current.get_or_insert_with(|| Hunk::empty_at(position));
                    hunk.new.push_str(text);
                }
            }
        }
        hunks.extend(current);

        hunks
    }

    /// Rebuilds an operation over a text of `base_len` characters from sorted, disjoint hunks.
    pub fn from_hunks(base_len: usize, hunks: &[Hunk]) -> Result<Operation, OperationError> {
        let mut components = Vec::with_capacity(hunks.len() * 3 + 1);
        let mut position = 0;

        for hunk in hunks {
            if hunk.start < position || hunk.end() > base_len {
                return Err(OperationError::LengthMismatch {
                    expected: base_len,
                    actual: hunk.end().max(position),
                });
            }
            components.push(Retain(hunk.start - position));
            components.push(Delete(hunk.old.clone()));
            components.push(Insert(hunk.new.clone()));
            position = hunk.end();
        }
        components.push(Retain(base_len - position));

        Ok(Operation::from_components(components))
    }
}

/// A replaced region of the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub start: usize,
    pub old: String,
    pub new: String,
}

impl Hunk {
    fn empty_at(start: usize) -> Self {
        Hunk {
            start,
            old: String::new(),
            new: String::new(),
        }
    }

    pub fn end(&self) -> usize {
        self.start + char_len(&self.old)
    }

    /// Length change this hunk causes in the text.
    pub fn delta(&self) -> isize {
        char_len(&self.new) as isize - char_len(&self.old) as isize
    }

    pub fn is_insertion(&self) -> bool {
        self.old.is_empty()
    }
}

fn flush_replacement(out: &mut Vec<Component>, deleted: &mut String, inserted: &mut String) {
    if !deleted.is_empty() {
        out.push(Delete(std::mem::take(deleted)));
    }
    if !inserted.is_empty() {
        out.push(Insert(std::mem::take(inserted)));
    }
}

fn remainder_retain(n: usize, taken: usize) -> Option<Component> {
    (n > taken).then(|| Retain(n - taken))
}

fn remainder_text(rest: &str, kind: fn(String) -> Component) -> Option<Component> {
    (!rest.is_empty()).then(|| kind(rest.to_string()))
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits `text` after `n` characters. Panics never; a short text is returned whole.
pub fn split_chars(text: &str, n: usize) -> (&str, &str) {
    match text.char_indices().nth(n) {
        Some((byte_offset, _)) => text.split_at(byte_offset),
        None => (text, ""),
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum OperationError {
    #[snafu(display(
        "Operation expects a text of {} characters but got {}",
        expected,
        actual
    ))]
    LengthMismatch { expected: usize, actual: usize },
    #[snafu(display("Operation does not match the text at character {}", position))]
    ContentMismatch { position: usize },
    #[snafu(display("Edits conflict at character {}", position))]
    Conflict { position: usize },
}
