//! Path expressions over `serde_json::Value` documents.
//!
//! Supports the small dialect the route hooks need:
//!
//! | Syntax            | Meaning                                       |
//! |-------------------|-----------------------------------------------|
//! | `$`               | document root                                 |
//! | `.key`, `['key']` | object member                                 |
//! | `[3]`             | array element                                 |
//! | `[*]`, `.*`       | every array element / every object value      |
//! | `..key`           | `key` at any depth, current node included     |
//!
//! Evaluation never copies the document. It yields [`Location`]s, which
//! address a node by key/index steps and are resolved against the document
//! on each access, so a write through one location is seen by every other
//! location and by the owner of the document.

use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, TenancyError};

/// One parsed component of a path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Child(String),
    Index(usize),
    Wildcard,
    Descendant(String),
}

/// A compiled path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    segments: Vec<Segment>,
}

impl PathExpr {
    /// Compile a path expression.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| TenancyError::InvalidPath {
            path: path.to_owned(),
            reason: reason.to_owned(),
        };

        let rest = path
            .strip_prefix('$')
            .ok_or_else(|| invalid("must start with '$'"))?;
        let bytes = rest.as_bytes();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'.' if bytes.get(i + 1) == Some(&b'.') => {
                    let (key, next) = read_ident(rest, i + 2);
                    if key.is_empty() {
                        return Err(invalid("'..' must be followed by a key"));
                    }
                    segments.push(Segment::Descendant(key.to_owned()));
                    i = next;
                }
                b'.' => {
                    if bytes.get(i + 1) == Some(&b'*') {
                        segments.push(Segment::Wildcard);
                        i += 2;
                        continue;
                    }
                    let (key, next) = read_ident(rest, i + 1);
                    if key.is_empty() {
                        return Err(invalid("'.' must be followed by a key"));
                    }
                    segments.push(Segment::Child(key.to_owned()));
                    i = next;
                }
                b'[' => {
                    let close = rest[i..]
                        .find(']')
                        .map(|off| i + off)
                        .ok_or_else(|| invalid("unclosed '['"))?;
                    let inner = &rest[i + 1..close];
                    let segment = if inner == "*" {
                        Segment::Wildcard
                    } else if let Some(quoted) = inner
                        .strip_prefix('\'')
                        .and_then(|s| s.strip_suffix('\''))
                    {
                        Segment::Child(quoted.to_owned())
                    } else {
                        let index = inner
                            .parse::<usize>()
                            .map_err(|_| invalid("bracket must hold '*', an index or a quoted key"))?;
                        Segment::Index(index)
                    };
                    segments.push(segment);
                    i = close + 1;
                }
                _ => return Err(invalid("unexpected character")),
            }
        }

        Ok(Self {
            source: path.to_owned(),
            segments,
        })
    }

    /// The expression as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Every location in `doc` matched by this expression, in document order.
    pub fn find(&self, doc: &Value) -> Vec<Location> {
        let mut current = vec![(Location::root(), doc)];

        for segment in &self.segments {
            let mut next = Vec::with_capacity(current.len());
            for (location, node) in current {
                match segment {
                    Segment::Child(key) => {
                        if let Some(child) = node.get(key.as_str()) {
                            next.push((location.key(key), child));
                        }
                    }
                    Segment::Index(index) => {
                        if let Some(child) = node.get(*index) {
                            next.push((location.index(*index), child));
                        }
                    }
                    Segment::Wildcard => push_children(&location, node, &mut next),
                    Segment::Descendant(key) => collect_descendants(location, node, key, &mut next),
                }
            }
            current = next;
        }

        debug!(path = %self.source, matches = current.len(), "Evaluated path expression");
        current.into_iter().map(|(location, _)| location).collect()
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compile and evaluate in one step.
pub fn find(doc: &Value, path: &str) -> Result<Vec<Location>> {
    Ok(PathExpr::parse(path)?.find(doc))
}

fn read_ident(s: &str, start: usize) -> (&str, usize) {
    let end = s[start..]
        .find(&['.', '['][..])
        .map(|off| start + off)
        .unwrap_or(s.len());
    (&s[start..end], end)
}

fn push_children<'v>(location: &Location, node: &'v Value, out: &mut Vec<(Location, &'v Value)>) {
    match node {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                out.push((location.index(index), item));
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                out.push((location.key(key), value));
            }
        }
        _ => {}
    }
}

fn collect_descendants<'v>(
    location: Location,
    node: &'v Value,
    key: &str,
    out: &mut Vec<(Location, &'v Value)>,
) {
    if let Some(child) = node.as_object().and_then(|map| map.get(key)) {
        out.push((location.key(key), child));
    }
    let mut children = Vec::new();
    push_children(&location, node, &mut children);
    for (child_location, child) in children {
        collect_descendants(child_location, child, key, out);
    }
}

/// One step from a node to its child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// Address of a node inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Location {
    steps: Vec<Step>,
}

impl Location {
    /// The document root.
    pub fn root() -> Self {
        Self::default()
    }

    fn key(&self, key: &str) -> Self {
        let mut steps = self.steps.clone();
        steps.push(Step::Key(key.to_owned()));
        Self { steps }
    }

    fn index(&self, index: usize) -> Self {
        let mut steps = self.steps.clone();
        steps.push(Step::Index(index));
        Self { steps }
    }

    /// `relative`, found by evaluating against the node at `self`, as a
    /// location in the enclosing document.
    pub fn join(&self, relative: &Location) -> Self {
        let mut steps = self.steps.clone();
        steps.extend(relative.steps.iter().cloned());
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The enclosing node, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.steps.split_last()?;
        Some(Self {
            steps: init.to_vec(),
        })
    }

    /// Resolve against `doc`.
    pub fn get<'v>(&self, doc: &'v Value) -> Option<&'v Value> {
        self.steps.iter().try_fold(doc, |node, step| match step {
            Step::Key(key) => node.get(key.as_str()),
            Step::Index(index) => node.get(*index),
        })
    }

    /// Resolve mutably against `doc`.
    pub fn get_mut<'v>(&self, doc: &'v mut Value) -> Option<&'v mut Value> {
        self.steps.iter().try_fold(doc, |node, step| match step {
            Step::Key(key) => node.get_mut(key.as_str()),
            Step::Index(index) => node.get_mut(*index),
        })
    }

    /// Replace the addressed value. Returns false if the location no longer
    /// resolves.
    pub fn set(&self, doc: &mut Value, value: Value) -> bool {
        match self.get_mut(doc) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Renders as an RFC 6901 JSON pointer.
impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            match step {
                Step::Key(key) => write!(f, "/{}", key.replace('~', "~0").replace('/', "~1"))?,
                Step::Index(index) => write!(f, "/{}", index)?,
            }
        }
        Ok(())
    }
}
