use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

/// Upper bound on how far `set` may pad an array with nulls.
const MAX_ARRAY_PADDING: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::Index(idx) => write!(f, "[{idx}]"),
        }
    }
}

/// A logical ledger address: a root key plus a sub-path navigated from the
/// root value, e.g. `leads[3]/status` or `/credits/a_b_com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPath {
    root: String,
    segments: Vec<Segment>,
}

impl LedgerPath {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut parts = Vec::new();
        for piece in raw.trim().split('/') {
            if piece.is_empty() {
                continue;
            }
            parse_piece(piece, &mut parts)
                .map_err(|err| anyhow::anyhow!("invalid ledger path {raw:?}: {err}"))?;
        }

        let mut parts = parts.into_iter();
        let root = match parts.next() {
            Some(Segment::Key(root)) => root,
            Some(Segment::Index(_)) => anyhow::bail!("ledger path must start with a key: {raw:?}"),
            None => anyhow::bail!("ledger path is empty"),
        };

        Ok(Self {
            root,
            segments: parts.collect(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FromStr for LedgerPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LedgerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => write!(f, "/{key}")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

fn parse_piece(piece: &str, out: &mut Vec<Segment>) -> anyhow::Result<()> {
    let (head, mut rest) = match piece.find('[') {
        Some(pos) => (&piece[..pos], &piece[pos..]),
        None => (piece, ""),
    };

    if !head.is_empty() {
        out.push(segment_for(head));
    }

    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            anyhow::bail!("unexpected text after index: {rest:?}");
        };
        let Some(end) = inner.find(']') else {
            anyhow::bail!("unterminated index in {piece:?}");
        };
        let idx = inner[..end]
            .trim()
            .parse::<usize>()
            .map_err(|_| anyhow::anyhow!("array index must be a non-negative integer: {piece:?}"))?;
        out.push(Segment::Index(idx));
        rest = &inner[end + 1..];
    }

    Ok(())
}

fn segment_for(raw: &str) -> Segment {
    if !raw.is_empty()
        && raw.bytes().all(|b| b.is_ascii_digit())
        && let Ok(idx) = raw.parse::<usize>()
    {
        return Segment::Index(idx);
    }
    Segment::Key(raw.to_owned())
}

pub fn get_in<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            // `leads/3` on an object keyed by "3".
            (Segment::Index(idx), Value::Object(map)) => map.get(&idx.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Deep-sets `new_value` at `segments`, creating intermediate objects or
/// arrays depending on the kind of the next segment. Values of the wrong
/// shape along the way are replaced.
pub fn set_in(target: &mut Value, segments: &[Segment], new_value: Value) -> anyhow::Result<()> {
    let mut current = target;
    for segment in segments {
        current = slot_mut(current, segment)?;
    }
    *current = new_value;
    Ok(())
}

/// Appends `item` to the array at `segments`. A missing target becomes a new
/// array; an existing non-array target is reset to an empty array first.
/// Returns `true` when such a lossy reset happened.
pub fn push_in(target: &mut Value, segments: &[Segment], item: Value) -> anyhow::Result<bool> {
    let mut current = target;
    for segment in segments {
        current = slot_mut(current, segment)?;
    }

    let coerced = !current.is_array() && !current.is_null();
    if !current.is_array() {
        *current = Value::Array(Vec::new());
    }
    if let Value::Array(items) = current {
        items.push(item);
    }
    Ok(coerced)
}

fn slot_mut<'a>(target: &'a mut Value, segment: &Segment) -> anyhow::Result<&'a mut Value> {
    match segment {
        Segment::Key(key) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            Ok(match target {
                Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                other => other,
            })
        }
        Segment::Index(idx) => {
            if target.is_object() {
                return Ok(match target {
                    Value::Object(map) => map.entry(idx.to_string()).or_insert(Value::Null),
                    other => other,
                });
            }
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            match target {
                Value::Array(items) => {
                    if *idx >= items.len() {
                        if *idx - items.len() > MAX_ARRAY_PADDING {
                            anyhow::bail!(
                                "array index {idx} is too far past the end (len {})",
                                items.len()
                            );
                        }
                        items.resize(idx + 1, Value::Null);
                    }
                    Ok(&mut items[*idx])
                }
                other => Ok(other),
            }
        }
    }
}
