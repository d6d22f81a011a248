//! String codec used when a payload cannot cross the transport natively.
//!
//! The encoding is JSON text in which repeated subtrees are replaced by a
//! reference marker `{"$jsan": "<path>"}` pointing at the first occurrence.
//! Histories repeat most of their structure from one computed state to the next,
//! so this keeps serialized payloads from growing with every recorded action.
//!
//! Paths use the form `$`, `$.key`, `$[3]`, `$["odd key"]`. Markers whose value
//! does not start with `$` are custom shape markers from other producers; they
//! are left in place so configured deserializers can interpret them.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::CodecError;

/// Key of a reference marker object.
pub const REF_KEY: &str = "$jsan";

/// Smallest subtree (in nodes) worth replacing with a reference.
const MIN_SHARED_NODES: usize = 4;

/// Encodes a value into the transport-safe string form.
pub fn encode(value: &Value) -> Result<String, CodecError> {
    let mut infos = Vec::new();
    digest_into(value, &mut infos);

    let mut encoder = Encoder {
        infos: &infos,
        cursor: 0,
        seen: HashMap::new(),
    };
    let shaped = encoder.shape(value, "$");
    Ok(serde_json::to_string(&shaped)?)
}

/// Decodes the string form back into a value, resolving `$` references.
pub fn decode(text: &str) -> Result<Value, CodecError> {
    let mut root: Value = serde_json::from_str(text)?;
    resolve_references(&mut root)?;
    Ok(root)
}

/// Returns true if `value` contains an unresolved `$` reference marker.
#[must_use]
pub fn contains_reference(value: &Value) -> bool {
    match value {
        Value::Object(map) => reference_target(map).is_some() || map.values().any(contains_reference),
        Value::Array(items) => items.iter().any(contains_reference),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeInfo {
    digest: blake3::Hash,
    nodes: usize,
}

/// Computes a structural digest for every node, stored in pre-order.
fn digest_into(value: &Value, out: &mut Vec<NodeInfo>) -> NodeInfo {
    let slot = out.len();
    out.push(NodeInfo {
        digest: blake3::Hash::from([0u8; 32]),
        nodes: 1,
    });

    let mut hasher = blake3::Hasher::new();
    let mut nodes = 1;
    match value {
        Value::Object(map) => {
            hasher.update(b"o");
            hasher.update(&(map.len() as u64).to_le_bytes());
            for (key, child) in map {
                hasher.update(&(key.len() as u64).to_le_bytes());
                hasher.update(key.as_bytes());
                let info = digest_into(child, out);
                hasher.update(info.digest.as_bytes());
                nodes += info.nodes;
            }
        }
        Value::Array(items) => {
            hasher.update(b"a");
            hasher.update(&(items.len() as u64).to_le_bytes());
            for child in items {
                let info = digest_into(child, out);
                hasher.update(info.digest.as_bytes());
                nodes += info.nodes;
            }
        }
        scalar => {
            hasher.update(b"s");
            hasher.update(scalar.to_string().as_bytes());
        }
    }

    let info = NodeInfo {
        digest: hasher.finalize(),
        nodes,
    };
    out[slot] = info;
    info
}

struct Encoder<'a> {
    infos: &'a [NodeInfo],
    cursor: usize,
    seen: HashMap<blake3::Hash, String>,
}

impl Encoder<'_> {
    fn shape(&mut self, value: &Value, path: &str) -> Value {
        let info = self.infos[self.cursor];
        let shareable = match value {
            Value::Object(map) => !map.is_empty(),
            Value::Array(items) => !items.is_empty(),
            _ => false,
        };

        if shareable && info.nodes >= MIN_SHARED_NODES {
            if let Some(target) = self.seen.get(&info.digest) {
                self.cursor += info.nodes;
                let mut marker = Map::new();
                marker.insert(REF_KEY.to_string(), Value::String(target.clone()));
                return Value::Object(marker);
            }
            self.seen.insert(info.digest, path.to_string());
        }
        self.cursor += 1;

        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, child) in map {
                    let child_path = key_path(path, key);
                    out.insert(key.clone(), self.shape(child, &child_path));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, child)| self.shape(child, &format!("{path}[{idx}]")))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn key_path(parent: &str, key: &str) -> String {
    if is_identifier(key) {
        format!("{parent}.{key}")
    } else {
        format!("{parent}[{}]", Value::String(key.to_string()))
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn reference_target(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get(REF_KEY)?.as_str().filter(|target| target.starts_with('$'))
}

/// Converts a reference path into a JSON pointer.
fn parse_path(path: &str) -> Result<String, CodecError> {
    let invalid = || CodecError::InvalidPath {
        path: path.to_string(),
    };
    let rest = path.strip_prefix('$').ok_or_else(invalid)?;

    let mut pointer = String::new();
    let mut pos = 0;
    while pos < rest.len() {
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix('.') {
            let end = after.find(|c| c == '.' || c == '[').unwrap_or(after.len());
            if end == 0 {
                return Err(invalid());
            }
            push_token(&mut pointer, &after[..end]);
            pos += 1 + end;
        } else if let Some(after) = tail.strip_prefix("[\"") {
            let close = closing_quote(after).ok_or_else(invalid)?;
            let key: String = serde_json::from_str(&tail[1..close + 3]).map_err(|_| invalid())?;
            if !after[close + 1..].starts_with(']') {
                return Err(invalid());
            }
            push_token(&mut pointer, &key);
            pos += close + 4;
        } else if let Some(after) = tail.strip_prefix('[') {
            let end = after.find(']').ok_or_else(invalid)?;
            let index = &after[..end];
            if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            push_token(&mut pointer, index);
            pos += end + 2;
        } else {
            return Err(invalid());
        }
    }
    Ok(pointer)
}

fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, b) in s.bytes().enumerate() {
        match b {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Some(idx),
            _ => {}
        }
    }
    None
}

fn push_token(pointer: &mut String, token: &str) {
    pointer.push('/');
    pointer.push_str(&token.replace('~', "~0").replace('/', "~1"));
}

fn is_ancestor_or_self(ancestor: &str, pointer: &str) -> bool {
    ancestor.is_empty()
        || pointer == ancestor
        || pointer.strip_prefix(ancestor).is_some_and(|rest| rest.starts_with('/'))
}

fn collect_references(value: &Value, pointer: &mut String, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            if let Some(target) = reference_target(map) {
                out.push((pointer.clone(), target.to_string()));
                return;
            }
            for (key, child) in map {
                let len = pointer.len();
                push_token(pointer, key);
                collect_references(child, pointer, out);
                pointer.truncate(len);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                let len = pointer.len();
                push_token(pointer, &idx.to_string());
                collect_references(child, pointer, out);
                pointer.truncate(len);
            }
        }
        _ => {}
    }
}

/// Replaces reference markers with copies of their targets.
///
/// A reference is resolved once its target is itself free of references, so
/// producers that order keys differently still decode. Self-referencing
/// (cyclic) markers cannot be represented and stay in place.
fn resolve_references(root: &mut Value) -> Result<(), CodecError> {
    let mut found = Vec::new();
    collect_references(root, &mut String::new(), &mut found);

    let mut pending = Vec::with_capacity(found.len());
    for (at, path) in found {
        let target = parse_path(&path)?;
        if is_ancestor_or_self(&target, &at) {
            trace!(at = %at, path = %path, "leaving cyclic reference unresolved");
            continue;
        }
        pending.push((at, target, path));
    }

    let mut force = false;
    while !pending.is_empty() {
        let before = pending.len();
        let mut blocked = Vec::new();
        for (at, target, path) in pending {
            let resolved = match root.pointer(&target) {
                Some(value) if force || !contains_reference(value) => value.clone(),
                Some(_) => {
                    blocked.push((at, target, path));
                    continue;
                }
                None if force => return Err(CodecError::UnresolvedReference { path }),
                None => {
                    blocked.push((at, target, path));
                    continue;
                }
            };
            if let Some(slot) = root.pointer_mut(&at) {
                *slot = resolved;
            }
        }
        force = blocked.len() == before;
        pending = blocked;
    }
    Ok(())
}
