//! Partial-id resolution shared by the task, epic, and run repositories:
//! exact match, else unique prefix match, else unique prefix match with
//! the entity's default prefix prepended.

use crate::error::{Error, Result};
use crate::model::Identified;

fn matches<T: Identified>(items: &[T], needle: &str) -> Vec<usize> {
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.id().starts_with(needle))
        .map(|(i, _)| i)
        .collect()
}

fn ambiguous<T: Identified>(items: &[T], idxs: &[usize], prefix: &str) -> Error {
    Error::AmbiguousId {
        prefix: prefix.to_string(),
        candidates: idxs.iter().map(|&i| items[i].id().to_string()).collect(),
    }
}

/// Resolve `id_or_prefix` to the index of exactly one matching record.
pub fn resolve_index<T: Identified>(
    items: &[T],
    id_or_prefix: &str,
    default_prefix: &str,
) -> Result<usize> {
    if let Some(i) = items.iter().position(|item| item.id() == id_or_prefix) {
        return Ok(i);
    }

    let idxs = matches(items, id_or_prefix);
    match idxs.len() {
        1 => return Ok(idxs[0]),
        n if n > 1 => return Err(ambiguous(items, &idxs, id_or_prefix)),
        _ => {}
    }

    let prefixed = format!("{default_prefix}{id_or_prefix}");
    let idxs = matches(items, &prefixed);
    match idxs.len() {
        1 => Ok(idxs[0]),
        n if n > 1 => Err(ambiguous(items, &idxs, &prefixed)),
        _ => Err(Error::NotFound(id_or_prefix.to_string())),
    }
}
