//! Short id generation: `<prefix>-<6 hex chars>`, globally unique within
//! a repository.

use sha2::{Digest, Sha256};

/// Generate a candidate 6-hex-char suffix from a salt and attempt counter.
///
/// Hashing rather than a plain counter keeps ids non-sequential (so two
/// independently-created repositories don't collide when merged) while
/// staying deterministic for a given `(salt, attempt)` pair, which makes
/// the retry loop in [`crate::tasks::FileTaskRepository::create`]
/// reproducible in tests.
fn candidate_suffix(salt: &str, attempt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(attempt.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..3])
}

/// Generate a new short id with the given prefix (e.g. `"f"`, `"e"`, `"run"`),
/// retrying against `exists` up to 100 times.
pub fn generate<F>(prefix: &str, salt: &str, exists: F) -> crate::error::Result<String>
where
    F: Fn(&str) -> bool,
{
    for attempt in 0..100u32 {
        let suffix = candidate_suffix(salt, attempt);
        let id = format!("{prefix}-{suffix}");
        if !exists(&id) {
            return Ok(id);
        }
    }
    Err(crate::error::Error::Conflict(format!(
        "could not generate a unique id with prefix '{prefix}' after 100 attempts"
    )))
}

/// Validate that `id` matches `^<prefix>-[0-9a-f]{6}$`.
pub fn is_valid(prefix: &str, id: &str) -> bool {
    let want_len = prefix.len() + 1 + 6;
    if id.len() != want_len {
        return false;
    }
    let Some(rest) = id.strip_prefix(prefix).and_then(|r| r.strip_prefix('-')) else {
        return false;
    };
    rest.len() == 6 && rest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_shape() {
        let id = generate("f", "salt", |_| false).unwrap();
        assert!(is_valid("f", &id), "id {id} did not match expected shape");
    }

    #[test]
    fn generate_retries_on_collision() {
        let mut seen = std::collections::HashSet::new();
        seen.insert(format!("f-{}", candidate_suffix("salt", 0)));
        let id = generate("f", "salt", |candidate| seen.contains(candidate)).unwrap();
        assert!(!seen.contains(&id));
    }

    #[test]
    fn is_valid_rejects_wrong_length() {
        assert!(!is_valid("f", "f-abc"));
        assert!(!is_valid("f", "f-abcdefg"));
    }

    #[test]
    fn is_valid_rejects_uppercase() {
        assert!(!is_valid("f", "f-ABCDEF"));
    }

    #[test]
    fn is_valid_accepts_prefixed_multi_char_prefix() {
        assert!(is_valid("run", "run-0a1b2c"));
    }
}
