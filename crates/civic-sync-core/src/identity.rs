//! Stable identifiers and change fingerprints.
//!
//! Entities without a natural external key are identified by a short
//! content-addressed digest over a tuple of semantically stable source
//! fields, prefixed with a namespace token so that identifier spaces of
//! different sources stay visually distinct in a shared table.
//!
//! The ordering of parts is part of the identifier: `identifier_for(p,
//! [a, b])` and `identifier_for(p, [b, a])` are different identifiers.
//! Changing part order or normalization for an existing feed orphans every
//! row it created before.

use sha2::{Digest, Sha256};

use crate::models::FieldMap;

/// Number of hex characters kept from the digest.
pub const DIGEST_HEX_LEN: usize = 8;

/// Derive an identifier from ordered optional parts.
///
/// `None` parts are skipped; the remaining parts are concatenated without a
/// separator, hashed with SHA-256, truncated to [`DIGEST_HEX_LEN`] hex
/// characters and appended to `prefix` verbatim (`"meser-"` yields
/// `"meser-1a2b3c4d"`).
///
/// No normalization is applied here; see [`normalize_text`].
pub fn identifier_for(prefix: &str, parts: &[Option<&str>]) -> String {
    let joined: String = parts.iter().flatten().copied().collect();
    format!("{}{}", prefix, short_digest(&joined))
}

/// First [`DIGEST_HEX_LEN`] hex characters of the SHA-256 of `text`.
pub fn short_digest(text: &str) -> String {
    let mut hex = hex_sha256(text);
    hex.truncate(DIGEST_HEX_LEN);
    hex
}

/// Trim, collapse internal runs of whitespace to one space, and lowercase.
///
/// Opt-in: feeds that already produced identifiers from raw text must keep
/// doing so.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Marks the end of each part of a fingerprint, so text cannot slide from
/// one field into the next.
const FIELD_BOUNDARY: char = '\u{1f}';

/// Cheap change fingerprint over the tracked fields of a record plus its
/// source and status.
///
/// The string form of each named field (missing fields contribute an
/// empty part), then `source` and `status`, are stripped of all whitespace
/// and each terminated by a boundary mark before hashing. Whitespace inside
/// a part is the only difference it ignores. Only ever compared against
/// another fingerprint computed in the same process.
pub fn content_fingerprint(
    fields: &FieldMap,
    field_names: &[String],
    source: &str,
    status: &str,
) -> String {
    let mut buf = String::new();
    let mut push_part = |part: &str| {
        buf.extend(part.chars().filter(|c| !c.is_whitespace()));
        buf.push(FIELD_BOUNDARY);
    };
    for name in field_names {
        match fields.get(name) {
            Some(value) => push_part(&value.as_plain_string()),
            None => push_part(""),
        }
    }
    push_part(source);
    push_part(status);
    hex_sha256(&buf)
}

fn hex_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
