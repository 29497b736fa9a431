//! Stable content hash of an alert, used downstream as the deduplication key.
//!
//! The hash covers the alert name and the label set in sorted key order, so
//! two alerts that carry the same labels always end up with the same
//! fingerprint no matter in which order the labels arrived on the wire.

use sha2::{Digest, Sha256};

/// length of a hex encoded SHA-256 digest
pub const FINGERPRINT_LEN: usize = 64;

/// Computes the fingerprint of an alert.
///
/// The canonical input is `alertname|k1=v1|k2=v2|...` over the labels sorted
/// by key, hashed with SHA-256 and hex encoded in lowercase.
///
/// # Arguments
///
/// * `alert_name` - name of the alert (usually the `alertname` label)
///
/// * `labels` - the complete label set, in any order
pub fn fingerprint<I, K, V>(alert_name: &str, labels: I) -> String
where
	I: IntoIterator<Item = (K, V)>,
	K: AsRef<str>,
	V: AsRef<str>,
{
	let mut pairs: Vec<(K, V)> = labels.into_iter().collect();
	pairs.sort_by(|(a, _), (b, _)| a.as_ref().cmp(b.as_ref()));

	let mut hasher = Sha256::new();
	hasher.update(alert_name.as_bytes());
	for (key, value) in &pairs {
		hasher.update(b"|");
		hasher.update(key.as_ref().as_bytes());
		hasher.update(b"=");
		hasher.update(value.as_ref().as_bytes());
	}

	hex::encode(hasher.finalize())
}

/// Returns true if `candidate` looks like a fingerprint we would have
/// generated ourselves (64 lowercase or uppercase hex digits).
pub fn is_well_formed(candidate: &str) -> bool {
	candidate.len() == FINGERPRINT_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}
