//! Divergence detection
//!
//! A path has diverged when the destination copy changed since the last
//! common sync point and no longer matches the source.

use mirrorsync_core::domain::ContentHash;

/// Returns true if syncing `source` over `destination` would discard an
/// edit made on the destination side
///
/// * `prior` - hash recorded for the path at the last sync, if any
/// * `source` - current source hash
/// * `destination` - current destination hash, `None` if absent
pub fn has_diverged(
    prior: Option<&ContentHash>,
    source: &ContentHash,
    destination: Option<&ContentHash>,
) -> bool {
    match destination {
        None => false,
        Some(dest) if dest == source => false,
        Some(dest) => prior != Some(dest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> ContentHash {
        ContentHash::from_digest(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_absent_destination_never_diverges() {
        assert!(!has_diverged(Some(&h(1)), &h(2), None));
        assert!(!has_diverged(None, &h(2), None));
    }

    #[test]
    fn test_untouched_destination() {
        // destination still holds what we wrote last time
        assert!(!has_diverged(Some(&h(1)), &h(2), Some(&h(1))));
    }

    #[test]
    fn test_destination_edited_since_last_sync() {
        assert!(has_diverged(Some(&h(1)), &h(2), Some(&h(3))));
    }

    #[test]
    fn test_destination_already_matches_source() {
        assert!(!has_diverged(Some(&h(1)), &h(2), Some(&h(2))));
        assert!(!has_diverged(None, &h(2), Some(&h(2))));
    }

    #[test]
    fn test_new_on_both_sides_with_different_content() {
        assert!(has_diverged(None, &h(2), Some(&h(3))));
    }
}
