//! Name/email normalization for lookups.
//!
//! Names and emails are folded to a canonical comparison form before every
//! lookup and before every write of a persisted normalized field. The
//! storage layer itself compares normalized values exactly; the folding
//! happens here and nowhere else.

/// Maps a display name or email to its canonical comparison form.
/// Implementations must be deterministic, pure, and total (defined for all
/// strings, including the empty string).
pub trait LookupNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> String;
}

/// The default normalizer: culture-invariant uppercase.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpperInvariantNormalizer;

impl LookupNormalizer for UpperInvariantNormalizer {
    fn normalize(&self, raw: &str) -> String {
        raw.to_uppercase()
    }
}
