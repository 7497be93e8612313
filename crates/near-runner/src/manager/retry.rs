//! Bounded retry policy for key-scoped operations.

use crate::types::KeyPair;

/// What to do when a transaction signed with an explicitly supplied key fails.
///
/// Account deletion uses [`RetryPolicy::FallbackToPersistentKey`]: a stale or
/// already-removed ephemeral key should not block cleanup when the account
/// still has a usable key in the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// One attempt with whatever key was supplied.
    Once,
    /// Attempt with the supplied key, then once more with the stored key.
    #[default]
    FallbackToPersistentKey,
}

impl RetryPolicy {
    /// The signing keys to try, in order. `None` means "the stored key".
    ///
    /// Never yields more than two attempts.
    pub fn attempts(self, key: Option<KeyPair>) -> Vec<Option<KeyPair>> {
        match (self, key) {
            (RetryPolicy::FallbackToPersistentKey, Some(key)) => vec![Some(key), None],
            (_, key) => vec![key],
        }
    }
}
