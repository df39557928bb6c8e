//! Stable per-recipient routing for decided experiments.

use cadence_queue::{Recipient, RecipientFilter, Schedule};
use sha2::{Digest, Sha256};

/// Hash a recipient into a 0-99 bucket within a variant group.
pub fn recipient_bucket(group_key: &str, recipient_id: &str) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(group_key.as_bytes());
    hasher.update(b"|");
    hasher.update(recipient_id.as_bytes());
    let digest = hasher.finalize();

    ((u16::from(digest[0]) * 100) / 256) as u8
}

/// Admits a recipient to a schedule only when their bucket falls in the
/// schedule's share of the split.
///
/// Schedules without an assignment admit everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketRouter;

impl RecipientFilter for BucketRouter {
    fn admits(&self, schedule: &Schedule, recipient: &Recipient) -> bool {
        schedule.assignment.as_ref().is_none_or(|assignment| {
            assignment.covers_bucket(recipient_bucket(&assignment.group_key, &recipient.recipient_id))
        })
    }
}
