//! Access gate: the pure decision of whether a record may be viewed now.
//!
//! Nothing in this module performs I/O or reads the clock; `now` is always
//! passed in. The coordinator and the retention sweeper both decide through
//! [`policy_terminal`], so they cannot disagree about what "terminal" means.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::SecretRecord;

/// Why a view was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    Expired,
    ViewLimitReached,
    AlreadyBurned,
    Deleted,
}

impl Denial {
    /// Stable machine-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::ViewLimitReached => "view_limit_reached",
            Self::AlreadyBurned => "already_burned",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Permitted,
    Denied(Denial),
}

impl AccessDecision {
    /// Whether a view is currently allowed.
    #[must_use]
    pub const fn can_view(self) -> bool {
        matches!(self, Self::Permitted)
    }
}

/// Decide whether `record` may be viewed at `now`. First match wins:
/// deleted, expired, view limit, burned.
///
/// A burn marks the record deleted in the same step as the view that
/// consumed it, so a deleted record that was burned reports
/// [`Denial::AlreadyBurned`] rather than [`Denial::Deleted`].
#[must_use]
pub fn evaluate(record: &SecretRecord, now: DateTime<Utc>) -> AccessDecision {
    if record.deleted_at.is_some() {
        let denial = if record.is_burned() {
            Denial::AlreadyBurned
        } else {
            Denial::Deleted
        };
        return AccessDecision::Denied(denial);
    }
    match policy_terminal(record, now) {
        Some(denial) => AccessDecision::Denied(denial),
        None => AccessDecision::Permitted,
    }
}

/// The disclosure-policy part of [`evaluate`], ignoring soft deletion.
///
/// Returns the reason a record will never be viewable again without a policy
/// change. A burned record is also soft-deleted; this still reports it as
/// [`Denial::AlreadyBurned`].
#[must_use]
pub fn policy_terminal(record: &SecretRecord, now: DateTime<Utc>) -> Option<Denial> {
    let policy = &record.policy;
    if policy.expires_at.is_some_and(|at| now > at) {
        return Some(Denial::Expired);
    }
    if policy.max_views.is_some_and(|max| record.view_count >= max) {
        return Some(Denial::ViewLimitReached);
    }
    if policy.burn_on_read && record.view_count >= 1 {
        return Some(Denial::AlreadyBurned);
    }
    None
}

/// The state transition of one successful view: bump the counter and, for
/// burn-on-read secrets, mark the record deleted in the same step.
///
/// Callers must only apply this to a record [`evaluate`] permitted.
#[must_use]
pub fn consume(record: &SecretRecord, now: DateTime<Utc>) -> SecretRecord {
    let mut next = record.clone();
    next.view_count = next.view_count.saturating_add(1);
    if next.policy.burn_on_read {
        next.deleted_at = Some(now);
    }
    next.updated_at = now;
    next
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use proptest::prelude::*;

    use super::*;
    use crate::record::DisclosurePolicy;
    use crate::record::tests::sample_record;

    fn record_with(policy: DisclosurePolicy, view_count: u32) -> SecretRecord {
        let mut record = sample_record("p@ss", policy);
        record.view_count = view_count;
        record
    }

    #[test]
    fn fresh_unlimited_record_is_permitted() {
        let record = record_with(DisclosurePolicy::default(), 0);
        assert_eq!(evaluate(&record, Utc::now()), AccessDecision::Permitted);
    }

    #[test]
    fn deleted_wins_over_everything() {
        let now = Utc::now();
        let mut record = record_with(
            DisclosurePolicy {
                max_views: Some(1),
                burn_on_read: false,
                expires_at: Some(now - Duration::hours(1)),
            },
            1,
        );
        record.deleted_at = Some(now);
        assert_eq!(evaluate(&record, now), AccessDecision::Denied(Denial::Deleted));
    }

    #[test]
    fn expired_wins_over_view_limit() {
        let now = Utc::now();
        let record = record_with(
            DisclosurePolicy {
                max_views: Some(1),
                burn_on_read: false,
                expires_at: Some(now - Duration::milliseconds(1)),
            },
            1,
        );
        assert_eq!(evaluate(&record, now), AccessDecision::Denied(Denial::Expired));
    }

    #[test]
    fn expiry_instant_itself_is_still_viewable() {
        let now = Utc::now();
        let record = record_with(
            DisclosurePolicy {
                expires_at: Some(now),
                ..DisclosurePolicy::default()
            },
            0,
        );
        assert!(evaluate(&record, now).can_view());
        assert!(!evaluate(&record, now + Duration::milliseconds(1)).can_view());
    }

    #[test]
    fn view_limit_wins_over_burn() {
        let record = record_with(
            DisclosurePolicy {
                max_views: Some(1),
                burn_on_read: true,
                expires_at: None,
            },
            1,
        );
        assert_eq!(
            policy_terminal(&record, Utc::now()),
            Some(Denial::ViewLimitReached)
        );
    }

    #[test]
    fn burned_record_reports_burn_not_deletion() {
        let now = Utc::now();
        let fresh = record_with(
            DisclosurePolicy {
                burn_on_read: true,
                ..DisclosurePolicy::default()
            },
            0,
        );
        let burned = consume(&fresh, now);
        assert_eq!(burned.view_count, 1);
        assert_eq!(burned.deleted_at, Some(now));
        assert_eq!(
            evaluate(&burned, now),
            AccessDecision::Denied(Denial::AlreadyBurned)
        );
        assert_eq!(policy_terminal(&burned, now), Some(Denial::AlreadyBurned));
    }

    #[test]
    fn consume_without_burn_leaves_record_live() {
        let now = Utc::now();
        let record = record_with(
            DisclosurePolicy {
                max_views: Some(2),
                ..DisclosurePolicy::default()
            },
            0,
        );
        let next = consume(&record, now);
        assert_eq!(next.view_count, 1);
        assert!(next.deleted_at.is_none());
        assert!(evaluate(&next, now).can_view());
        assert_eq!(
            evaluate(&consume(&next, now), now),
            AccessDecision::Denied(Denial::ViewLimitReached)
        );
    }

    #[test]
    fn exhaustive_small_grid_matches_rule_order() {
        let now = Utc::now();
        let record = sample_record("p@ss", DisclosurePolicy::default());
        for deleted in [false, true] {
            for expired in [None, Some(false), Some(true)] {
                for max_views in [None, Some(1u32), Some(2)] {
                    for burn in [false, true] {
                        for views in 0..3u32 {
                            let mut r = record.clone();
                            r.deleted_at = deleted.then_some(now);
                            r.policy.expires_at = expired.map(|past| {
                                if past {
                                    now - Duration::seconds(1)
                                } else {
                                    now + Duration::seconds(1)
                                }
                            });
                            r.policy.max_views = max_views;
                            r.policy.burn_on_read = burn;
                            r.view_count = views;

                            let expected = if deleted && burn && views >= 1 {
                                Some(Denial::AlreadyBurned)
                            } else if deleted {
                                Some(Denial::Deleted)
                            } else if expired == Some(true) {
                                Some(Denial::Expired)
                            } else if max_views.is_some_and(|m| views >= m) {
                                Some(Denial::ViewLimitReached)
                            } else if burn && views >= 1 {
                                Some(Denial::AlreadyBurned)
                            } else {
                                None
                            };
                            let got = match evaluate(&r, now) {
                                AccessDecision::Permitted => None,
                                AccessDecision::Denied(d) => Some(d),
                            };
                            assert_eq!(got, expected, "{r:?}");
                        }
                    }
                }
            }
        }
    }

    proptest! {
        #[test]
        fn consume_never_exceeds_max_views(max in 1u32..20, start in 0u32..20) {
            let now = Utc::now();
            let mut r = sample_record_cached();
            r.policy.max_views = Some(max);
            r.view_count = start;
            // Apply consume only while permitted, as the coordinator does.
            while evaluate(&r, now).can_view() {
                r = consume(&r, now);
            }
            prop_assert_eq!(r.view_count, max.max(start));
        }

        #[test]
        fn terminal_records_stay_terminal(
            views in 0u32..5,
            max in proptest::option::of(1u32..5),
            burn: bool,
            later_secs in 0i64..1_000_000,
        ) {
            let now = Utc::now();
            let mut r = sample_record_cached();
            r.policy.max_views = max;
            r.policy.burn_on_read = burn;
            r.view_count = views;
            if let Some(denial) = policy_terminal(&r, now) {
                let later = now + Duration::seconds(later_secs);
                prop_assert_eq!(policy_terminal(&r, later), Some(denial));
            }
        }
    }

    /// Building a real payload costs a key derivation; reuse one per thread.
    fn sample_record_cached() -> SecretRecord {
        thread_local! {
            static RECORD: SecretRecord = sample_record("p@ss", DisclosurePolicy::default());
        }
        RECORD.with(Clone::clone)
    }
}
