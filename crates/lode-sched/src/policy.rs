//! Pure scheduling steps over an in-memory [`Registry`].
//!
//! Nothing here touches the store; [`crate::Scheduler`] runs these inside
//! the registry lease.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use lode_types::{BlobInfo, ReaderId, Registry, RegistryItem};

/// Staleness override threshold, in poll intervals.
pub const STALENESS_FACTOR: f64 = 1.5;

/// A blob handed to a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    pub blob: BlobInfo,
    /// Resume position.
    pub offset: u64,
    /// Generation after the claim.
    pub generation: u64,
}

/// What [`reconcile`] changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    /// Items whose blob shrank below the recorded offset.
    pub reset: usize,
}

/// Bring the registry in line with `listing`.
///
/// Items for vanished blobs are dropped; new blobs get a fresh item. A blob
/// now smaller than its recorded offset was replaced or truncated and is
/// rewound to 0.
pub fn reconcile(registry: &mut Registry, listing: &[BlobInfo]) -> ReconcileReport {
    let listed: HashSet<&str> = listing.iter().map(|b| b.name.as_str()).collect();
    let stale: Vec<String> = registry
        .keys()
        .filter(|key| !listed.contains(key))
        .map(str::to_string)
        .collect();
    let removed = registry.remove_many(&stale);

    let mut added = 0;
    let mut reset = 0;
    for blob in listing {
        match registry.get_mut(&blob.name) {
            None => {
                registry.upsert(RegistryItem::new(&blob.name, &blob.etag));
                added += 1;
            }
            Some(item) if item.offset > blob.size => {
                warn!(
                    blob = %blob.name,
                    offset = item.offset,
                    size = blob.size,
                    "blob shrank below recorded offset; rewinding"
                );
                item.offset = 0;
                item.etag = blob.etag.clone();
                reset += 1;
            }
            Some(_) => {}
        }
    }
    ReconcileReport {
        added,
        removed,
        reset,
    }
}

/// Whether `blob` has unread bytes and may be claimed by `reader`.
pub fn is_eligible(item: &RegistryItem, blob: &BlobInfo, reader: &ReaderId, reserved_tail: u64) -> bool {
    item.offset < blob.size.saturating_sub(reserved_tail) && item.is_claimable_by(reader)
}

/// Eligible blobs of `listing`, in listing order.
pub fn eligible<'a>(
    registry: &Registry,
    listing: &'a [BlobInfo],
    reader: &ReaderId,
    reserved_tail: u64,
) -> Vec<&'a BlobInfo> {
    listing
        .iter()
        .filter(|blob| {
            registry
                .get(&blob.name)
                .is_some_and(|item| is_eligible(item, blob, reader, reserved_tail))
        })
        .collect()
}

/// Choose among eligible candidates.
///
/// Lowest generation wins, ties going to the older blob. If the
/// oldest-modified candidate predates the fair pick by more than
/// [`STALENESS_FACTOR`] poll intervals it is chosen instead.
pub fn pick<'a>(
    registry: &Registry,
    candidates: &[&'a BlobInfo],
    poll_interval: Duration,
) -> Option<&'a BlobInfo> {
    let generation = |blob: &BlobInfo| registry.get(&blob.name).map_or(0, |i| i.generation);

    let fair = candidates.iter().copied().min_by(|a, b| {
        generation(*a)
            .cmp(&generation(*b))
            .then(a.last_modified.cmp(&b.last_modified))
            .then(a.name.cmp(&b.name))
    })?;
    let oldest = candidates
        .iter()
        .copied()
        .min_by(|a, b| a.last_modified.cmp(&b.last_modified).then(a.name.cmp(&b.name)))?;

    let threshold = chrono::Duration::from_std(poll_interval.mul_f64(STALENESS_FACTOR)).ok();
    let lag = fair.last_modified - oldest.last_modified;
    if threshold.is_some_and(|threshold| lag > threshold) {
        debug!(
            fair = %fair.name,
            stale = %oldest.name,
            lag_secs = lag.num_seconds(),
            "staleness override"
        );
        return Some(oldest);
    }
    Some(fair)
}

/// Claim `blob` for `reader`: set the owner, raise the generation and
/// renormalize so the registry minimum is 0.
///
/// # Panics
///
/// If `blob` has no registry item; callers reconcile first.
pub fn claim(registry: &mut Registry, blob: &BlobInfo, reader: &ReaderId, max_generation: u64) -> Claim {
    let item = registry
        .get_mut(&blob.name)
        .expect("claimed blob must be reconciled into the registry");
    item.owner = Some(reader.clone());
    item.raise_generation(max_generation);
    let offset = item.offset;

    registry.renormalize_generations();
    let generation = registry.get(&blob.name).map_or(0, |i| i.generation);
    Claim {
        blob: blob.clone(),
        offset,
        generation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn blob(name: &str, size: u64, modified: i64) -> BlobInfo {
        BlobInfo::new(name, size, format!("etag-{name}-{size}"), at(modified))
    }

    fn reader(id: &str) -> ReaderId {
        ReaderId::new(id).unwrap()
    }

    const POLL: Duration = Duration::from_secs(30);

    #[test]
    fn reconcile_adds_and_removes() {
        let mut registry: Registry = [
            RegistryItem::new("gone", "e").with_offset(5),
            RegistryItem::new("kept", "e").with_offset(3),
        ]
        .into_iter()
        .collect();
        let listing = vec![blob("kept", 10, 0), blob("new", 7, 0)];

        let report = reconcile(&mut registry, &listing);
        assert_eq!(report, ReconcileReport { added: 1, removed: 1, reset: 0 });
        assert!(!registry.contains("gone"));
        assert_eq!(registry.get("kept").unwrap().offset, 3);
        let fresh = registry.get("new").unwrap();
        assert_eq!((fresh.offset, fresh.generation), (0, 0));
        assert!(fresh.owner.is_none());
        assert_eq!(fresh.etag, "etag-new-7");
    }

    #[test]
    fn reconcile_rewinds_shrunken_blob() {
        let mut registry: Registry = [RegistryItem::new("log", "old").with_offset(100)]
            .into_iter()
            .collect();
        let report = reconcile(&mut registry, &[blob("log", 40, 0)]);
        assert_eq!(report.reset, 1);
        let item = registry.get("log").unwrap();
        assert_eq!(item.offset, 0);
        assert_eq!(item.etag, "etag-log-40");
    }

    #[test]
    fn drained_blob_is_not_eligible_until_it_grows() {
        let me = reader("me");
        let item = RegistryItem::new("log", "e").with_offset(10);
        assert!(!is_eligible(&item, &blob("log", 10, 0), &me, 0));
        assert!(is_eligible(&item, &blob("log", 11, 0), &me, 0));
    }

    #[test]
    fn reserved_tail_counts_as_drained() {
        let me = reader("me");
        let item = RegistryItem::new("log", "e").with_offset(8);
        assert!(!is_eligible(&item, &blob("log", 10, 0), &me, 2));
        assert!(is_eligible(&item, &blob("log", 12, 0), &me, 2));
    }

    #[test]
    fn owned_by_other_is_skipped() {
        let me = reader("me");
        let theirs = RegistryItem::new("log", "e").with_owner(Some(reader("them")));
        let mine = RegistryItem::new("log", "e").with_owner(Some(me.clone()));
        assert!(!is_eligible(&theirs, &blob("log", 5, 0), &me, 0));
        assert!(is_eligible(&mine, &blob("log", 5, 0), &me, 0));
    }

    #[test]
    fn lowest_generation_wins() {
        let registry: Registry = [
            RegistryItem::new("a", "e").with_generation(2),
            RegistryItem::new("b", "e").with_generation(0),
            RegistryItem::new("c", "e").with_generation(1),
        ]
        .into_iter()
        .collect();
        let listing = [blob("a", 9, 0), blob("b", 9, 10), blob("c", 9, 20)];
        let candidates: Vec<&BlobInfo> = listing.iter().collect();
        assert_eq!(pick(&registry, &candidates, POLL).unwrap().name, "b");
    }

    #[test]
    fn staleness_override_picks_starved_blob() {
        let registry: Registry = [
            RegistryItem::new("starved", "e").with_generation(3),
            RegistryItem::new("busy", "e").with_generation(0),
        ]
        .into_iter()
        .collect();
        // 46s apart, threshold is 45s.
        let listing = [blob("starved", 9, 0), blob("busy", 9, 46)];
        let candidates: Vec<&BlobInfo> = listing.iter().collect();
        assert_eq!(pick(&registry, &candidates, POLL).unwrap().name, "starved");
    }

    #[test]
    fn no_override_within_threshold() {
        let registry: Registry = [
            RegistryItem::new("older", "e").with_generation(3),
            RegistryItem::new("fair", "e").with_generation(0),
        ]
        .into_iter()
        .collect();
        let listing = [blob("older", 9, 0), blob("fair", 9, 45)];
        let candidates: Vec<&BlobInfo> = listing.iter().collect();
        assert_eq!(pick(&registry, &candidates, POLL).unwrap().name, "fair");
    }

    #[test]
    fn empty_candidates_pick_nothing() {
        assert!(pick(&Registry::new(), &[], POLL).is_none());
    }

    #[test]
    fn claim_sets_owner_and_renormalizes() {
        let me = reader("me");
        let mut registry: Registry = [
            RegistryItem::new("a", "e").with_generation(0).with_offset(4),
            RegistryItem::new("b", "e").with_generation(1),
        ]
        .into_iter()
        .collect();
        let claimed = claim(&mut registry, &blob("a", 9, 0), &me, 100);
        assert_eq!(claimed.offset, 4);
        // a: 0 -> 1, b: 1, then both shift down by 1.
        assert_eq!(claimed.generation, 0);
        assert_eq!(registry.get("b").unwrap().generation, 0);
        assert!(registry.get("a").unwrap().is_owned_by(&me));
        assert_eq!(registry.min_generation(), Some(0));
    }

    #[test]
    fn claim_at_generation_ceiling_halves() {
        let me = reader("me");
        let mut registry: Registry = [
            RegistryItem::new("a", "e").with_generation(10),
            RegistryItem::new("b", "e").with_generation(0),
        ]
        .into_iter()
        .collect();
        let claimed = claim(&mut registry, &blob("a", 9, 0), &me, 10);
        assert_eq!(claimed.generation, 5);
    }

    proptest! {
        #[test]
        fn claims_keep_minimum_generation_at_zero(
            gens in proptest::collection::vec(0u64..50, 1..12),
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 1..40),
        ) {
            let me = reader("me");
            let mut registry: Registry = gens
                .iter()
                .enumerate()
                .map(|(i, g)| RegistryItem::new(format!("b{i}"), "e").with_generation(*g))
                .collect();
            let listing: Vec<BlobInfo> = (0..gens.len()).map(|i| blob(&format!("b{i}"), 1, 0)).collect();
            for index in picks {
                let target = index.get(&listing);
                claim(&mut registry, target, &me, 64);
                prop_assert_eq!(registry.min_generation(), Some(0));
            }
        }
    }
}
