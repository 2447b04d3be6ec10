//! Retention policy
//!
//! Pure selection of artifacts to delete. Artifacts are grouped into chains
//! (a full backup plus every incremental that transitively depends on it) and
//! chains are kept or deleted as a whole, so a kept incremental always has
//! its baseline.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::{ArchiveError, ArchiveResult};
use crate::models::{ArtifactId, ArtifactKind, CatalogEntry};

/// Retention parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Chains whose full backup is older than this are deleted (`None` = keep forever)
    pub max_age: Option<Duration>,
    /// Number of newest chains to keep (`None` = unlimited)
    pub max_count: Option<usize>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::days(30)),
            max_count: Some(10),
        }
    }
}

impl RetentionConfig {
    /// Keep everything
    pub fn unlimited() -> Self {
        Self {
            max_age: None,
            max_count: None,
        }
    }

    pub fn validate(&self) -> ArchiveResult<()> {
        if self.max_count == Some(0) {
            return Err(ArchiveError::Config(
                "Retention max_count must be at least 1".into(),
            ));
        }
        if let Some(age) = self.max_age {
            if age < Duration::zero() {
                return Err(ArchiveError::Config(
                    "Retention max_age cannot be negative".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A full backup and the incrementals rooted on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub root: ArtifactId,
    /// Creation time of the root full backup
    pub created_at: DateTime<Utc>,
    /// Every member, dependents before the artifacts they depend on
    pub members: Vec<ArtifactId>,
}

/// Outcome of evaluating the policy against a catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Chains kept, newest first
    pub kept: Vec<Chain>,
    /// Chains to delete, newest first
    pub expired: Vec<Chain>,
    /// Incrementals whose chain does not reach a full backup
    pub orphans: Vec<ArtifactId>,
}

impl RetentionPlan {
    /// Every artifact to delete, dependents first within each chain
    pub fn doomed(&self) -> Vec<ArtifactId> {
        self.orphans
            .iter()
            .cloned()
            .chain(self.expired.iter().flat_map(|c| c.members.iter().cloned()))
            .collect()
    }
}

/// Group committed entries into chains; also returns the orphans
///
/// Pending and failed entries are ignored.
pub fn build_chains(entries: &[CatalogEntry]) -> (Vec<Chain>, Vec<ArtifactId>) {
    let committed: HashMap<&ArtifactId, &CatalogEntry> = entries
        .iter()
        .filter(|e| e.status.is_committed())
        .map(|e| (e.id(), e))
        .collect();

    // root id -> members with their depth below the root
    let mut grouped: HashMap<&ArtifactId, Vec<(usize, &CatalogEntry)>> = HashMap::new();
    let mut orphans: Vec<&CatalogEntry> = Vec::new();

    for entry in committed.values().copied() {
        match root_of(entry, &committed) {
            Some((root, depth)) => grouped.entry(root).or_default().push((depth, entry)),
            None => orphans.push(entry),
        }
    }

    let mut chains: Vec<Chain> = grouped
        .into_iter()
        .map(|(root, mut members)| {
            members.sort_by(|(da, a), (db, b)| {
                db.cmp(da)
                    .then_with(|| b.artifact.created_at.cmp(&a.artifact.created_at))
                    .then_with(|| b.id().cmp(a.id()))
            });
            Chain {
                root: root.clone(),
                created_at: committed[root].artifact.created_at,
                members: members.into_iter().map(|(_, e)| e.id().clone()).collect(),
            }
        })
        .collect();

    chains.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.root.cmp(&b.root))
    });

    orphans.sort_by(|a, b| {
        b.artifact
            .created_at
            .cmp(&a.artifact.created_at)
            .then_with(|| b.id().cmp(a.id()))
    });

    (chains, orphans.into_iter().map(|e| e.id().clone()).collect())
}

/// Walk baselines up to a full backup; `None` if the chain is broken
fn root_of<'a>(
    entry: &'a CatalogEntry,
    committed: &HashMap<&'a ArtifactId, &'a CatalogEntry>,
) -> Option<(&'a ArtifactId, usize)> {
    let mut current = entry;
    // A chain cannot be longer than the catalog; more steps means a cycle
    for depth in 0..=committed.len() {
        if current.artifact.kind == ArtifactKind::Full {
            return Some((current.id(), depth));
        }
        let parent = current.artifact.baseline.as_ref()?;
        current = committed.get(parent).copied()?;
    }
    None
}

/// Evaluate `config` against the catalog at time `now`
pub fn plan(entries: &[CatalogEntry], config: &RetentionConfig, now: DateTime<Utc>) -> RetentionPlan {
    let (chains, orphans) = build_chains(entries);
    let cutoff = config.max_age.map(|age| now - age);

    let (kept, expired) = chains.into_iter().enumerate().fold(
        (Vec::new(), Vec::new()),
        |(mut kept, mut expired), (rank, chain)| {
            let over_count = config.max_count.is_some_and(|max| rank >= max);
            let too_old = cutoff.is_some_and(|cutoff| chain.created_at < cutoff);
            if over_count || too_old {
                expired.push(chain);
            } else {
                kept.push(chain);
            }
            (kept, expired)
        },
    );

    RetentionPlan {
        kept,
        expired,
        orphans,
    }
}

/// Artifacts to delete under `config` at time `now`
pub fn select_expired(
    entries: &[CatalogEntry],
    config: &RetentionConfig,
    now: DateTime<Utc>,
) -> Vec<ArtifactId> {
    plan(entries, config, now).doomed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Artifact, EntryStatus};
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn entry(kind: ArtifactKind, hours: i64, baseline: Option<&ArtifactId>) -> CatalogEntry {
        let created_at = base() + Duration::hours(hours);
        let id = ArtifactId::new(kind, created_at);
        CatalogEntry {
            artifact: Artifact {
                file_name: Artifact::file_name_for(&id, false),
                id,
                kind,
                created_at,
                captured_at: None,
                baseline: baseline.cloned(),
                compressed: false,
                checksum: String::new(),
                record_count: 0,
                size_bytes: 0,
            },
            status: EntryStatus::Verified,
            verified_at: Some(created_at),
        }
    }

    /// Full at `hours`, then `incs` incrementals an hour apart, each on the previous
    fn chain(hours: i64, incs: usize) -> Vec<CatalogEntry> {
        let mut out = vec![entry(ArtifactKind::Full, hours, None)];
        for i in 0..incs {
            let parent = out.last().unwrap().id().clone();
            out.push(entry(ArtifactKind::Incremental, hours + 1 + i as i64, Some(&parent)));
        }
        out
    }

    #[test]
    fn test_keeps_newest_chains_by_count() {
        let entries: Vec<CatalogEntry> = (0..5).flat_map(|i| chain(i * 100, 2)).collect();
        let config = RetentionConfig {
            max_age: None,
            max_count: Some(2),
        };

        let plan = plan(&entries, &config, base() + Duration::days(1));
        assert_eq!(plan.kept.len(), 2);
        assert_eq!(plan.expired.len(), 3);
        assert_eq!(plan.kept[0].root, entries[12].id().clone());
        assert_eq!(plan.kept[1].root, entries[9].id().clone());
        assert_eq!(plan.doomed().len(), 9);
    }

    #[test]
    fn test_age_applies_within_count_budget() {
        let entries: Vec<CatalogEntry> = [chain(0, 1), chain(48, 1)].concat();
        let config = RetentionConfig {
            max_age: Some(Duration::hours(24)),
            max_count: Some(10),
        };

        let doomed = select_expired(&entries, &config, base() + Duration::hours(60));
        assert_eq!(doomed, vec![entries[1].id().clone(), entries[0].id().clone()]);
    }

    #[test]
    fn test_members_are_dependents_first() {
        let entries = chain(0, 3);
        let (chains, orphans) = build_chains(&entries);
        assert!(orphans.is_empty());
        let ids: Vec<_> = entries.iter().rev().map(|e| e.id().clone()).collect();
        assert_eq!(chains[0].members, ids);
    }

    #[test]
    fn test_orphans_always_selected() {
        let mut entries = chain(0, 2);
        entries.remove(0);

        let doomed = select_expired(&entries, &RetentionConfig::unlimited(), base());
        assert_eq!(doomed.len(), 2);
    }

    #[test]
    fn test_pending_and_failed_ignored() {
        let mut entries = chain(0, 1);
        entries[1].status = EntryStatus::Pending;
        let mut failed = entry(ArtifactKind::Full, -100, None);
        failed.status = EntryStatus::Failed;
        entries.push(failed);

        let config = RetentionConfig {
            max_age: None,
            max_count: Some(1),
        };
        let plan = plan(&entries, &config, base());
        assert_eq!(plan.kept.len(), 1);
        assert_eq!(plan.kept[0].members.len(), 1);
        assert!(plan.doomed().is_empty());
    }

    #[test]
    fn test_corrupt_entries_still_subject_to_retention() {
        let mut entries = [chain(0, 0), chain(10, 0)].concat();
        entries[0].status = EntryStatus::Corrupt;
        let config = RetentionConfig {
            max_age: None,
            max_count: Some(1),
        };
        assert_eq!(
            select_expired(&entries, &config, base()),
            vec![entries[0].id().clone()]
        );
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_id() {
        let a = entry(ArtifactKind::Full, 0, None);
        // Same creation time, lexically greater id
        let mut b = a.clone();
        b.artifact.id = ArtifactId::new(
            ArtifactKind::Full,
            a.artifact.created_at + Duration::nanoseconds(1),
        );

        let config = RetentionConfig {
            max_age: None,
            max_count: Some(1),
        };
        let doomed = select_expired(&[b.clone(), a.clone()], &config, base());
        assert_eq!(doomed, vec![b.id().clone()]);
    }

    #[test]
    fn test_validate() {
        assert!(RetentionConfig::default().validate().is_ok());
        assert!(RetentionConfig::unlimited().validate().is_ok());
        let zero = RetentionConfig {
            max_age: None,
            max_count: Some(0),
        };
        assert!(matches!(zero.validate(), Err(ArchiveError::Config(_))));
    }
}
