//! Manifest-versus-disk comparison.

use tracing::debug;

use super::job::PatchJob;
use super::local::LocalScan;
use crate::manifest::Manifest;

/// Work produced by comparing a manifest with a local scan.
#[derive(Debug, Default)]
pub struct DiffOutcome {
    /// One pending job per missing or outdated file, in manifest order.
    pub jobs: Vec<PatchJob>,
    /// Listed files whose local checksum already matches.
    pub up_to_date: usize,
    /// Local files the manifest does not list.
    pub extraneous: Vec<String>,
}

/// Emits a job for every manifest entry whose local copy is missing or
/// differs in size or checksum.
pub fn diff(manifest: &Manifest, scan: &LocalScan) -> DiffOutcome {
    let mut outcome = DiffOutcome {
        extraneous: scan.unlisted.clone(),
        ..Default::default()
    };

    for entry in manifest.entries() {
        let current = scan.records.get(&entry.path).is_some_and(|record| {
            record.size == entry.uncompressed_size as u64 && record.checksum == entry.checksum
        });

        if current {
            outcome.up_to_date += 1;
        } else {
            let index = outcome.jobs.len();
            outcome.jobs.push(PatchJob::new(index, entry.clone()));
        }
    }

    debug!(
        jobs = outcome.jobs.len(),
        up_to_date = outcome.up_to_date,
        extraneous = outcome.extraneous.len(),
        "Diff complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumVerifier;
    use crate::manifest::ManifestEntry;
    use crate::patch::fs::FileMeta;
    use crate::patch::job::JobState;
    use crate::patch::local::LocalFileRecord;
    use std::time::SystemTime;

    fn entry(path: &str, content: &[u8]) -> ManifestEntry {
        ManifestEntry::new(
            path,
            ChecksumVerifier::compute(content),
            content.len() as u32,
            content.len() as u32,
        )
    }

    fn record(path: &str, content: &[u8]) -> LocalFileRecord {
        LocalFileRecord::new(
            path,
            ChecksumVerifier::compute(content),
            FileMeta {
                size: content.len() as u64,
                modified: SystemTime::UNIX_EPOCH,
            },
        )
    }

    #[test]
    fn test_missing_outdated_and_current() {
        let manifest = Manifest::new(vec![
            entry("current.dat", b"same"),
            entry("missing.dat", b"new"),
            entry("outdated.dat", b"version 2"),
        ])
        .unwrap();

        let mut scan = LocalScan::default();
        scan.records
            .insert("current.dat".into(), record("current.dat", b"same"));
        scan.records
            .insert("outdated.dat".into(), record("outdated.dat", b"version 1"));
        scan.unlisted.push("extra.dat".into());

        let outcome = diff(&manifest, &scan);
        let paths: Vec<_> = outcome.jobs.iter().map(|j| j.path()).collect();
        assert_eq!(paths, ["missing.dat", "outdated.dat"]);
        assert!(outcome.jobs.iter().all(|j| j.state() == JobState::Pending));
        assert_eq!(outcome.jobs[1].index(), 1);
        assert_eq!(outcome.up_to_date, 1);
        assert_eq!(outcome.extraneous, ["extra.dat"]);
    }

    #[test]
    fn test_size_mismatch_with_matching_checksum_is_outdated() {
        let manifest = Manifest::new(vec![entry("a.dat", b"abc")]).unwrap();
        let mut local = record("a.dat", b"abc");
        local.size = 99;

        let mut scan = LocalScan::default();
        scan.records.insert("a.dat".into(), local);

        assert_eq!(diff(&manifest, &scan).jobs.len(), 1);
    }

    #[test]
    fn test_empty_manifest_yields_nothing() {
        let outcome = diff(&Manifest::default(), &LocalScan::default());
        assert!(outcome.jobs.is_empty());
        assert_eq!(outcome.up_to_date, 0);
    }
}
