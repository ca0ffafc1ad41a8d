//! The Scanner: periodically walks the share root, diffs against the
//! previous snapshot, and enqueues `SendFile` for every added or updated
//! path, filtering out files attributable to an in-flight or just-settled
//! inbound transfer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use walkdir::WalkDir;

use crate::coordinator::CoordinatorCommand;
use crate::fingerprint::{Fingerprint, FingerprintSource, Snapshot};
use crate::registry::{ReceiveEntry, ReceiveRegistry};

/// Drives the scan loop on its own thread.
pub struct Scanner<F> {
    share_root: PathBuf,
    poll_interval: Duration,
    registry: Arc<ReceiveRegistry>,
    fingerprint_source: F,
    main_tx: Sender<CoordinatorCommand>,
}

impl<F> Scanner<F>
where
    F: FingerprintSource + Send + 'static,
{
    /// Construct a scanner over `share_root`, reporting changes to
    /// `main_tx` every `poll_interval`.
    pub fn new(
        share_root: PathBuf,
        poll_interval: Duration,
        registry: Arc<ReceiveRegistry>,
        fingerprint_source: F,
        main_tx: Sender<CoordinatorCommand>,
    ) -> Scanner<F> {
        Scanner {
            share_root,
            poll_interval,
            registry,
            fingerprint_source,
            main_tx,
        }
    }

    /// Spawn the scan loop on a dedicated thread. Never returns; the
    /// thread dies with the process along with every other worker.
    pub fn spawn(self) -> thread::JoinHandle<()> {
        thread::spawn(move || self.main_loop())
    }

    fn main_loop(mut self) {
        let mut previous = self.scan_once();
        loop {
            thread::sleep(self.poll_interval);
            let current = self.scan_once();
            let (added, updated) = diff(&previous, &current);
            for path in added.into_iter().chain(updated.into_iter()) {
                log::debug!("scanner: detected change at {}", path.display());
                let _ = self.main_tx.send(CoordinatorCommand::SendFile { path });
            }
            previous = current;
        }
    }

    /// Walk `share_root` bottom-up, fingerprinting every regular file not
    /// filtered out by the echo-suppression rule below.
    fn scan_once(&mut self) -> Snapshot {
        let mut snapshot = Snapshot::new();

        let walker = WalkDir::new(&self.share_root)
            .contents_first(true)
            .follow_links(false);

        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let abs_path = entry.path();
            let rel_path = match abs_path.strip_prefix(&self.share_root) {
                Ok(p) => p.to_path_buf(),
                Err(_) => continue,
            };

            let fingerprint = match self.fingerprint_source.fingerprint(abs_path) {
                Ok(fp) => fp,
                Err(e) => {
                    log::warn!("scanner: could not fingerprint {}: {}", abs_path.display(), e);
                    continue;
                }
            };

            if self.filter(&rel_path, fingerprint) {
                snapshot.insert(rel_path, fingerprint);
            }
        }

        snapshot
    }

    /// Apply the echo-suppression rule: returns `true` if `rel_path`
    /// should be included in the current snapshot.
    fn filter(&self, rel_path: &Path, fingerprint: Fingerprint) -> bool {
        match self.registry.get(rel_path) {
            Some(ReceiveEntry::InFlight { .. }) => false,
            Some(ReceiveEntry::Settled(settled_fp)) => {
                if settled_fp == fingerprint {
                    false
                } else {
                    self.registry.remove(rel_path);
                    true
                }
            }
            None => true,
        }
    }
}

/// Compute `added` and `updated` path sets between two snapshots. Removed
/// paths are informational only and are not computed here.
fn diff(previous: &Snapshot, current: &Snapshot) -> (HashSet<PathBuf>, HashSet<PathBuf>) {
    let mut added = HashSet::new();
    let mut updated = HashSet::new();

    for (path, fp) in current {
        match previous.get(path) {
            None => {
                added.insert(path.clone());
            }
            Some(prev_fp) if prev_fp != fp => {
                updated.insert(path.clone());
            }
            Some(_) => {}
        }
    }

    (added, updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(v: u64) -> Fingerprint {
        Fingerprint::from(v)
    }

    #[test]
    fn diff_finds_added_and_updated_and_ignores_unchanged() {
        let mut previous = Snapshot::new();
        previous.insert(PathBuf::from("a.txt"), fp(1));
        previous.insert(PathBuf::from("b.txt"), fp(2));

        let mut current = Snapshot::new();
        current.insert(PathBuf::from("a.txt"), fp(1)); // unchanged
        current.insert(PathBuf::from("b.txt"), fp(99)); // updated
        current.insert(PathBuf::from("c.txt"), fp(3)); // added

        let (added, updated) = diff(&previous, &current);
        assert_eq!(added, HashSet::from([PathBuf::from("c.txt")]));
        assert_eq!(updated, HashSet::from([PathBuf::from("b.txt")]));
    }

    #[test]
    fn empty_share_root_yields_no_events() {
        let (added, updated) = diff(&Snapshot::new(), &Snapshot::new());
        assert!(added.is_empty());
        assert!(updated.is_empty());
    }

    #[test]
    fn end_to_end_scan_detects_new_file() {
        let dir = tempdir::TempDir::new("scanner").unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();

        let (tx, _rx) = std::sync::mpsc::channel();
        let mut scanner = Scanner::new(
            dir.path().to_path_buf(),
            Duration::from_millis(1),
            Arc::new(ReceiveRegistry::new()),
            crate::fingerprint::SeahashFingerprint,
            tx,
        );

        let snapshot = scanner.scan_once();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&PathBuf::from("hello.txt")));
    }

    #[test]
    fn in_flight_path_is_excluded_from_snapshot() {
        let dir = tempdir::TempDir::new("scanner").unwrap();
        std::fs::write(dir.path().join("partial.bin"), b"half-written").unwrap();

        let registry = Arc::new(ReceiveRegistry::new());
        registry.recv_send(&PathBuf::from("partial.bin"), 2);

        let (tx, _rx) = std::sync::mpsc::channel();
        let mut scanner = Scanner::new(
            dir.path().to_path_buf(),
            Duration::from_millis(1),
            registry,
            crate::fingerprint::SeahashFingerprint,
            tx,
        );

        let snapshot = scanner.scan_once();
        assert!(!snapshot.contains_key(&PathBuf::from("partial.bin")));
    }

    #[test]
    fn settled_path_with_matching_fingerprint_is_echo_suppressed() {
        let dir = tempdir::TempDir::new("scanner").unwrap();
        let path = dir.path().join("received.txt");
        std::fs::write(&path, b"from peer").unwrap();

        let source = crate::fingerprint::SeahashFingerprint;
        let fp = {
            use crate::fingerprint::FingerprintSource;
            source.fingerprint(&path).unwrap()
        };

        let registry = Arc::new(ReceiveRegistry::new());
        registry.settle(&PathBuf::from("received.txt"), fp);

        let (tx, _rx) = std::sync::mpsc::channel();
        let mut scanner = Scanner::new(
            dir.path().to_path_buf(),
            Duration::from_millis(1),
            registry,
            source,
            tx,
        );

        let snapshot = scanner.scan_once();
        assert!(!snapshot.contains_key(&PathBuf::from("received.txt")));
    }

    #[test]
    fn settled_path_with_diverged_fingerprint_is_readmitted_and_forgotten() {
        let dir = tempdir::TempDir::new("scanner").unwrap();
        let path = dir.path().join("edited.txt");
        std::fs::write(&path, b"original").unwrap();

        let registry = Arc::new(ReceiveRegistry::new());
        registry.settle(&PathBuf::from("edited.txt"), Fingerprint::from(0xDEAD_u64));

        let (tx, _rx) = std::sync::mpsc::channel();
        let mut scanner = Scanner::new(
            dir.path().to_path_buf(),
            Duration::from_millis(1),
            registry.clone(),
            crate::fingerprint::SeahashFingerprint,
            tx,
        );

        let snapshot = scanner.scan_once();
        assert!(snapshot.contains_key(&PathBuf::from("edited.txt")));
        assert!(registry.get(&PathBuf::from("edited.txt")).is_none());
    }
}
