//! Task-set content hashing (§4.I).
//!
//! Two runs whose task-set hash matches are declared comparable, which is
//! what lets the aggregator compute pass@k over files loaded independently
//! of a single orchestrator invocation (§4.F, §9 Open Question 2).

use crate::model::TaskManifest;
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;

/// Normalizes CRLF/CR to LF, matching the spec's "normalized to LF line
/// endings" requirement so hashes are stable across checkouts on different
/// platforms.
fn normalize_line_endings(bytes: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(bytes);
    text.replace("\r\n", "\n").replace('\r', "\n").into_bytes()
}

/// Hashes one task: its manifest bytes plus every referenced test file's
/// bytes, test files sorted by path for determinism.
pub fn hash_task(manifest: &TaskManifest, test_file_root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();

    let manifest_bytes = serde_json::to_vec(manifest).expect("TaskManifest always serializes");
    hasher.update(normalize_line_endings(&manifest_bytes));

    let mut sorted_paths = manifest.test_files.clone();
    sorted_paths.sort();

    for relative_path in &sorted_paths {
        let full_path = test_file_root.join(relative_path);
        let contents = std::fs::read(&full_path)?;
        hasher.update(normalize_line_endings(&contents));
    }

    Ok(hex_digest(hasher))
}

/// Hashes the full active task set: the ordered sequence of per-task hashes
/// (tasks sorted by id for determinism) together with the shared
/// test-harness manifest digest.
pub fn hash_task_set(
    manifests: &[TaskManifest],
    test_file_root: &Path,
    harness_manifest_bytes: &[u8],
) -> io::Result<String> {
    let mut sorted: Vec<&TaskManifest> = manifests.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = Sha256::new();
    for manifest in sorted {
        let task_hash = hash_task(manifest, test_file_root)?;
        hasher.update(task_hash.as_bytes());
    }

    let mut harness_hasher = Sha256::new();
    harness_hasher.update(normalize_line_endings(harness_manifest_bytes));
    hasher.update(hex_digest(harness_hasher).as_bytes());

    Ok(hex_digest(hasher))
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScoringRules;
    use std::fs;
    use tempfile::tempdir;

    fn manifest(id: &str, test_files: Vec<&str>) -> TaskManifest {
        TaskManifest {
            id: id.to_string(),
            description: "desc".to_string(),
            generation_prompt: "generate".to_string(),
            repair_prompt: "repair".to_string(),
            test_files: test_files.into_iter().map(Into::into).collect(),
            attempt_limit: 2,
            scoring: Some(ScoringRules::default()),
        }
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("test1.txt"), "assert true").unwrap();
        let m = manifest("t1", vec!["test1.txt"]);

        let h1 = hash_task(&m, dir.path()).unwrap();
        let h2 = hash_task(&m, dir.path()).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_changes_when_test_file_content_changes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("test1.txt"), "assert true").unwrap();
        let m = manifest("t1", vec!["test1.txt"]);
        let h1 = hash_task(&m, dir.path()).unwrap();

        fs::write(dir.path().join("test1.txt"), "assert false").unwrap();
        let h2 = hash_task(&m, dir.path()).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn hash_is_insensitive_to_line_ending_style() {
        let dir_lf = tempdir().unwrap();
        fs::write(dir_lf.path().join("t.txt"), "line1\nline2\n").unwrap();
        let dir_crlf = tempdir().unwrap();
        fs::write(dir_crlf.path().join("t.txt"), "line1\r\nline2\r\n").unwrap();

        let m = manifest("t1", vec!["t.txt"]);
        let h_lf = hash_task(&m, dir_lf.path()).unwrap();
        let h_crlf = hash_task(&m, dir_crlf.path()).unwrap();
        assert_eq!(h_lf, h_crlf);
    }

    #[test]
    fn task_set_hash_is_order_independent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        let ma = manifest("a", vec!["a.txt"]);
        let mb = manifest("b", vec!["b.txt"]);

        let h1 = hash_task_set(&[ma.clone(), mb.clone()], dir.path(), b"harness-v1").unwrap();
        let h2 = hash_task_set(&[mb, ma], dir.path(), b"harness-v1").unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn task_set_hash_changes_with_harness_manifest() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let m = manifest("a", vec!["a.txt"]);

        let h1 = hash_task_set(&[m.clone()], dir.path(), b"harness-v1").unwrap();
        let h2 = hash_task_set(&[m], dir.path(), b"harness-v2").unwrap();
        assert_ne!(h1, h2);
    }
}
