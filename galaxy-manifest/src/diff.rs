//! Build comparison
//!
//! Partitions the files of a new build against an old one into the four
//! disjoint sets driving an incremental download: brand-new files, changed
//! files re-downloaded in full, files covered by a delta, and deletions.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{DepotItem, ManifestDiff, Patch};

/// Compare the items of a new build against an optional old build
///
/// Every file of the new build lands in exactly one of `{new, changed,
/// patched}`; files only in the old build land in `deleted`. Unchanged
/// files (same md5 and size) appear nowhere. Ties are broken by the
/// insertion order of `new_items`.
pub fn compare(
    new_items: &[DepotItem],
    old_items: Option<&[DepotItem]>,
    patch: Option<&Patch>,
) -> ManifestDiff {
    let mut diff = ManifestDiff::default();

    let Some(old_items) = old_items else {
        diff.new = new_items.to_vec();
        return diff;
    };

    let by_path_old: HashMap<&str, &DepotItem> = old_items
        .iter()
        .filter(|i| !i.path().is_empty())
        .map(|i| (i.path(), i))
        .collect();

    for item in new_items {
        let path = item.path();
        if path.is_empty() {
            // Containers have no logical path; they are re-downloaded
            // whenever any member file needs them.
            continue;
        }

        let Some(old) = by_path_old.get(path) else {
            diff.new.push(item.clone());
            continue;
        };

        let unchanged = item.md5().is_some()
            && item.md5() == old.md5()
            && item.total_size() == old.total_size();
        if unchanged {
            continue;
        }

        let file_patch = patch.and_then(|p| {
            p.files.iter().find(|fp| {
                fp.target_path == path
                    && Some(fp.md5_source.as_str()) == old.md5()
                    && Some(fp.md5_target.as_str()) == item.md5()
            })
        });

        if let Some(fp) = file_patch {
            diff.patched.push(fp.clone());
        } else {
            diff.changed.push(item.clone());
        }
    }

    let mut new_paths: std::collections::HashSet<&str> =
        new_items.iter().map(DepotItem::path).collect();
    new_paths.remove("");
    for item in old_items {
        let path = item.path();
        if !path.is_empty() && !new_paths.contains(path) {
            diff.deleted.push(path.to_string());
        }
    }

    debug!(
        "diff: {} new, {} changed, {} patched, {} deleted",
        diff.new.len(),
        diff.changed.len(),
        diff.patched.len(),
        diff.deleted.len()
    );
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, FilePatchDiff, V2FileItem};

    fn chunk(tag: u8) -> Chunk {
        Chunk {
            md5_compressed: format!("{tag:02x}").repeat(16),
            size_compressed: 64,
            md5_uncompressed: format!("{:02x}", tag + 1).repeat(16),
            size_uncompressed: 128,
            offset_compressed: 0,
            offset_uncompressed: 0,
        }
    }

    fn file(path: &str, md5: &str, size_tag: u8) -> DepotItem {
        DepotItem::V2File(V2FileItem {
            path: path.to_string(),
            product_id: "10".to_string(),
            md5: Some(md5.to_string()),
            chunks: vec![chunk(size_tag)],
            sfc_ref: None,
        })
    }

    fn md5(tag: u8) -> String {
        format!("{tag:02x}").repeat(16)
    }

    #[test]
    fn no_old_build_marks_everything_new() {
        let new = vec![file("a", &md5(1), 1), file("b", &md5(2), 1)];
        let diff = compare(&new, None, None);
        assert_eq!(diff.new.len(), 2);
        assert!(diff.changed.is_empty());
        assert!(diff.patched.is_empty());
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn partition_is_disjoint_and_complete() {
        let old = vec![
            file("same", &md5(1), 1),
            file("patchable", &md5(2), 1),
            file("changed", &md5(3), 1),
            file("removed", &md5(4), 1),
        ];
        let new = vec![
            file("same", &md5(1), 1),
            file("patchable", &md5(5), 1),
            file("changed", &md5(6), 1),
            file("added", &md5(7), 1),
        ];
        let patch = Patch {
            algorithm: "xdelta3".to_string(),
            files: vec![FilePatchDiff {
                source_path: "patchable".to_string(),
                target_path: "patchable".to_string(),
                md5_source: md5(2),
                md5_target: md5(5),
                chunks: vec![chunk(9)],
                product_id: "10".to_string(),
            }],
            client_id: String::new(),
            client_secret: String::new(),
        };

        let diff = compare(&new, Some(&old), Some(&patch));

        assert_eq!(
            diff.new.iter().map(|i| i.path()).collect::<Vec<_>>(),
            vec!["added"]
        );
        assert_eq!(
            diff.changed.iter().map(|i| i.path()).collect::<Vec<_>>(),
            vec!["changed"]
        );
        assert_eq!(diff.patched.len(), 1);
        assert_eq!(diff.patched[0].target_path, "patchable");
        assert_eq!(diff.deleted, vec!["removed"]);
    }

    #[test]
    fn stale_patch_source_falls_back_to_full_download() {
        let old = vec![file("f", &md5(1), 1)];
        let new = vec![file("f", &md5(2), 1)];
        let patch = Patch {
            algorithm: "xdelta3".to_string(),
            files: vec![FilePatchDiff {
                source_path: "f".to_string(),
                target_path: "f".to_string(),
                // Source md5 does not match what is installed.
                md5_source: md5(9),
                md5_target: md5(2),
                chunks: vec![],
                product_id: "10".to_string(),
            }],
            client_id: String::new(),
            client_secret: String::new(),
        };

        let diff = compare(&new, Some(&old), Some(&patch));
        assert!(diff.patched.is_empty());
        assert_eq!(diff.changed.len(), 1);
    }

    #[test]
    fn size_change_with_same_md5_is_changed() {
        let mut old_item = file("f", &md5(1), 1);
        if let DepotItem::V2File(f) = &mut old_item {
            f.chunks[0].size_uncompressed = 999;
        }
        let new = vec![file("f", &md5(1), 1)];

        let diff = compare(&new, Some(std::slice::from_ref(&old_item)), None);
        assert_eq!(diff.changed.len(), 1);
    }
}
