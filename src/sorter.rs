//! Ordering of confirmed duplicate groups.
//!
//! Inside every group favourite files have absolute priority, then the
//! configured secondary key decides which copy a user would keep.
//! Groups themselves are presented biggest first.

use std::cmp::Ordering;

use crate::{DuplicateGroup, FileEntry, SortOrder};

/// Sorts files inside each group and the groups themselves, in place.
///
/// The composite in-group key is (favourite first, secondary, tertiary)
/// with a lexicographic path comparison breaking any remaining tie, so
/// the output is deterministic for a given input set. Groups are then
/// ordered by descending file size.
pub fn sort_groups(groups: &mut [DuplicateGroup], sort_order: SortOrder) {
    for group in groups.iter_mut() {
        group.files.sort_by(|a, b| compare_files(a, b, sort_order));
    }

    groups.sort_by(|a, b| {
        b.size
            .cmp(&a.size)
            .then_with(|| first_path(a).cmp(first_path(b)))
    });
}

fn compare_files(a: &FileEntry, b: &FileEntry, sort_order: SortOrder) -> Ordering {
    // true sorts before false: favourites are never interleaved with
    // non-favourites
    b.is_favourite
        .cmp(&a.is_favourite)
        .then_with(|| match sort_order {
            SortOrder::ShortestPath => a
                .depth
                .cmp(&b.depth)
                .then_with(|| a.name.len().cmp(&b.name.len())),
            SortOrder::ShortestFilename => a
                .name
                .len()
                .cmp(&b.name.len())
                .then_with(|| a.depth.cmp(&b.depth)),
        })
        .then_with(|| a.path.cmp(&b.path))
}

fn first_path(group: &DuplicateGroup) -> &std::path::Path {
    group
        .files
        .first()
        .map(|f| f.path.as_path())
        .unwrap_or_else(|| std::path::Path::new(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(path: &str, favourite: bool) -> FileEntry {
        let mut entry = FileEntry::new(PathBuf::from(path), 10);
        entry.is_favourite = favourite;
        entry
    }

    fn sized_group(size: u64, paths: &[&str]) -> DuplicateGroup {
        let files = paths
            .iter()
            .map(|p| FileEntry::new(PathBuf::from(p), size))
            .collect();
        DuplicateGroup::new(files)
    }

    #[test]
    fn test_favourites_come_first_despite_deeper_path() {
        let keep = entry("/fav/deep/keep.jpg", true);
        let del = entry("/normal/del.jpg", false);
        let mut groups = vec![DuplicateGroup::new(vec![del, keep])];

        sort_groups(&mut groups, SortOrder::ShortestPath);

        assert_eq!(groups[0].files[0].name, "keep.jpg");
        assert!(groups[0].files[0].is_favourite);
        assert_eq!(groups[0].files[1].name, "del.jpg");
    }

    #[test]
    fn test_shortest_path_prefers_shallow_then_short_name() {
        let shallow = entry("/a/bbbbbbbb.txt", false);
        let deep = entry("/a/b/c/a.txt", false);
        let mut groups = vec![DuplicateGroup::new(vec![deep.clone(), shallow.clone()])];

        sort_groups(&mut groups, SortOrder::ShortestPath);
        assert_eq!(groups[0].files[0].path, shallow.path);

        let mut groups = vec![DuplicateGroup::new(vec![deep.clone(), shallow.clone()])];
        sort_groups(&mut groups, SortOrder::ShortestFilename);
        assert_eq!(groups[0].files[0].path, deep.path);
    }

    #[test]
    fn test_ties_break_on_path() {
        let b = entry("/a/b.txt", false);
        let a = entry("/a/a.txt", false);
        let mut groups = vec![DuplicateGroup::new(vec![b, a])];

        sort_groups(&mut groups, SortOrder::ShortestPath);

        assert_eq!(groups[0].files[0].name, "a.txt");
        assert_eq!(groups[0].files[1].name, "b.txt");
    }

    #[test]
    fn test_groups_ordered_by_descending_size() {
        let mut groups = vec![
            sized_group(10, &["/a/s1", "/a/s2"]),
            sized_group(1000, &["/a/l1", "/a/l2"]),
            sized_group(100, &["/a/m1", "/a/m2"]),
        ];

        sort_groups(&mut groups, SortOrder::ShortestPath);

        let sizes: Vec<u64> = groups.iter().map(|g| g.size).collect();
        assert_eq!(sizes, vec![1000, 100, 10]);
    }

    #[test]
    fn test_deterministic_order_for_equal_sizes() {
        let mut first = vec![
            sized_group(10, &["/x/a", "/x/b"]),
            sized_group(10, &["/y/a", "/y/b"]),
        ];
        let mut second = vec![
            sized_group(10, &["/y/a", "/y/b"]),
            sized_group(10, &["/x/a", "/x/b"]),
        ];

        sort_groups(&mut first, SortOrder::ShortestPath);
        sort_groups(&mut second, SortOrder::ShortestPath);

        let order = |groups: &[DuplicateGroup]| -> Vec<PathBuf> {
            groups.iter().map(|g| g.files[0].path.clone()).collect()
        };
        assert_eq!(order(&first), order(&second));
    }
}
