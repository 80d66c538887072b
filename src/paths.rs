use crate::error::{NoteError, NoteResult};

/// Path of the root folder. Every note without a folder lives here.
pub const ROOT: &str = "/";

/// Hierarchy separator for folder paths.
pub const SEPARATOR: char = '/';

/// Label shown for the root entry of a breadcrumb trail.
pub const ROOT_LABEL: &str = "Root";

/// Normalizes a folder path into its canonical form.
///
/// The canonical form starts with `/`, has no empty segments and no trailing
/// separator (except for the root itself). An empty string means the root.
///
/// Rejects:
/// - "." or ".." segments
/// - "\\" anywhere in the path
pub fn normalize(path: &str) -> NoteResult<String> {
    if path.contains('\\') {
        return Err(NoteError::validation(format!(
            "Path '{}' contains invalid separator '\\'",
            path
        )));
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.trim().split(SEPARATOR).filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(NoteError::validation(format!(
                "Path '{}' contains invalid segment '{}'",
                path, segment
            )));
        }
        normalized.push(SEPARATOR);
        normalized.push_str(segment);
    }

    if normalized.is_empty() {
        normalized.push(SEPARATOR);
    }
    Ok(normalized)
}

/// Validates a single folder name and returns it trimmed.
///
/// A name is one path segment: it must be non-empty and may not contain a
/// separator or be a relative reference.
pub fn validate_segment(name: &str) -> NoteResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NoteError::validation("Folder name is required"));
    }
    if trimmed.contains(SEPARATOR) || trimmed.contains('\\') {
        return Err(NoteError::validation(format!(
            "Folder name '{}' may not contain path separators",
            trimmed
        )));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(NoteError::validation(format!(
            "Folder name '{}' is reserved",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Strips the last segment of a canonical path. The root has no parent.
pub fn parent_of(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind(SEPARATOR) {
        Some(0) | None => Some(ROOT),
        Some(index) => Some(&path[..index]),
    }
}

/// Last segment of a canonical path; empty for the root.
pub fn name_of(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(index) => &path[index + 1..],
        None => path,
    }
}

/// Joins a canonical parent path and a validated segment.
pub fn join(parent: &str, name: &str) -> String {
    if is_root(parent) {
        format!("{}{}", SEPARATOR, name)
    } else {
        format!("{}{}{}", parent, SEPARATOR, name)
    }
}

/// Number of segments below the root.
pub fn depth(path: &str) -> usize {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).count()
}

/// True when `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if is_root(ancestor) {
        return !is_root(path);
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with(SEPARATOR)
}

/// True when `path` is `ancestor` itself or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    path == ancestor || is_descendant(path, ancestor)
}

/// Substitutes the `old` prefix of `path` with `new`.
///
/// Returns `None` when `path` is neither `old` nor one of its descendants, so
/// callers can leave unrelated paths untouched.
pub fn rebase(path: &str, old: &str, new: &str) -> Option<String> {
    if path == old {
        return Some(new.to_string());
    }
    if !is_descendant(path, old) {
        return None;
    }
    let rest = if is_root(old) { path } else { &path[old.len()..] };
    if is_root(new) {
        Some(rest.to_string())
    } else {
        Some(format!("{}{}", new, rest))
    }
}

/// Folder a note belongs to. Notes without a folder live in the root.
pub fn assign_folder(folder: Option<&str>) -> NoteResult<String> {
    match folder {
        Some(path) if !path.trim().is_empty() => normalize(path),
        _ => Ok(ROOT.to_string()),
    }
}

/// One entry of a breadcrumb trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub label: String,
    pub path: String,
}

/// Lazily walks a canonical path from the root down to the path itself.
#[derive(Debug, Clone)]
pub struct Breadcrumbs<'a> {
    path: &'a str,
    cursor: Option<usize>,
}

impl<'a> Iterator for Breadcrumbs<'a> {
    type Item = Crumb;

    fn next(&mut self) -> Option<Crumb> {
        let start = self.cursor.take()?;
        if start == 0 {
            self.cursor = Some(1);
            return Some(Crumb {
                label: ROOT_LABEL.to_string(),
                path: ROOT.to_string(),
            });
        }

        let rest = self.path.get(start..)?;
        let start = start + (rest.len() - rest.trim_start_matches(SEPARATOR).len());
        if start >= self.path.len() {
            return None;
        }
        let end = self.path[start..]
            .find(SEPARATOR)
            .map(|offset| start + offset)
            .unwrap_or(self.path.len());
        if end < self.path.len() {
            self.cursor = Some(end);
        }
        Some(Crumb {
            label: self.path[start..end].to_string(),
            path: self.path[..end].to_string(),
        })
    }
}

/// Breadcrumb trail for a canonical path, root first.
pub fn breadcrumbs(path: &str) -> Breadcrumbs<'_> {
    Breadcrumbs {
        path,
        cursor: Some(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_handles_root_forms() {
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("  //  ").unwrap(), "/");
    }

    #[test]
    fn test_normalize_canonicalizes_separators() {
        assert_eq!(normalize("Work").unwrap(), "/Work");
        assert_eq!(normalize("/Work/").unwrap(), "/Work");
        assert_eq!(normalize("//Work//2024").unwrap(), "/Work/2024");
    }

    #[test]
    fn test_normalize_rejects_traversal() {
        assert!(normalize("/Work/../etc").unwrap_err().is_validation());
        assert!(normalize("/./Work").is_err());
        assert!(normalize("/Work\\2024").is_err());
    }

    #[test]
    fn test_validate_segment() {
        assert_eq!(validate_segment("  Work ").unwrap(), "Work");
        assert!(validate_segment("").is_err());
        assert!(validate_segment("   ").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("..").is_err());
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent_of("/"), None);
        assert_eq!(parent_of("/Work"), Some("/"));
        assert_eq!(parent_of("/Work/2024"), Some("/Work"));
        assert_eq!(name_of("/Work/2024"), "2024");
        assert_eq!(name_of("/"), "");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "Work"), "/Work");
        assert_eq!(join("/Work", "2024"), "/Work/2024");
    }

    #[test]
    fn test_descendant_requires_separator_boundary() {
        assert!(is_descendant("/Work/2024", "/Work"));
        assert!(!is_descendant("/Workshop", "/Work"));
        assert!(!is_descendant("/Work", "/Work"));
        assert!(is_descendant("/Work", "/"));
        assert!(!is_descendant("/", "/"));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("/Work", "/Work", "/Projects").as_deref(), Some("/Projects"));
        assert_eq!(
            rebase("/Work/2024/q1", "/Work", "/Projects").as_deref(),
            Some("/Projects/2024/q1")
        );
        assert_eq!(rebase("/Workshop", "/Work", "/Projects"), None);
        assert_eq!(rebase("/Home", "/Work", "/Projects"), None);
    }

    #[test]
    fn test_assign_folder_defaults_to_root() {
        assert_eq!(assign_folder(None).unwrap(), "/");
        assert_eq!(assign_folder(Some("")).unwrap(), "/");
        assert_eq!(assign_folder(Some("Work/")).unwrap(), "/Work");
    }

    #[test]
    fn test_breadcrumbs_root_only() {
        let crumbs: Vec<Crumb> = breadcrumbs("/").collect();
        assert_eq!(
            crumbs,
            vec![Crumb {
                label: "Root".to_string(),
                path: "/".to_string()
            }]
        );
    }

    #[test]
    fn test_breadcrumbs_nested() {
        let crumbs: Vec<(String, String)> = breadcrumbs("/Work/2024/q1")
            .map(|c| (c.label, c.path))
            .collect();
        assert_eq!(
            crumbs,
            vec![
                ("Root".to_string(), "/".to_string()),
                ("Work".to_string(), "/Work".to_string()),
                ("2024".to_string(), "/Work/2024".to_string()),
                ("q1".to_string(), "/Work/2024/q1".to_string()),
            ]
        );
    }

    #[test]
    fn test_breadcrumbs_empty_and_slash_only_are_root() {
        let root = vec![Crumb {
            label: "Root".to_string(),
            path: "/".to_string(),
        }];
        assert_eq!(breadcrumbs("").collect::<Vec<_>>(), root);
        assert_eq!(breadcrumbs("//").collect::<Vec<_>>(), root);
    }

    #[test]
    fn test_breadcrumbs_ignore_trailing_separator() {
        let paths: Vec<String> = breadcrumbs("/a/").map(|c| c.path).collect();
        assert_eq!(paths, vec!["/", "/a"]);
    }

    fn canonical_path() -> impl Strategy<Value = String> {
        proptest::collection::vec("[a-zA-Z0-9_-]{1,8}", 1..5)
            .prop_map(|segments| format!("/{}", segments.join("/")))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Joining a parent and a segment always yields a path whose parent is
        /// that parent and whose name is that segment.
        #[test]
        fn prop_join_inverts_parent_of(parent in canonical_path(), name in "[a-zA-Z0-9_-]{1,8}") {
            let child = join(&parent, &name);
            prop_assert_eq!(parent_of(&child), Some(parent.as_str()));
            prop_assert_eq!(name_of(&child), name.as_str());
            prop_assert_eq!(depth(&child), depth(&parent) + 1);
        }

        /// Normalizing a canonical path is the identity.
        #[test]
        fn prop_normalize_is_idempotent(path in canonical_path()) {
            let once = normalize(&path).unwrap();
            prop_assert_eq!(&once, &path);
            prop_assert_eq!(normalize(&once).unwrap(), once);
        }

        /// Rebasing moves exactly the paths under the old prefix.
        #[test]
        fn prop_rebase_only_touches_prefix(
            old in canonical_path(),
            new in canonical_path(),
            other in canonical_path(),
            tail in "[a-zA-Z0-9_-]{1,8}",
        ) {
            let descendant = join(&old, &tail);
            prop_assert_eq!(rebase(&descendant, &old, &new), Some(join(&new, &tail)));
            if !is_within(&other, &old) {
                prop_assert_eq!(rebase(&other, &old, &new), None);
            }
        }

        /// The last breadcrumb is the path itself and every crumb is the
        /// parent of the next one.
        #[test]
        fn prop_breadcrumbs_chain_parents(path in canonical_path()) {
            let crumbs: Vec<Crumb> = breadcrumbs(&path).collect();
            prop_assert_eq!(crumbs.len(), depth(&path) + 1);
            prop_assert_eq!(&crumbs.last().unwrap().path, &path);
            for pair in crumbs.windows(2) {
                prop_assert_eq!(parent_of(&pair[1].path), Some(pair[0].path.as_str()));
            }
        }
    }
}
