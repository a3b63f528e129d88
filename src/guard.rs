//! Containment of file references inside a sanctioned root directory.
//!
//! Every path handed to a filesystem call comes out of [`PathGuard::resolve`].
//! Each root gets its own guard type so a receipt name can never be checked
//! against the uploads root or the other way around.

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fmt,
    io,
    marker::PhantomData,
    path::{Component, Path, PathBuf},
};

/// Marker for a sanctioned root.
pub trait RootKind: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Profile picture uploads.
#[derive(Debug, Clone, Copy)]
pub enum Uploads {}

/// Invoice receipts.
#[derive(Debug, Clone, Copy)]
pub enum Receipts {}

impl RootKind for Uploads {
    const NAME: &'static str = "uploads";
}

impl RootKind for Receipts {
    const NAME: &'static str = "receipts";
}

/// A canonical absolute path verified to lie inside the root of `R`.
pub struct ContainedPath<R: RootKind> {
    path: PathBuf,
    _root: PhantomData<R>,
}

impl<R: RootKind> ContainedPath<R> {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl<R: RootKind> Clone for ContainedPath<R> {
    fn clone(&self) -> Self {
        Self { path: self.path.clone(), _root: PhantomData }
    }
}

impl<R: RootKind> fmt::Debug for ContainedPath<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContainedPath").field(&R::NAME).field(&self.path).finish()
    }
}

/// File reference persisted on a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "path", rename_all = "lowercase")]
pub enum StoredFile {
    #[default]
    Absent,
    Present(PathBuf),
}

impl StoredFile {
    pub fn path(&self) -> Option<&Path> {
        match self {
            StoredFile::Absent => None,
            StoredFile::Present(p) => Some(p),
        }
    }
}

pub struct PathGuard<R: RootKind> {
    root: PathBuf,
    _root: PhantomData<R>,
}

impl<R: RootKind> Clone for PathGuard<R> {
    fn clone(&self) -> Self {
        Self { root: self.root.clone(), _root: PhantomData }
    }
}

impl<R: RootKind> fmt::Debug for PathGuard<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathGuard").field("kind", &R::NAME).field("root", &self.root).finish()
    }
}

impl<R: RootKind> PathGuard<R> {
    /// Creates the root directory if needed and canonicalizes it once.
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root = dunce::canonicalize(root)?;
        Ok(Self { root, _root: PhantomData })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `candidate` (relative to the root, or absolute) to its canonical
    /// form and fails with `PathTraversal` unless it stays inside the root.
    pub fn resolve(&self, candidate: impl AsRef<Path>) -> AppResult<ContainedPath<R>> {
        let candidate = candidate.as_ref();
        if candidate.as_os_str().as_encoded_bytes().contains(&0) {
            return Err(AppError::PathTraversal);
        }
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let canonical = canonicalize(&joined).map_err(|e| {
            if is_unresolvable(&e) {
                AppError::NotFound
            } else {
                tracing::error!(root = R::NAME, candidate = %candidate.display(), error = %e, "path not resolvable");
                AppError::Internal("path not resolvable".into())
            }
        })?;
        // component-wise: "uploads-backup" does not start with "uploads"
        if !canonical.starts_with(&self.root) {
            tracing::warn!(root = R::NAME, candidate = %candidate.display(), "path escapes root");
            return Err(AppError::PathTraversal);
        }
        Ok(ContainedPath { path: canonical, _root: PhantomData })
    }

    /// Guards a stored reference. `Absent` short-circuits to `None` without
    /// touching the guard.
    pub fn resolve_stored(&self, stored: &StoredFile) -> AppResult<Option<ContainedPath<R>>> {
        match stored {
            StoredFile::Absent => Ok(None),
            StoredFile::Present(p) => self.resolve(p).map(Some),
        }
    }
}

/// Removes `.` and `..` without touching the filesystem. `..` never climbs
/// above the filesystem root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// A file used as a directory or a symlink loop: nothing can exist there.
#[cfg(unix)]
fn is_unresolvable(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENOTDIR) | Some(libc::ELOOP))
}

#[cfg(not(unix))]
fn is_unresolvable(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotADirectory
}

/// Lexical normalization followed by symlink resolution of the longest
/// existing prefix. The missing tail is appended as-is.
fn canonicalize(path: &Path) -> io::Result<PathBuf> {
    let normalized = normalize(path);
    let mut existing = normalized.as_path();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        match dunce::canonicalize(existing) {
            Ok(mut real) => {
                for name in tail.iter().rev() {
                    real.push(name);
                }
                return Ok(real);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        tail.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sandbox() -> (tempfile::TempDir, PathGuard<Uploads>) {
        let tmp = tempfile::tempdir().unwrap();
        let guard = PathGuard::<Uploads>::new(tmp.path().join("uploads")).unwrap();
        (tmp, guard)
    }

    #[test]
    fn relative_name_resolves_under_root() {
        let (_tmp, guard) = sandbox();
        fs::write(guard.root().join("u123.png"), b"png").unwrap();
        let p = guard.resolve("u123.png").unwrap();
        assert_eq!(p.as_path(), guard.root().join("u123.png"));
    }

    #[test]
    fn stored_absolute_reference_resolves() {
        let (_tmp, guard) = sandbox();
        let stored = guard.root().join("u123.png");
        fs::write(&stored, b"png").unwrap();
        let p = guard.resolve(&stored).unwrap();
        assert_eq!(fs::read(p.as_path()).unwrap(), b"png");
    }

    #[test]
    fn parent_escape_is_rejected() {
        let (_tmp, guard) = sandbox();
        let err = guard.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, AppError::PathTraversal));
        let abs = guard.root().join("../../etc/passwd");
        assert!(matches!(guard.resolve(abs).unwrap_err(), AppError::PathTraversal));
    }

    #[test]
    fn absolute_outside_is_rejected() {
        let (_tmp, guard) = sandbox();
        assert!(matches!(guard.resolve("/etc/hosts").unwrap_err(), AppError::PathTraversal));
    }

    #[test]
    fn root_itself_is_contained() {
        let (_tmp, guard) = sandbox();
        let p = guard.resolve(guard.root()).unwrap();
        assert_eq!(p.as_path(), guard.root());
        assert_eq!(guard.resolve(".").unwrap().as_path(), guard.root());
    }

    #[test]
    fn sibling_with_shared_prefix_is_rejected() {
        let (tmp, guard) = sandbox();
        let sibling = tmp.path().join("uploads-backup");
        fs::create_dir_all(&sibling).unwrap();
        fs::write(sibling.join("a.png"), b"x").unwrap();
        let err = guard.resolve(sibling.join("a.png")).unwrap_err();
        assert!(matches!(err, AppError::PathTraversal));
        assert!(matches!(guard.resolve("../uploads-backup/a.png").unwrap_err(), AppError::PathTraversal));
    }

    #[test]
    fn missing_file_inside_root_resolves() {
        let (_tmp, guard) = sandbox();
        let p = guard.resolve("nested/new.png").unwrap();
        assert_eq!(p.as_path(), guard.root().join("nested").join("new.png"));
    }

    #[test]
    fn dot_segments_inside_root_are_collapsed() {
        let (_tmp, guard) = sandbox();
        let p = guard.resolve("a/./b/../c.png").unwrap();
        assert_eq!(p.as_path(), guard.root().join("a").join("c.png"));
    }

    #[test]
    fn nul_byte_is_rejected() {
        let (_tmp, guard) = sandbox();
        assert!(matches!(guard.resolve("a\0.png").unwrap_err(), AppError::PathTraversal));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_pointing_outside_is_rejected() {
        let (tmp, guard) = sandbox();
        let outside = tmp.path().join("secret.txt");
        fs::write(&outside, b"secret").unwrap();
        std::os::unix::fs::symlink(&outside, guard.root().join("link.png")).unwrap();
        assert!(matches!(guard.resolve("link.png").unwrap_err(), AppError::PathTraversal));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_root_is_tolerated() {
        let (_tmp, guard) = sandbox();
        fs::write(guard.root().join("real.png"), b"x").unwrap();
        std::os::unix::fs::symlink(guard.root().join("real.png"), guard.root().join("alias.png")).unwrap();
        let p = guard.resolve("alias.png").unwrap();
        assert_eq!(p.as_path(), guard.root().join("real.png"));
    }

    #[test]
    fn absent_reference_skips_guard() {
        let (_tmp, guard) = sandbox();
        assert!(guard.resolve_stored(&StoredFile::Absent).unwrap().is_none());
        assert_eq!(StoredFile::default(), StoredFile::Absent);
    }

    #[test]
    fn file_used_as_directory_is_not_found() {
        let (_tmp, guard) = sandbox();
        fs::write(guard.root().join("f.pdf"), b"%PDF").unwrap();
        let err = guard.resolve("f.pdf/child").unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_is_not_found() {
        let (_tmp, guard) = sandbox();
        std::os::unix::fs::symlink(guard.root().join("b"), guard.root().join("a")).unwrap();
        std::os::unix::fs::symlink(guard.root().join("a"), guard.root().join("b")).unwrap();
        let err = guard.resolve("a/x.pdf").unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[test]
    fn normalize_does_not_climb_above_root() {
        assert_eq!(normalize(Path::new("/../../etc/passwd")), PathBuf::from("/etc/passwd"));
        assert_eq!(normalize(Path::new("/data/uploads/../../etc")), PathBuf::from("/etc"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn cases() -> u32 {
            if cfg!(feature = "proptests") { 1024 } else { 64 }
        }

        fn segment() -> impl Strategy<Value = String> {
            "[a-z0-9_-]{1,8}"
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(cases()))]

            #[test]
            fn nested_candidates_stay_under_root(segs in proptest::collection::vec(segment(), 1..5)) {
                let (_tmp, guard) = sandbox();
                let rel: PathBuf = segs.iter().collect();
                let p = guard.resolve(&rel).unwrap();
                prop_assert!(p.as_path().starts_with(guard.root()));
                let tail = p.as_path().strip_prefix(guard.root()).unwrap();
                prop_assert_eq!(tail, rel.as_path());
            }

            #[test]
            fn escaping_candidates_are_rejected(
                ups in 1usize..4,
                segs in proptest::collection::vec(segment(), 0..3),
            ) {
                let (_tmp, guard) = sandbox();
                let mut rel = PathBuf::new();
                // the sandbox root is always at least two levels deep
                for _ in 0..ups + 1 {
                    rel.push("..");
                }
                rel.push("escaped");
                for s in &segs {
                    rel.push(s);
                }
                let is_traversal = matches!(guard.resolve(&rel), Err(AppError::PathTraversal));
                prop_assert!(is_traversal);
            }
        }
    }
}
