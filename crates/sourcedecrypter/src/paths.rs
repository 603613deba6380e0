//! Target path resolution and containment checks

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// What to do with targets that resolve outside the application root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainmentPolicy {
    /// Process escaping targets as declared and log a warning.
    #[default]
    Warn,
    /// Reject escaping targets before anything is decrypted.
    Enforce,
}

/// Join `target` under `app_dir`.
///
/// A leading root or prefix on `target` is dropped, so an absolute-looking
/// target still lands under the application root.
#[must_use]
pub fn resolve_target(app_dir: &Path, target: &str) -> PathBuf {
    let mut path = app_dir.to_path_buf();
    for component in Path::new(target).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            other => path.push(other),
        }
    }
    path
}

/// Whether `target`, joined by [`resolve_target`], lexically leaves the root.
///
/// A leading root or prefix is ignored as it is when joining, so only `..`
/// components can escape.
#[must_use]
pub fn escapes_root(target: &str) -> bool {
    let mut depth: usize = 0;
    for component in Path::new(target).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            },
            Component::Normal(_) => depth += 1,
        }
    }
    false
}

/// Check every declared target lexically against `policy`.
///
/// # Errors
///
/// Returns [`Error::PathEscape`] for the first escaping target under
/// [`ContainmentPolicy::Enforce`].
pub fn check_targets(app_dir: &Path, targets: &[String], policy: ContainmentPolicy) -> Result<()> {
    for target in targets {
        if !escapes_root(target) {
            continue;
        }
        match policy {
            ContainmentPolicy::Warn => {
                tracing::warn!(
                    target_path = %target,
                    app_dir = %app_dir.display(),
                    "Decryption target is not contained in the application directory"
                );
            }
            ContainmentPolicy::Enforce => {
                return Err(Error::PathEscape {
                    target: target.clone(),
                    root: app_dir.to_path_buf(),
                });
            }
        }
    }
    Ok(())
}

/// Check that an existing resolved target is inside the canonical root.
///
/// Catches symlinks that lead out of the application directory. Missing
/// paths are left to the read step to report.
///
/// # Errors
///
/// Returns [`Error::PathEscape`] when the canonical target is outside the
/// canonical root.
pub fn verify_canonical(app_dir: &Path, target: &str, resolved: &Path) -> Result<()> {
    let (Ok(root), Ok(canonical)) = (
        std::fs::canonicalize(app_dir),
        std::fs::canonicalize(resolved),
    ) else {
        return Ok(());
    };

    if canonical.starts_with(&root) {
        tracing::trace!(
            target_path = %target,
            canonical = %canonical.display(),
            "Verified target is inside application directory"
        );
        Ok(())
    } else {
        Err(Error::PathEscape {
            target: target.to_string(),
            root: app_dir.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_target_joins_under_root() {
        let root = Path::new("/srv/app");
        assert_eq!(
            resolve_target(root, "config/app.yaml"),
            PathBuf::from("/srv/app/config/app.yaml")
        );
        assert_eq!(
            resolve_target(root, "./app.yaml"),
            PathBuf::from("/srv/app/app.yaml")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_target_drops_leading_root() {
        assert_eq!(
            resolve_target(Path::new("/srv/app"), "/etc/app.yaml"),
            PathBuf::from("/srv/app/etc/app.yaml")
        );
    }

    #[test]
    fn test_resolve_target_keeps_parent_components() {
        assert_eq!(
            resolve_target(Path::new("/srv/app"), "../other/x"),
            PathBuf::from("/srv/app/../other/x")
        );
    }

    #[test]
    fn test_escapes_root() {
        assert!(!escapes_root("app.yaml"));
        assert!(!escapes_root("a/../b.yaml"));
        assert!(!escapes_root("./a/./b"));
        assert!(escapes_root("../secret"));
        assert!(escapes_root("a/../../secret"));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_targets_agree_with_resolution() {
        let root = Path::new("/srv/app");
        assert!(!escapes_root("/etc/app.yaml"));
        assert!(resolve_target(root, "/etc/app.yaml").starts_with(root));

        assert!(escapes_root("/../etc/app.yaml"));
        assert!(
            check_targets(root, &["/etc/app.yaml".to_string()], ContainmentPolicy::Enforce).is_ok()
        );
    }

    #[test]
    fn test_check_targets_warn_allows_escape() {
        let targets = vec!["ok.yaml".to_string(), "../escape.yaml".to_string()];
        assert!(check_targets(Path::new("/srv/app"), &targets, ContainmentPolicy::Warn).is_ok());
    }

    #[test]
    fn test_check_targets_enforce_rejects_escape() {
        let targets = vec!["ok.yaml".to_string(), "../escape.yaml".to_string()];
        let err =
            check_targets(Path::new("/srv/app"), &targets, ContainmentPolicy::Enforce).unwrap_err();
        assert_eq!(err.target(), Some("../escape.yaml"));
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_canonical_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("real.yaml"), "x").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("real.yaml"),
            root.path().join("link.yaml"),
        )
        .unwrap();

        let resolved = resolve_target(root.path(), "link.yaml");
        assert!(matches!(
            verify_canonical(root.path(), "link.yaml", &resolved),
            Err(Error::PathEscape { .. })
        ));
    }

    #[test]
    fn test_verify_canonical_accepts_inside_and_missing() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("in.yaml"), "x").unwrap();

        let inside = resolve_target(root.path(), "in.yaml");
        assert!(verify_canonical(root.path(), "in.yaml", &inside).is_ok());

        let missing = resolve_target(root.path(), "missing.yaml");
        assert!(verify_canonical(root.path(), "missing.yaml", &missing).is_ok());
    }

    #[test]
    fn test_policy_serde() {
        let policy: ContainmentPolicy = serde_json::from_str("\"enforce\"").unwrap();
        assert_eq!(policy, ContainmentPolicy::Enforce);
        assert_eq!(ContainmentPolicy::default(), ContainmentPolicy::Warn);
    }
}
