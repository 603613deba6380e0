//! Rewriting decryption targets with rendered content
//!
//! Two modes are available:
//!
//! - [`RewriteMode::Atomic`] renders fully in memory, writes a temporary file
//!   next to the target and renames it over the target. A failure at any step
//!   leaves the target as it was and removes the temporary file. A symlinked
//!   target is followed, so the file it points to is replaced.
//! - [`RewriteMode::InPlace`] truncates the target and writes the render into
//!   it. A failure leaves the target empty or partially written.

use crate::secrets::RenderContext;
use crate::template::{RenderError, Template};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// How a rendered target replaces its previous content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewriteMode {
    /// Temporary file plus rename.
    #[default]
    Atomic,
    /// Truncate and write the target directly.
    InPlace,
}

impl std::fmt::Display for RewriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Atomic => write!(f, "atomic"),
            Self::InPlace => write!(f, "in-place"),
        }
    }
}

/// Read and parse a target's current content as its template.
///
/// # Errors
///
/// Returns [`Error::TargetRead`] or [`Error::TemplateParse`], naming `target`.
pub fn load_template(target: &str, path: &Path) -> Result<Template> {
    let source = fs::read(path).map_err(|source| Error::TargetRead {
        target: target.to_string(),
        source,
    })?;
    Template::parse(target, &source).map_err(|source| Error::TemplateParse {
        target: target.to_string(),
        source,
    })
}

/// Render `template` and replace the target at `path` in the given mode.
///
/// # Errors
///
/// Returns the render or file error for `target`; see [`rewrite_atomic`] and
/// [`rewrite_in_place`].
pub fn rewrite(
    target: &str,
    path: &Path,
    template: &Template,
    ctx: &RenderContext<'_>,
    mode: RewriteMode,
) -> Result<()> {
    match mode {
        RewriteMode::Atomic => {
            let rendered = template.render(ctx).map_err(|source| Error::Render {
                target: target.to_string(),
                source,
            })?;
            rewrite_atomic(target, path, &rendered)
        }
        RewriteMode::InPlace => rewrite_in_place(target, path, template, ctx),
    }
}

/// Replace the file at `path` with `rendered` via a temporary file and rename.
///
/// The replacement keeps the original file's permissions. When `path` is a
/// symlink the link is kept and the file it resolves to is replaced.
///
/// # Errors
///
/// - [`Error::FileOpen`] if the symlink cannot be resolved or the temporary
///   file cannot be created
/// - [`Error::FileWrite`] if writing it or copying permissions fails
/// - [`Error::FileClose`] if syncing it to disk fails
/// - [`Error::FileReplace`] if the rename fails
pub fn rewrite_atomic(target: &str, path: &Path, rendered: &[u8]) -> Result<()> {
    let path = &replacement_path(path).map_err(|source| Error::FileOpen {
        target: target.to_string(),
        source,
    })?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = NamedTempFile::new_in(dir).map_err(|source| Error::FileOpen {
        target: target.to_string(),
        source,
    })?;

    temp.write_all(rendered).map_err(|source| Error::FileWrite {
        target: target.to_string(),
        source,
    })?;

    if let Ok(metadata) = fs::metadata(path) {
        temp.as_file()
            .set_permissions(metadata.permissions())
            .map_err(|source| Error::FileWrite {
                target: target.to_string(),
                source,
            })?;
    }

    temp.as_file()
        .sync_all()
        .map_err(|source| Error::FileClose {
            target: target.to_string(),
            source,
        })?;

    // On failure the returned NamedTempFile is dropped, deleting it.
    temp.persist(path).map_err(|e| Error::FileReplace {
        target: target.to_string(),
        source: e.error,
    })?;

    tracing::debug!(
        target_path = %target,
        bytes = rendered.len(),
        "Replaced decryption target"
    );
    Ok(())
}

/// The file a rename must replace: the symlink's destination, or `path` itself.
fn replacement_path(path: &Path) -> std::io::Result<PathBuf> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::canonicalize(path),
        _ => Ok(path.to_path_buf()),
    }
}

/// Truncate the existing file at `path` and write the render into it.
///
/// The handle is flushed and closed on every path. When rendering fails and
/// closing fails too, both are reported as [`Error::RenderAndClose`].
///
/// # Errors
///
/// - [`Error::FileOpen`] if the target cannot be opened for writing
/// - [`Error::Render`] / [`Error::RenderAndClose`] if rendering fails
/// - [`Error::FileWrite`] if writing rendered bytes fails
/// - [`Error::FileClose`] if the final flush to disk fails
pub fn rewrite_in_place(
    target: &str,
    path: &Path,
    template: &Template,
    ctx: &RenderContext<'_>,
) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|source| Error::FileOpen {
            target: target.to_string(),
            source,
        })?;

    let mut writer = BufWriter::new(file);
    let rendered = template.render_to(ctx, &mut writer);
    let closed = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .and_then(|file| file.sync_all());

    finish_in_place(target, rendered, closed)?;
    tracing::debug!(target_path = %target, "Rewrote decryption target in place");
    Ok(())
}

/// Combine the render and close outcomes of an in-place rewrite.
///
/// A render failure takes precedence; a close failure alongside it is kept
/// in [`Error::RenderAndClose`]. A failed write is [`Error::FileWrite`].
fn finish_in_place(
    target: &str,
    rendered: std::result::Result<(), RenderError>,
    closed: std::io::Result<()>,
) -> Result<()> {
    let target = target.to_string();
    match (rendered, closed) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(source)) => Err(Error::FileClose { target, source }),
        (Err(RenderError::Io(source)), _) => Err(Error::FileWrite { target, source }),
        (Err(render), Ok(())) => Err(Error::Render {
            target,
            source: render,
        }),
        (Err(render), Err(close)) => Err(Error::RenderAndClose {
            target,
            render,
            close,
        }),
    }
}
