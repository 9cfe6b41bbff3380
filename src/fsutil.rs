//! Small filesystem helpers shared by the job store and the build cache

use crate::error::{SwsError, SwsResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Sibling temp path that no other writer will pick
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Write `contents` to `path` so readers see either the old or the new file
pub async fn write_atomic(path: &Path, contents: &[u8]) -> SwsResult<()> {
    let tmp = temp_sibling(path);
    fs::write(&tmp, contents)
        .await
        .map_err(|e| SwsError::io(format!("writing {}", tmp.display()), e))?;
    rename_into_place(&tmp, path).await
}

/// Copy `src` to `dst` so readers never observe a partial `dst`
pub async fn copy_atomic(src: &Path, dst: &Path) -> SwsResult<()> {
    let tmp = temp_sibling(dst);
    fs::copy(src, &tmp).await.map_err(|e| {
        SwsError::io(
            format!("copying {} to {}", src.display(), tmp.display()),
            e,
        )
    })?;
    rename_into_place(&tmp, dst).await
}

async fn rename_into_place(tmp: &Path, dst: &Path) -> SwsResult<()> {
    if let Err(e) = fs::rename(tmp, dst).await {
        let _ = fs::remove_file(tmp).await;
        return Err(SwsError::io(format!("renaming into {}", dst.display()), e));
    }
    Ok(())
}

/// Remove a directory tree, treating "already gone" as success
pub async fn remove_dir_if_exists(path: &Path) -> SwsResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SwsError::io(format!("removing {}", path.display()), e)),
    }
}

/// Remove a file, treating "already gone" as success
pub async fn remove_file_if_exists(path: &Path) -> SwsResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SwsError::io(format!("removing {}", path.display()), e)),
    }
}
