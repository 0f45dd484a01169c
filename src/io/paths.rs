use crate::error::{RemixError, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "Remix", "remix-core").ok_or(RemixError::CacheDirUnavailable)
}

/// Root of the stem cache: `<cache_dir>/stems`.
pub fn stems_cache_dir() -> Result<PathBuf> {
    let mut p = PathBuf::from(project_dirs()?.cache_dir());
    p.push("stems");
    Ok(p)
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("settings.json"))
}
