use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub struct Config;

impl Config {
    /// Get the database file path
    pub fn db_path() -> Result<PathBuf> {
        ProjectDirs::from("dev", "gh-harvest", "gh-harvest")
            .map(|dirs| dirs.data_dir().join("repos.db"))
            .context("Could not determine data directory")
    }

    /// Get GitHub token from environment or gh CLI config
    pub fn github_token() -> Option<String> {
        for var in ["GITHUB_TOKEN", "GH_TOKEN"] {
            if let Ok(token) = std::env::var(var) {
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }

        // Fall back to the gh CLI's stored credentials
        if let Ok(output) = std::process::Command::new("gh")
            .args(["auth", "token"])
            .output()
        {
            if output.status.success() {
                let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }

        None
    }
}
