//! External tool detection.
//!
//! The [`ToolRegistry`] resolves the locations of the CLI tools the engine
//! shells out to: `ffmpeg` for encoding and `nvidia-smi` for GPU detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tc_core::config::ToolsConfig;

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &["ffmpeg", "nvidia-smi"];

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of the tool's version output, if available.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool paths.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Discover tools, preferring configured paths that exist and falling
    /// back to `PATH`. Tools that are not found are omitted.
    pub fn discover(config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom = match name {
                "ffmpeg" => config.ffmpeg.as_deref(),
                "nvidia-smi" => config.nvidia_smi.as_deref(),
                _ => None,
            };

            let resolved = match custom {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!("Configured {name} path {} does not exist", p.display());
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tools.insert(name.to_string(), path);
            }
        }

        Self { tools }
    }

    /// Registry with explicit paths (no discovery).
    pub fn with_paths(paths: impl IntoIterator<Item = (&'static str, PathBuf)>) -> Self {
        Self {
            tools: paths
                .into_iter()
                .map(|(name, path)| (name.to_string(), path))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.tools.get(name).map(PathBuf::as_path)
    }

    /// Path to `name`, or [`tc_core::Error::Tool`] if it was not found.
    pub fn require(&self, name: &str) -> tc_core::Result<&Path> {
        self.get(name).ok_or_else(|| {
            tc_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(name, path),
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

fn detect_version(name: &str, path: &Path) -> Option<String> {
    let version_arg = match name {
        "ffmpeg" => "-version",
        _ => "--version",
    };

    let output = std::process::Command::new(path)
        .arg(version_arg)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
