use std::path::PathBuf;

use anyhow::Context;
use tracing::{debug, info};

use crate::config::model::{AppManifest, AppSettings};

pub const APP_MANIFEST: &str = "stackrig.app.toml";

/// An application found under the apps directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredApp {
    pub manifest: AppManifest,
    /// Directory holding the manifest; the app runs from here.
    pub dir: PathBuf,
}

impl DiscoveredApp {
    /// Registry name, kept apart from component names.
    pub fn process_name(&self) -> String {
        format!("app:{}", self.manifest.name)
    }
}

/// Find every `<apps dir>/*/stackrig.app.toml`, sorted by directory name.
///
/// Disabled apps and apps named in `skip` are left out. A missing apps
/// directory means there are no apps.
pub fn discover(settings: &AppSettings) -> anyhow::Result<Vec<DiscoveredApp>> {
    if !settings.dir.is_dir() {
        debug!(dir = %settings.dir.display(), "no apps directory");
        return Ok(Vec::new());
    }

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(&settings.dir)
        .with_context(|| format!("reading apps directory {}", settings.dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.join(APP_MANIFEST).is_file())
        .collect();
    dirs.sort();

    let mut apps = Vec::new();
    for dir in dirs {
        let manifest = AppManifest::load(&dir.join(APP_MANIFEST))?;
        if !manifest.enabled {
            info!(app = %manifest.name, "app disabled, skipping");
            continue;
        }
        if settings.skip.contains(&manifest.name) {
            info!(app = %manifest.name, "app skipped by request");
            continue;
        }
        apps.push(DiscoveredApp { manifest, dir });
    }
    Ok(apps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_app(root: &Path, dir: &str, manifest: &str) {
        let dir = root.join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(APP_MANIFEST), manifest).unwrap();
    }

    fn settings(dir: &Path, skip: &[&str]) -> AppSettings {
        AppSettings {
            dir: dir.to_path_buf(),
            skip: skip.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn missing_directory_has_no_apps() {
        let tmp = TempDir::new().unwrap();
        let apps = discover(&settings(&tmp.path().join("apps"), &[])).unwrap();
        assert!(apps.is_empty());
    }

    #[test]
    fn discovers_in_directory_order_and_skips_disabled() {
        let tmp = TempDir::new().unwrap();
        write_app(tmp.path(), "wallet", "name = \"wallet\"\ncommand = \"bun\"\nport = 4015\n");
        write_app(tmp.path(), "bazaar", "name = \"bazaar\"\ncommand = \"bun\"\nargs = [\"run\", \"dev\"]\n");
        write_app(tmp.path(), "legacy", "name = \"legacy\"\ncommand = \"bun\"\nenabled = false\n");
        write_app(tmp.path(), "docs", "name = \"docs\"\ncommand = \"bun\"\n");
        // No manifest: not an app.
        std::fs::create_dir_all(tmp.path().join("shared")).unwrap();

        let apps = discover(&settings(tmp.path(), &["docs"])).unwrap();
        let names: Vec<String> = apps.iter().map(DiscoveredApp::process_name).collect();
        assert_eq!(names, vec!["app:bazaar", "app:wallet"]);
        assert_eq!(apps[0].dir, tmp.path().join("bazaar"));
        assert_eq!(apps[1].manifest.port, Some(4015));
    }

    #[test]
    fn malformed_manifest_is_an_error() {
        let tmp = TempDir::new().unwrap();
        write_app(tmp.path(), "broken", "name = \"broken\"\n");
        let err = discover(&settings(tmp.path(), &[])).unwrap_err();
        assert!(err.to_string().contains("stackrig.app.toml"));
    }
}
