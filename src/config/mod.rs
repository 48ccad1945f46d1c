pub mod interpolate;
pub mod model;
pub mod resolve;
pub mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::bail;

use crate::orchestrator::ready::ReadinessPolicy;
use interpolate::{build_template_vars, resolve_stack_templates};
use model::{AppSettings, ComponentKind, ComponentSpec, DeployerSpec, Features, StackConfig, StackFile};
use resolve::{resolve_data_dir, resolve_root};
use validate::validate;

pub const DEFAULT_HOST: &str = "127.0.0.1";

/// What the command line contributes to a [`StackConfig`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub file: Option<PathBuf>,
    pub root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub features: Features,
    pub host: Option<String>,
    pub skip_apps: Vec<String>,
    pub deployer_key: Option<String>,
    pub teardown_on_failure: bool,
}

pub fn load_stack_file(path: &Path) -> anyhow::Result<(StackFile, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let file: StackFile = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok((file, content))
}

/// Build the immutable configuration for a run from CLI options and the
/// optional `stackrig.toml`.
pub fn load(opts: LoadOptions) -> anyhow::Result<StackConfig> {
    let (root, file_path) = resolve_root(opts.file.as_deref(), opts.root.as_deref())?;
    let (file, source) = match &file_path {
        Some(path) => load_stack_file(path)?,
        None => (StackFile::default(), String::new()),
    };
    let data_dir = resolve_data_dir(opts.data_dir.as_deref(), file.data_dir.as_deref(), &root)?;
    let host = opts
        .host
        .or_else(|| file.host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let mut components: BTreeMap<ComponentKind, ComponentSpec> = ComponentKind::ALL
        .into_iter()
        .map(|kind| (kind, ComponentSpec::builtin(kind)))
        .collect();
    for (name, component) in &file.components {
        if let Some(spec) = ComponentKind::from_name(name).and_then(|k| components.get_mut(&k)) {
            component.apply(spec);
        }
    }

    if let Some(path) = &file_path {
        let enabled_ports: BTreeMap<ComponentKind, u16> = components
            .iter()
            .filter(|(kind, _)| opts.features.is_enabled(**kind))
            .map(|(kind, spec)| (*kind, spec.port))
            .collect();
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| resolve::STACK_FILE.to_string());

        if let Err(errors) = validate(&file, &enabled_ports, &source, &filename) {
            let mut msg = String::new();
            for err in errors {
                let report: miette::Report = err.into();
                msg.push_str(&format!("{:?}\n", report));
            }
            bail!("{} is invalid:\n{}", filename, msg.trim_end());
        }
    }

    let mut readiness = ReadinessPolicy::default();
    if let Some(overrides) = &file.readiness {
        overrides.apply(&mut readiness);
    }

    let mut deployer = DeployerSpec::default();
    if let Some(overrides) = &file.contracts {
        overrides.apply(&mut deployer);
    }
    deployer.key = opts.deployer_key;

    let all_ports = components.iter().map(|(k, s)| (*k, s.port)).collect();
    let vars = build_template_vars(&root, &data_dir, &host, &all_ports);
    if let Err(errors) = resolve_stack_templates(&mut components, &mut deployer, &root, &vars) {
        let mut msg = String::from("Template errors:\n");
        for err in &errors {
            msg.push_str(&format!("  - {}\n", err));
        }
        bail!("{}", msg.trim_end());
    }

    let apps_file = file.apps.unwrap_or_default();
    let apps_dir = apps_file
        .dir
        .map(|dir| root.join(crate::platform::expand_home(&dir)))
        .unwrap_or_else(|| root.join("apps"));
    let skip: BTreeSet<String> = apps_file
        .skip
        .into_iter()
        .chain(opts.skip_apps)
        .collect();

    Ok(StackConfig {
        features: opts.features,
        root_dir: root,
        data_dir,
        host,
        components,
        deployer,
        apps: AppSettings {
            dir: apps_dir,
            skip,
        },
        readiness,
        teardown_on_failure: opts.teardown_on_failure,
    })
}

/// Resolve only where a stack lives, for commands that act on a stack that
/// is already running (`status`, `stop`).
pub fn locate_data_dir(
    file: Option<&Path>,
    root: Option<&Path>,
    data_dir: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    let (root, file_path) = resolve_root(file, root)?;
    let file_data_dir = match &file_path {
        Some(path) => load_stack_file(path)?.0.data_dir,
        None => None,
    };
    resolve_data_dir(data_dir, file_data_dir.as_deref(), &root)
}
