use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::config::model::{ComponentKind, ComponentSpec, DeployerSpec};

/// Minimum Jaro-Winkler score to consider a template variable a close match.
const TEMPLATE_SUGGESTION_THRESHOLD: f64 = 0.8;

/// Compiled pattern matching `{{ l2.ws_port }}` or `{{ storage-worker.port }}`.
static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([\w.-]+)\s*\}\}").expect("template regex must compile")
});

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unresolved variable '{{{{{{ {variable} }}}}}}' in {field}{}", suggestion.as_ref().map(|s| format!(" (did you mean `{}`?)", s)).unwrap_or_default())]
    UnresolvedVariable {
        field: String,
        variable: String,
        suggestion: Option<String>,
    },
}

fn find_closest_template_var<'a>(name: &str, vars: &'a HashMap<String, String>) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for key in vars.keys() {
        let score = strsim::jaro_winkler(name, key);
        if score >= TEMPLATE_SUGGESTION_THRESHOLD && best.is_none_or(|(_, s)| score > s) {
            best = Some((key.as_str(), score));
        }
    }
    best.map(|(name, _)| name)
}

/// Resolve all `{{ var }}` expressions in `input` using `vars`.
///
/// Every unresolved reference is reported, not just the first.
pub fn resolve_template(
    input: &str,
    vars: &HashMap<String, String>,
    field_context: &str,
) -> Result<String, Vec<TemplateError>> {
    let errors: Vec<TemplateError> = TEMPLATE_RE
        .captures_iter(input)
        .filter_map(|cap| {
            let variable = cap[1].to_string();
            if vars.contains_key(&variable) {
                None
            } else {
                let suggestion = find_closest_template_var(&variable, vars).map(String::from);
                Some(TemplateError::UnresolvedVariable {
                    field: field_context.to_string(),
                    variable,
                    suggestion,
                })
            }
        })
        .collect();

    if !errors.is_empty() {
        return Err(errors);
    }

    let resolved = TEMPLATE_RE
        .replace_all(input, |cap: &regex::Captures| {
            vars.get(&cap[1]).cloned().unwrap_or_default()
        })
        .into_owned();

    Ok(resolved)
}

/// Build the lookup table for launch arguments.
///
/// Produced keys:
///   - `root`, `data_dir`, `host`
///   - `{component}.port` for every component
///   - `l2.ws_port`
pub fn build_template_vars(
    root: &Path,
    data_dir: &Path,
    host: &str,
    ports: &BTreeMap<ComponentKind, u16>,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("root".to_string(), root.to_string_lossy().to_string());
    vars.insert("data_dir".to_string(), data_dir.to_string_lossy().to_string());
    vars.insert("host".to_string(), host.to_string());

    for (kind, port) in ports {
        vars.insert(format!("{}.port", kind.name()), port.to_string());
    }
    if let Some(l2) = ports.get(&ComponentKind::L2) {
        vars.insert("l2.ws_port".to_string(), l2.saturating_add(1).to_string());
    }

    vars
}

/// Collects errors across many fields so they can be reported together.
struct Resolver<'a> {
    vars: &'a HashMap<String, String>,
    errors: Vec<TemplateError>,
}

impl Resolver<'_> {
    fn string(&mut self, value: &mut String, field: &str) {
        match resolve_template(value, self.vars, field) {
            Ok(resolved) => *value = resolved,
            Err(mut errs) => self.errors.append(&mut errs),
        }
    }

    fn list(&mut self, values: &mut [String], field: &str) {
        for (i, value) in values.iter_mut().enumerate() {
            self.string(value, &format!("{field}[{i}]"));
        }
    }

    fn path(&mut self, value: &mut Option<PathBuf>, root: &Path, field: &str) {
        if let Some(path) = value {
            let mut raw = path.to_string_lossy().to_string();
            self.string(&mut raw, field);
            let resolved = PathBuf::from(crate::platform::expand_home(&raw));
            *path = if resolved.is_relative() {
                root.join(resolved)
            } else {
                resolved
            };
        }
    }

    fn env(&mut self, env: &mut BTreeMap<String, String>, field: &str) {
        for (key, value) in env.iter_mut() {
            self.string(value, &format!("{field}.env.{key}"));
        }
    }

    fn finish(self) -> Result<(), Vec<TemplateError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Resolve templates in every launch field of every component and of the
/// deployer. Relative working directories are anchored at `root`.
pub fn resolve_stack_templates(
    components: &mut BTreeMap<ComponentKind, ComponentSpec>,
    deployer: &mut DeployerSpec,
    root: &Path,
    vars: &HashMap<String, String>,
) -> Result<(), Vec<TemplateError>> {
    let mut r = Resolver {
        vars,
        errors: Vec::new(),
    };

    for (kind, spec) in components.iter_mut() {
        let field = format!("components.{}", kind.name());
        r.string(&mut spec.program, &format!("{field}.command"));
        r.list(&mut spec.args, &format!("{field}.args"));
        r.path(&mut spec.cwd, root, &format!("{field}.cwd"));
        r.env(&mut spec.env, &field);
        if let Some(stop) = &mut spec.stop {
            r.list(stop, &format!("{field}.stop"));
        }
    }

    r.string(&mut deployer.program, "contracts.command");
    r.list(&mut deployer.args, "contracts.args");
    r.path(&mut deployer.cwd, root, "contracts.cwd");
    r.env(&mut deployer.env, "contracts");

    r.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_vars() -> HashMap<String, String> {
        let ports = ComponentKind::ALL
            .into_iter()
            .map(|k| (k, k.default_port()))
            .collect();
        build_template_vars(Path::new("/repo"), Path::new("/repo/.stackrig"), "127.0.0.1", &ports)
    }

    #[test]
    fn basic_substitution() {
        let vars = make_vars();
        let result = resolve_template("--port={{ l1.port }}", &vars, "test_field").unwrap();
        assert_eq!(result, "--port=8545");
    }

    #[test]
    fn hyphenated_component_names() {
        let vars = make_vars();
        let result = resolve_template("{{ storage-worker.port }}", &vars, "test_field").unwrap();
        assert_eq!(result, "4008");
    }

    #[test]
    fn ws_port_follows_l2_port() {
        let ports = BTreeMap::from([(ComponentKind::L2, 19545)]);
        let vars = build_template_vars(Path::new("/r"), Path::new("/d"), "0.0.0.0", &ports);
        assert_eq!(vars["l2.ws_port"], "19546");
        assert_eq!(vars["host"], "0.0.0.0");
    }

    #[test]
    fn multiple_substitutions() {
        let vars = make_vars();
        let input = "{{ data_dir }}/l2:{{ l2.port }}";
        let result = resolve_template(input, &vars, "test_field").unwrap();
        assert_eq!(result, "/repo/.stackrig/l2:9545");
    }

    #[test]
    fn unresolved_variable_suggests_close_match() {
        let vars = make_vars();
        let errors = resolve_template("{{ l1.prot }}", &vars, "components.l1.args[1]").unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            TemplateError::UnresolvedVariable {
                field,
                variable,
                suggestion,
            } => {
                assert_eq!(field, "components.l1.args[1]");
                assert_eq!(variable, "l1.prot");
                assert_eq!(suggestion.as_deref(), Some("l1.port"));
            }
        }
    }

    #[test]
    fn no_templates_is_noop() {
        let vars = make_vars();
        let input = "plain string with no templates";
        assert_eq!(resolve_template(input, &vars, "f").unwrap(), input);
    }

    #[test]
    fn whitespace_in_braces() {
        let vars = make_vars();
        let result = resolve_template("{{   root   }}/apps", &vars, "f").unwrap();
        assert_eq!(result, "/repo/apps");
    }

    #[test]
    fn stack_templates_resolve_builtins() {
        let vars = make_vars();
        let mut components: BTreeMap<ComponentKind, ComponentSpec> = ComponentKind::ALL
            .into_iter()
            .map(|k| (k, ComponentSpec::builtin(k)))
            .collect();
        let mut deployer = DeployerSpec::default();

        resolve_stack_templates(&mut components, &mut deployer, Path::new("/repo"), &vars).unwrap();

        let l2 = &components[&ComponentKind::L2];
        assert!(l2.args.contains(&"9546".to_string()));
        assert!(l2.args.contains(&"/repo/.stackrig/l2".to_string()));
        assert_eq!(
            components[&ComponentKind::Storage].cwd,
            Some(PathBuf::from("/repo/packages/storage"))
        );
        let stop = components[&ComponentKind::Database].stop.as_ref().unwrap();
        assert!(stop.contains(&"/repo/packages/eqlite/docker-compose.yml".to_string()));
        assert_eq!(deployer.cwd, Some(PathBuf::from("/repo/packages/contracts")));
    }

    #[test]
    fn relative_cwd_is_anchored_at_root() {
        let vars = make_vars();
        let mut spec = ComponentSpec::builtin(ComponentKind::Gateway);
        spec.cwd = Some(PathBuf::from("services/gateway"));
        let mut components = BTreeMap::from([(ComponentKind::Gateway, spec)]);
        let mut deployer = DeployerSpec::default();

        resolve_stack_templates(&mut components, &mut deployer, Path::new("/repo"), &vars).unwrap();
        assert_eq!(
            components[&ComponentKind::Gateway].cwd,
            Some(PathBuf::from("/repo/services/gateway"))
        );
    }

    #[test]
    fn errors_are_collected_across_components() {
        let vars = make_vars();
        let mut l1 = ComponentSpec::builtin(ComponentKind::L1);
        l1.args.push("{{ nope }}".into());
        let mut gateway = ComponentSpec::builtin(ComponentKind::Gateway);
        gateway.env.insert("RPC".into(), "{{ l9.port }}".into());
        let mut components =
            BTreeMap::from([(ComponentKind::L1, l1), (ComponentKind::Gateway, gateway)]);
        let mut deployer = DeployerSpec::default();

        let errors =
            resolve_stack_templates(&mut components, &mut deployer, Path::new("/repo"), &vars)
                .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].to_string().contains("components.gateway.env.RPC"));
    }
}
