// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::BTreeMap;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::{ComponentKind, StackFile};

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("unknown component `{name}`")]
    #[diagnostic(code(stackrig::unknown_component))]
    UnknownComponent {
        #[source_code]
        src: NamedSource<String>,
        #[label("not a component stackrig knows how to start")]
        span: SourceSpan,
        #[help]
        advice: String,
        name: String,
    },

    #[error("`{section}` has an empty command")]
    #[diagnostic(code(stackrig::empty_command))]
    EmptyCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
        section: String,
    },

    #[error("port {port} is used by multiple components: {components:?}")]
    #[diagnostic(code(stackrig::duplicate_port))]
    DuplicatePort {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate port")]
        span: SourceSpan,
        port: u16,
        components: Vec<String>,
    },

    #[error("port 0 is not allowed for `{component}`")]
    #[diagnostic(
        code(stackrig::invalid_port),
        help("components listen on fixed, well-known ports")
    )]
    InvalidPort {
        #[source_code]
        src: NamedSource<String>,
        #[label("invalid port")]
        span: SourceSpan,
        component: String,
    },

    #[error("readiness.max_attempts must be at least 1")]
    #[diagnostic(code(stackrig::zero_attempts))]
    ZeroAttempts {
        #[source_code]
        src: NamedSource<String>,
        #[label("no probe would ever run")]
        span: SourceSpan,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Find the byte offset of the name in a table header like `[components.l1]`.
fn find_table_span(source: &str, section: &str, name: &str) -> SourceSpan {
    let header = if name.is_empty() {
        format!("[{}]", section)
    } else {
        format!("[{}.{}]", section, name)
    };
    if let Some(pos) = source.find(&header) {
        let start = if name.is_empty() {
            pos + 1
        } else {
            pos + 1 + section.len() + 1
        };
        let len = if name.is_empty() { section.len() } else { name.len() };
        return (start, len).into();
    }

    if !name.is_empty() {
        if let Some(pos) = source.find(name) {
            return (pos, name.len()).into();
        }
    }

    (0, 0).into()
}

/// Find the value of `field = ...` after a table header.
fn find_field_span(source: &str, header: &str, field: &str) -> SourceSpan {
    let search_start = source.find(header).unwrap_or(0);
    let after_header = &source[search_start..];

    for prefix in [format!("{} =", field), format!("{}=", field)] {
        if let Some(rel_pos) = after_header.find(&prefix) {
            let abs_pos = search_start + rel_pos;
            if let Some(eq) = source[abs_pos..].find('=') {
                let val_start = abs_pos + eq + 1;
                let val_trimmed = source[val_start..].trim_start();
                let offset = val_start + (source[val_start..].len() - val_trimmed.len());
                let len = val_trimmed.find('\n').unwrap_or(val_trimmed.len());
                return (offset, len).into();
            }
        }
    }

    (search_start, header.len().min(source.len() - search_start)).into()
}

fn component_field_span(source: &str, name: &str, field: &str) -> SourceSpan {
    let header = format!("[components.{}]", name);
    if source.contains(&header) {
        find_field_span(source, &header, field)
    } else {
        find_table_span(source, "components", name)
    }
}

// ---------------------------------------------------------------------------
// Similarity suggestions
// ---------------------------------------------------------------------------

fn find_closest_match<'a>(name: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = strsim::jaro_winkler(name, candidate);
        if score >= 0.8 && best.is_none_or(|(_, s)| score > s) {
            best = Some((*candidate, score));
        }
    }
    best.map(|(name, _)| name)
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

/// Check a parsed `stackrig.toml`. `ports` holds the final port of every
/// enabled component, after overrides.
pub fn validate(
    file: &StackFile,
    ports: &BTreeMap<ComponentKind, u16>,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());
    let known: Vec<&str> = ComponentKind::ALL.iter().map(|k| k.name()).collect();

    for (name, component) in &file.components {
        if ComponentKind::from_name(name).is_none() {
            let advice = match find_closest_match(name, &known) {
                Some(s) => format!("did you mean `{}`?", s),
                None => format!("known components: {}", known.join(", ")),
            };
            errors.push(ConfigDiagnostic::UnknownComponent {
                src: src.clone(),
                span: find_table_span(source, "components", name),
                advice,
                name: name.clone(),
            });
            continue;
        }

        if component.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            errors.push(ConfigDiagnostic::EmptyCommand {
                src: src.clone(),
                span: component_field_span(source, name, "command"),
                section: format!("components.{}", name),
            });
        }

        if component.port == Some(0) {
            errors.push(ConfigDiagnostic::InvalidPort {
                src: src.clone(),
                span: component_field_span(source, name, "port"),
                component: name.clone(),
            });
        }
    }

    if let Some(contracts) = &file.contracts {
        if contracts.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            errors.push(ConfigDiagnostic::EmptyCommand {
                src: src.clone(),
                span: find_field_span(source, "[contracts]", "command"),
                section: "contracts".to_string(),
            });
        }
    }

    if file.readiness.is_some_and(|r| r.max_attempts == Some(0)) {
        errors.push(ConfigDiagnostic::ZeroAttempts {
            src: src.clone(),
            span: find_field_span(source, "[readiness]", "max_attempts"),
        });
    }

    // The L2 WebSocket endpoint occupies the port after L2's.
    let mut port_map: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for (kind, port) in ports {
        if *port == 0 {
            continue;
        }
        port_map.entry(*port).or_default().push(kind.name().to_string());
        if *kind == ComponentKind::L2 {
            port_map
                .entry(port.saturating_add(1))
                .or_default()
                .push("l2 (ws)".to_string());
        }
    }
    for (port, components) in port_map {
        if components.len() > 1 {
            let first = components
                .iter()
                .find(|c| file.components.get(c.as_str()).is_some_and(|o| o.port.is_some()))
                .unwrap_or(&components[0]);
            errors.push(ConfigDiagnostic::DuplicatePort {
                src: src.clone(),
                span: component_field_span(source, first.trim_end_matches(" (ws)"), "port"),
                port,
                components,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
