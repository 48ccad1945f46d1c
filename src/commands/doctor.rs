use anyhow::Result;
use std::collections::BTreeMap;

use crate::config::model::StackConfig;
use crate::platform::find_on_path;

/// Every distinct program the configured stack would launch, with the
/// components that need it.
pub fn required_tools(config: &StackConfig) -> BTreeMap<String, Vec<String>> {
    let mut tools: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for kind in config.enabled_components() {
        if let Some(spec) = config.component(kind) {
            let mut users = kind.name().to_string();
            if spec.optional {
                users.push_str(" (optional)");
            }
            tools.entry(spec.program.clone()).or_default().push(users);
        }
    }
    if config.features.contracts {
        tools
            .entry(config.deployer.program.clone())
            .or_default()
            .push("contracts".to_string());
    }
    tools
}

pub fn run(config: &StackConfig) -> Result<()> {
    println!("stackrig doctor");
    println!("===============");
    println!();

    let mut all_ok = true;
    for (tool, users) in required_tools(config) {
        match find_on_path(&tool) {
            Some(path) => println!("  [ok] {:<24} {}", tool, path.display()),
            None => {
                println!("  [!!] {:<24} not found (needed by {})", tool, users.join(", "));
                if !users.iter().all(|u| u.ends_with("(optional)")) {
                    all_ok = false;
                }
            }
        }
    }

    println!();
    if all_ok {
        println!("All required tools found.");
    } else {
        println!("Some required tools are missing. Install them or disable the components");
        println!("that need them (see `stackrig start --help`).");
    }

    Ok(())
}
