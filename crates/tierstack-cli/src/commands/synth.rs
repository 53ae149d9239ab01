use std::path::Path;

use tierstack_compose::compose;

use super::load_config;

/// Compose the stack and print what it declares.
pub fn validate(config_path: &Path, format: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let stack = compose(&config)?;

    match format {
        "json" => {
            let summary = serde_json::json!({
                "stack": stack.name,
                "account": stack.account,
                "region": stack.region,
                "resources": stack.template.len(),
                "resource_types": stack.resource_counts(),
                "scaling": stack.scaling.is_some(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            println!("✓ {} is valid ({} resources)", stack.name, stack.template.len());
            for (kind, count) in stack.resource_counts() {
                println!("  {count:>3}  {kind}");
            }
        }
    }
    Ok(())
}

/// Compose the stack and write the template to `out`, or stdout.
pub fn synth(config_path: &Path, out: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let stack = compose(&config)?;
    let rendered = stack.to_json_pretty()?;

    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, rendered)?;
            tracing::info!(path = %path.display(), resources = stack.template.len(), "template written");
            println!("✓ Synthesized {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
