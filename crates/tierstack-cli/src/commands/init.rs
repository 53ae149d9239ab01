use std::path::Path;

use tierstack_core::StackConfig;

/// Write a starter `stack.toml` reproducing the reference deployment.
pub fn init(path: &Path, name: &str, force: bool) -> anyhow::Result<()> {
    tierstack_core::naming::validate_resource_name("Stack", "name", name)?;
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let content = StackConfig::scaffold(name).to_toml_string()?;
    std::fs::write(path, content)?;
    println!("✓ Generated {}", path.display());
    println!("  Set stack.account or export TIERSTACK_ACCOUNT before synthesizing.");
    Ok(())
}
