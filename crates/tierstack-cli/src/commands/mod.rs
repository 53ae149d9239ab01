pub mod init;
pub mod simulate;
pub mod synth;

use std::path::Path;

use tierstack_core::StackConfig;

/// Read `stack.toml` and apply `TIERSTACK_*` overrides.
pub(crate) fn load_config(path: &Path) -> anyhow::Result<StackConfig> {
    let mut config = StackConfig::from_file(path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?;
    config.apply_process_env();
    Ok(config)
}
