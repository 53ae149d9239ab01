use std::path::Path;

use anyhow::Context;
use tierstack_autoscale::{ScaleDecision, ScalingPolicy, simulate as run};

use super::load_config;

/// Replay a CPU trace against the configured scaling policy.
pub fn simulate(
    config_path: &Path,
    trace: Option<&str>,
    trace_file: Option<&Path>,
    initial: Option<u32>,
    format: &str,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let scaling = config
        .compute
        .scaling
        .as_ref()
        .context("compute.scaling is not configured")?;
    let policy = ScalingPolicy::from_config(scaling)?;
    let initial = initial.unwrap_or(config.compute.desired_count);
    policy.check_desired(initial)?;

    let samples = match (trace, trace_file) {
        (Some(inline), _) => parse_trace(inline)?,
        (None, Some(path)) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            parse_trace(&content)?
        }
        (None, None) => anyhow::bail!("pass --trace or --trace-file"),
    };

    let steps = run(&policy, initial, &samples);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&steps)?),
        _ => {
            println!(
                "policy: {}..={} tasks, out ≥{}%, in ≤{}%, cooldown {}s",
                policy.min,
                policy.max,
                policy.scale_out_cpu,
                policy.scale_in_cpu,
                policy.cooldown.as_secs()
            );
            for step in &steps {
                let action = match step.decision {
                    ScaleDecision::ScaleTo(n) => format!("scale to {n}"),
                    ScaleDecision::NoChange => "-".to_string(),
                };
                println!(
                    "  t={:>5}s  cpu={:>5.1}%  {:<12} desired={}",
                    step.at_secs, step.cpu, action, step.desired
                );
            }
        }
    }
    Ok(())
}

/// Parse CPU percentages separated by commas or whitespace.
fn parse_trace(input: &str) -> anyhow::Result<Vec<f64>> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            let value: f64 = s
                .parse()
                .with_context(|| format!("{s:?} is not a CPU percentage"))?;
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("{value} is outside 0..=100");
            }
            Ok(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators() {
        assert_eq!(parse_trace("10, 20\n30 40.5").unwrap(), vec![10.0, 20.0, 30.0, 40.5]);
        assert!(parse_trace("").unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_samples() {
        assert!(parse_trace("10,abc").is_err());
        assert!(parse_trace("120").is_err());
    }

    #[test]
    fn runs_against_scaffold_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.toml");
        let config = tierstack_core::StackConfig::scaffold("sim");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        simulate(&path, Some("90,90,10"), None, None, "json").unwrap();
        assert!(simulate(&path, None, None, None, "text").is_err());
        assert!(simulate(&path, Some("50"), None, Some(9), "text").is_err());
    }
}
