//! Fargate task sizes.

use tierstack_core::{Architecture, ComposeError, ComposeResult};

const RESOURCE: &str = "EcsTaskDefinition";

/// Memory choices per CPU size: (cpu units, min MiB, max MiB, step MiB).
const FARGATE_SIZES: [(u32, u32, u32, u32); 7] = [
    (256, 512, 2048, 512),
    (512, 1024, 4096, 1024),
    (1024, 2048, 8192, 1024),
    (2048, 4096, 16384, 1024),
    (4096, 8192, 30720, 1024),
    (8192, 16384, 61440, 4096),
    (16384, 32768, 122880, 8192),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskShape {
    /// CPU units (1024 = one vCPU).
    pub cpu: u32,
    pub memory_mib: u32,
    pub architecture: Architecture,
}

impl TaskShape {
    pub fn new(cpu: u32, memory_mib: u32, architecture: Architecture) -> ComposeResult<Self> {
        let Some(&(_, min, max, step)) = FARGATE_SIZES.iter().find(|(c, ..)| *c == cpu) else {
            let sizes: Vec<String> = FARGATE_SIZES.iter().map(|(c, ..)| c.to_string()).collect();
            return Err(ComposeError::configuration(
                RESOURCE,
                "cpu",
                format!("{cpu} is not a Fargate size (one of {})", sizes.join(", ")),
            ));
        };
        // The smallest size skips 1536 MiB.
        let valid = if cpu == 256 {
            matches!(memory_mib, 512 | 1024 | 2048)
        } else {
            (min..=max).contains(&memory_mib) && (memory_mib - min) % step == 0
        };
        if !valid {
            return Err(ComposeError::configuration(
                RESOURCE,
                "memory_mib",
                format!("{memory_mib} MiB is not valid with {cpu} CPU units ({min}..={max} MiB)"),
            ));
        }
        Ok(Self {
            cpu,
            memory_mib,
            architecture,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_shape() {
        let shape = TaskShape::new(256, 512, Architecture::Arm64).unwrap();
        assert_eq!(shape.architecture.platform_name(), "ARM64");
    }

    #[test]
    fn valid_combinations() {
        assert!(TaskShape::new(256, 2048, Architecture::Arm64).is_ok());
        assert!(TaskShape::new(512, 3072, Architecture::X86_64).is_ok());
        assert!(TaskShape::new(4096, 30720, Architecture::Arm64).is_ok());
        assert!(TaskShape::new(8192, 20480, Architecture::Arm64).is_ok());
    }

    #[test]
    fn invalid_combinations() {
        assert!(TaskShape::new(256, 1536, Architecture::Arm64).is_err());
        assert!(TaskShape::new(256, 4096, Architecture::Arm64).is_err());
        assert!(TaskShape::new(1024, 1024, Architecture::Arm64).is_err());
        assert!(TaskShape::new(8192, 18432, Architecture::Arm64).is_err());
        let err = TaskShape::new(300, 512, Architecture::Arm64).unwrap_err();
        assert!(err.to_string().contains("Fargate size"));
    }
}
