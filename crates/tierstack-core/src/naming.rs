//! Naming conventions enforced before any resource is declared.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ComposeError, ComposeResult};

/// Lowercase words joined by single underscores: `cdk_training_app`.
static SNAKE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+(_[a-z]+)*$").expect("valid identifier regex"));

/// Physical resource names: lowercase alphanumerics separated by hyphens.
static RESOURCE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid resource name regex"));

/// Container repository names: path segments of `[a-z0-9._-]`.
static REPOSITORY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$")
        .expect("valid repository regex")
});

/// Image tags: up to 128 word characters, dots and dashes, not leading with either.
static IMAGE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid tag regex"));

/// Returns true if `value` is a lowercase, underscore-separated identifier.
pub fn is_snake_identifier(value: &str) -> bool {
    SNAKE_IDENTIFIER.is_match(value)
}

/// Derive a snake identifier from a free-form name: letters are lowercased
/// and every run of other characters becomes one underscore. Falls back to
/// `fallback` when no letters remain.
pub fn snake_identifier_from(value: &str, fallback: &str) -> String {
    let derived = value
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("_");
    if is_snake_identifier(&derived) {
        derived
    } else {
        fallback.to_string()
    }
}

/// Validate a database-level identifier (database name, admin username).
pub fn validate_identifier(resource: &str, parameter: &str, value: &str) -> ComposeResult<()> {
    if is_snake_identifier(value) {
        Ok(())
    } else {
        Err(ComposeError::validation(
            resource,
            parameter,
            value,
            "must be lowercase words separated by underscores",
        ))
    }
}

/// Validate the stack-wide resource name used to derive physical names.
pub fn validate_resource_name(resource: &str, parameter: &str, value: &str) -> ComposeResult<()> {
    // Load balancer and target group names cap at 32 characters; leave room
    // for the longest suffix (`-alb-tg`).
    if value.len() > 25 {
        return Err(ComposeError::validation(
            resource,
            parameter,
            value,
            "must be at most 25 characters",
        ));
    }
    if RESOURCE_NAME.is_match(value) {
        Ok(())
    } else {
        Err(ComposeError::validation(
            resource,
            parameter,
            value,
            "must be lowercase alphanumerics separated by hyphens",
        ))
    }
}

/// Validate a container registry repository name.
pub fn validate_repository_name(resource: &str, parameter: &str, value: &str) -> ComposeResult<()> {
    if value.len() >= 2 && value.len() <= 256 && REPOSITORY_NAME.is_match(value) {
        Ok(())
    } else {
        Err(ComposeError::validation(
            resource,
            parameter,
            value,
            "is not a valid repository name",
        ))
    }
}

/// Validate a container image tag.
pub fn validate_image_tag(resource: &str, parameter: &str, value: &str) -> ComposeResult<()> {
    if IMAGE_TAG.is_match(value) {
        Ok(())
    } else {
        Err(ComposeError::validation(
            resource,
            parameter,
            value,
            "is not a valid image tag",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn accepts_reference_names() {
        assert!(validate_identifier("Rds", "database_name", "cdk_training_nigg").is_ok());
        assert!(validate_identifier("Rds", "username", "nigg").is_ok());
    }

    #[test]
    fn rejects_mixed_case() {
        let err = validate_identifier("Rds", "database_name", "SampleDB").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("SampleDB"));
    }

    #[test]
    fn rejects_edge_underscores_and_digits() {
        for bad in ["", "_db", "db_", "a__b", "db1", "my-db"] {
            assert!(!is_snake_identifier(bad), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn snake_identifier_from_stack_names() {
        assert_eq!(snake_identifier_from("cdk-training", "app_db"), "cdk_training");
        assert_eq!(snake_identifier_from("app-v2", "app_db"), "app_v");
        assert_eq!(snake_identifier_from("api2-svc", "app_db"), "api_svc");
        assert_eq!(snake_identifier_from("Web-App", "app_db"), "web_app");
        assert_eq!(snake_identifier_from("123", "app_db"), "app_db");
    }

    #[test]
    fn resource_names() {
        assert!(validate_resource_name("Stack", "name", "sample-node-app").is_ok());
        assert!(validate_resource_name("Stack", "name", "Sample").is_err());
        assert!(validate_resource_name("Stack", "name", "a-very-long-resource-name-here").is_err());
    }

    #[test]
    fn repository_names() {
        assert!(validate_repository_name("Image", "repository", "sample-node-app").is_ok());
        assert!(validate_repository_name("Image", "repository", "team/api_v2").is_ok());
        assert!(validate_repository_name("Image", "repository", "Bad Repo").is_err());
    }

    #[test]
    fn image_tags() {
        assert!(validate_image_tag("Image", "tag", "latest").is_ok());
        assert!(validate_image_tag("Image", "tag", "v1.2.3-rc_1").is_ok());
        assert!(validate_image_tag("Image", "tag", "").is_err());
        assert!(validate_image_tag("Image", "tag", "-dash").is_err());
        assert!(validate_image_tag("Image", "tag", "has space").is_err());
    }

    proptest! {
        #[test]
        fn generated_snake_names_are_accepted(words in prop::collection::vec("[a-z]{1,8}", 1..5)) {
            let name = words.join("_");
            prop_assert!(validate_identifier("Rds", "database_name", &name).is_ok());
        }

        #[test]
        fn derived_identifiers_always_validate(name in "[a-z0-9-]{0,25}") {
            let derived = snake_identifier_from(&name, "app_db");
            prop_assert!(is_snake_identifier(&derived));
        }

        #[test]
        fn names_with_uppercase_are_rejected(prefix in "[a-z]{0,5}", upper in "[A-Z]", suffix in "[a-z]{0,5}") {
            let name = format!("{prefix}{upper}{suffix}");
            let err = validate_identifier("Rds", "database_name", &name).unwrap_err();
            prop_assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }
}
