//! Container image references.

use std::fmt;

use serde_json::{Value, json};

use tierstack_core::ComposeResult;
use tierstack_core::naming::{validate_image_tag, validate_repository_name};

const RESOURCE: &str = "Image";

/// An image in the account's container registry, read by name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn from_repository_name(repository: &str, tag: &str) -> ComposeResult<Self> {
        validate_repository_name(RESOURCE, "repository", repository)?;
        validate_image_tag(RESOURCE, "image_tag", tag)?;
        Ok(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Registry URI, resolved against the deploying account and region.
    pub fn uri(&self) -> Value {
        json!({
            "Fn::Sub": format!(
                "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/{}:{}",
                self.repository, self.tag
            )
        })
    }

    /// Repository ARN for pull permissions.
    pub fn repository_arn(&self) -> Value {
        json!({
            "Fn::Sub": format!(
                "arn:${{AWS::Partition}}:ecr:${{AWS::Region}}:${{AWS::AccountId}}:repository/{}",
                self.repository
            )
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierstack_core::ErrorKind;

    #[test]
    fn uri_is_a_substitution() {
        let image = ImageRef::from_repository_name("sample-node-app", "latest").unwrap();
        assert_eq!(
            image.uri()["Fn::Sub"],
            "${AWS::AccountId}.dkr.ecr.${AWS::Region}.${AWS::URLSuffix}/sample-node-app:latest"
        );
        assert!(image.repository_arn()["Fn::Sub"]
            .as_str()
            .unwrap()
            .ends_with(":repository/sample-node-app"));
        assert_eq!(image.to_string(), "sample-node-app:latest");
    }

    #[test]
    fn invalid_names_rejected() {
        let err = ImageRef::from_repository_name("Sample App", "latest").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(ImageRef::from_repository_name("sample", "bad tag").is_err());
    }
}
