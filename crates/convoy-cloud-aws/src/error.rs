//! AWS provider error types

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use convoy_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("{operation} failed [{code}]: {message}")]
    Api {
        operation: String,
        code: String,
        message: String,
    },

    #[error("{operation}: response missing {field}")]
    MissingField {
        operation: String,
        field: &'static str,
    },

    #[error("could not build {0} request: {1}")]
    Build(String, String),
}

impl AwsError {
    pub fn from_sdk<E>(operation: &str, err: E) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
    {
        let code = err.code().unwrap_or("Unknown").to_string();
        let message = err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
        AwsError::Api {
            operation: operation.to_string(),
            code,
            message,
        }
    }

    pub fn missing(operation: &str, field: &'static str) -> Self {
        AwsError::MissingField {
            operation: operation.to_string(),
            field,
        }
    }
}

/// Map an SDK error straight into the engine's taxonomy.
pub(crate) fn sdk<E>(operation: &str, err: E) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    AwsError::from_sdk(operation, err).into()
}

impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::Api {
                operation,
                code,
                message,
            } => {
                let detail = format!("{}: {}", operation, message);
                match code.as_str() {
                    "InvalidPermission.Duplicate"
                    | "InvalidKeyPair.Duplicate"
                    | "InvalidGroup.Duplicate" => CloudError::Duplicate(detail),
                    "InvalidGroup.NotFound"
                    | "InvalidGroupId.NotFound"
                    | "InvalidInstanceID.NotFound"
                    | "InvalidKeyPair.NotFound"
                    | "InvalidPermission.NotFound"
                    | "NoSuchHostedZone" => CloudError::NotFound(detail),
                    "DependencyViolation" => CloudError::DependencyViolation(detail),
                    "AuthFailure" | "UnauthorizedOperation" | "InvalidClientTokenId"
                    | "SignatureDoesNotMatch" | "ExpiredToken" => {
                        CloudError::AuthenticationFailed(detail)
                    }
                    _ => CloudError::Api {
                        code,
                        message: detail,
                    },
                }
            }
            other => CloudError::api("Client", other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: &str) -> CloudError {
        AwsError::Api {
            operation: "op".into(),
            code: code.into(),
            message: "msg".into(),
        }
        .into()
    }

    #[test]
    fn test_error_code_mapping() {
        assert!(api("InvalidPermission.Duplicate").is_duplicate());
        assert!(api("InvalidKeyPair.Duplicate").is_duplicate());
        assert!(api("InvalidGroup.NotFound").is_not_found());
        assert!(api("InvalidInstanceID.NotFound").is_not_found());
        assert!(matches!(
            api("DependencyViolation"),
            CloudError::DependencyViolation(_)
        ));
        assert!(matches!(
            api("UnauthorizedOperation"),
            CloudError::AuthenticationFailed(_)
        ));
        assert!(matches!(api("Throttling"), CloudError::Api { .. }));
    }

    #[test]
    fn test_missing_field_is_fatal() {
        let err: CloudError = AwsError::missing("run_instances", "instance id").into();
        assert!(!err.is_benign());
        assert!(err.to_string().contains("instance id"));
    }
}
