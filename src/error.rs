// Run-level error types for the route loader
//
// Per-destination failures are not errors at this level; they are counted as
// RouteErrorKind outcomes. Everything here stops the run.

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Interface '{0}' does not exist")]
    InterfaceNotFound(String),

    #[error("Error getting interface {interface}: {source}")]
    InterfaceLookup {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid gateway IP: {0}")]
    InvalidGateway(String),

    #[error("Interface '{0}' disappeared while adding routes")]
    DeviceVanished(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Operator-facing diagnostic printed before exit
    pub fn user_message(&self) -> String {
        match self {
            AppError::InterfaceNotFound(name) | AppError::DeviceVanished(name) => {
                format!(
                    "Configuration error: interface '{}' does not exist. Check 'interface' in the [primary] or [fallback] config section.",
                    name
                )
            }
            AppError::InterfaceLookup { interface, .. } => {
                format!("Could not query interface '{}'. Make sure you have CAP_NET_ADMIN.", interface)
            }
            AppError::InvalidGateway(gw) => {
                format!("Configuration error: '{}' is not a valid gateway address.", gw)
            }
            AppError::Io(_) => "File system error. Check permissions and disk space.".to_string(),
            AppError::Json(_) => "Route file is not a JSON array of strings.".to_string(),
        }
    }

    /// Whether the error is a configuration problem rather than a runtime failure
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            AppError::InterfaceNotFound(_)
                | AppError::InvalidGateway(_)
                | AppError::DeviceVanished(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_names_interface() {
        let err = AppError::InterfaceNotFound("tun7".to_string());
        assert!(err.user_message().contains("'tun7'"));
        assert_eq!(err.to_string(), "Interface 'tun7' does not exist");
    }

    #[test]
    fn test_error_is_config() {
        assert!(AppError::InvalidGateway("x".to_string()).is_config());
        assert!(AppError::DeviceVanished("tun0".to_string()).is_config());
        assert!(!AppError::Io(std::io::Error::other("disk")).is_config());
    }
}
