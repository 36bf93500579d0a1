//! Error types for the service layer

use conductor_auth::AuthError;
use conductor_cost::CostError;
use conductor_events::{EventBusError, LoggingError, SignalError};
use conductor_iaas::IaasError;
use conductor_structure::StructureError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::geoip::GeoIpError;
use crate::mail::MailError;

/// Service error types.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Iaas(#[from] IaasError),

    #[error(transparent)]
    Cost(#[from] CostError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    EventBus(#[from] EventBusError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    GeoIp(#[from] GeoIpError),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Cloud backend call failed
    #[error("Cloud backend error: {0}")]
    Backend(String),
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Structure(e) => e.status_code(),
            ServiceError::Iaas(e) => e.status_code(),
            ServiceError::Cost(e) => e.status_code(),
            ServiceError::Signal(e) => e.status_code(),
            ServiceError::Logging(e) => e.status_code(),
            ServiceError::Auth(e) => e.status_code(),
            ServiceError::EventBus(_)
            | ServiceError::GeoIp(_)
            | ServiceError::Mail(_)
            | ServiceError::Config(_)
            | ServiceError::Backend(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_codes_pass_through() {
        let err: ServiceError = StructureError::not_found("project", Uuid::nil()).into();
        assert_eq!(err.status_code(), 404);

        let err: ServiceError = IaasError::incorrect_state().into();
        assert_eq!(err.status_code(), 409);

        let err: ServiceError = CostError::EstimateExists.into();
        assert_eq!(err.status_code(), 400);

        assert_eq!(ServiceError::Backend("down".into()).status_code(), 500);
    }
}
