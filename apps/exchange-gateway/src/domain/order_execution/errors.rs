//! Order execution errors.

use thiserror::Error;

use super::value_objects::OrderState;
use crate::error::GatewayError;

/// Errors raised by order validation and lifecycle checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Invalid order parameters.
    #[error("invalid {field}: {message}")]
    InvalidParameters {
        /// Field with invalid value.
        field: String,
        /// Error message.
        message: String,
    },

    /// Client order id already in use.
    #[error("duplicate cl_ord_id {cl_ord_id}")]
    DuplicateClOrdId {
        /// Offending id.
        cl_ord_id: String,
    },

    /// Order not found.
    #[error("order {cl_ord_id} not found")]
    NotFound {
        /// Client order id.
        cl_ord_id: String,
    },

    /// Order is terminal and cannot be amended or cancelled.
    #[error("order {cl_ord_id} is {state}")]
    AlreadyTerminal {
        /// Client order id.
        cl_ord_id: String,
        /// Terminal state.
        state: OrderState,
    },
}

impl OrderError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<OrderError> for GatewayError {
    fn from(err: OrderError) -> Self {
        let gateway = Self::validation(err.to_string());
        match &err {
            OrderError::DuplicateClOrdId { cl_ord_id }
            | OrderError::NotFound { cl_ord_id }
            | OrderError::AlreadyTerminal { cl_ord_id, .. } => {
                gateway.with_context("cl_ord_id", cl_ord_id)
            }
            OrderError::InvalidParameters { field, .. } => gateway.with_context("field", field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn order_errors_are_validation_errors() {
        let err: GatewayError = OrderError::NotFound {
            cl_ord_id: "abc".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.context_value("cl_ord_id"), Some("abc"));
    }

    #[test]
    fn invalid_parameters_display() {
        let err = OrderError::invalid("quantity", "must be positive");
        assert_eq!(err.to_string(), "invalid quantity: must be positive");
    }
}
