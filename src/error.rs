use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrmError>;

#[derive(Debug, Error)]
pub enum OrmError {
    /// A primary-key lookup or strict query matched nothing.
    #[error("No {model} results found for {detail}")]
    NotFound { model: String, detail: String },

    /// A write went through but the row could not be read back afterwards.
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Relation error: {0}")]
    Relation(String),

    #[error("Unsupported condition: {0}")]
    UnsupportedCondition(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl OrmError {
    pub fn not_found(model: impl Into<String>, detail: impl Into<String>) -> Self {
        OrmError::NotFound {
            model: model.into(),
            detail: detail.into(),
        }
    }

    /// Numeric status for translation by an outer protocol layer.
    pub fn status(&self) -> u16 {
        match self {
            OrmError::NotFound { .. } => 404,
            OrmError::UnsupportedCondition(_) | OrmError::Query(_) => 400,
            _ => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OrmError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(OrmError::not_found("PaymentMethod", "id 7").status(), 404);
        assert_eq!(OrmError::Integrity("gone".into()).status(), 500);
        assert_eq!(OrmError::Relation("missing user_id".into()).status(), 500);
        assert_eq!(OrmError::UnsupportedCondition("between".into()).status(), 400);
    }

    #[test]
    fn test_not_found_message() {
        let err = OrmError::not_found("PaymentMethod", "id 7");
        assert_eq!(err.to_string(), "No PaymentMethod results found for id 7");
        assert!(err.is_not_found());
    }
}
