use crate::cache::{StoreError, Tier};

pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::ColumnDecode { index, source } => StoreError::Corrupt {
            tier: Tier::Durable,
            key: String::new(),
            message: format!("column {index}: {source}"),
        },
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to statement timeout") =>
        {
            StoreError::Timeout {
                tier: Tier::Durable,
                op: "statement",
                timeout_ms: 0,
            }
        }
        other => StoreError::durable_unavailable(other.to_string()),
    }
}
