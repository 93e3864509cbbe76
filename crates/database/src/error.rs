use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Failed to connect to the database: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("No matching row was found in `{table}`.")]
    NotFound { table: &'static str },

    #[error("The database service has not been initialized.")]
    NotConnected,

    #[error("The database service has been shut down.")]
    Closed,

    #[error("Unknown column `{column}` on `{table}`.")]
    UnknownColumn { table: &'static str, column: String },

    #[error("Column `{column}` on `{table}` is not a unique key.")]
    NotUnique { table: &'static str, column: String },

    #[error("Invalid query argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid cache strategy: {0}")]
    InvalidCacheStrategy(String),
}
