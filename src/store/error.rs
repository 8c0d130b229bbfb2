//! Store error taxonomy.

/// Errors raised at the store boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The database file could not be created or opened
    Open(String),
    /// A statement failed to compile
    Prepare(String),
    /// A parameter could not be bound
    Bind(String),
    /// A statement failed while running
    Step(String),
    /// The schema could not be brought up to date
    Migration(String),
    /// The worker thread is gone
    WorkerUnavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Open(e) => write!(f, "Open error: {e}"),
            StoreError::Prepare(e) => write!(f, "Prepare error: {e}"),
            StoreError::Bind(e) => write!(f, "Bind error: {e}"),
            StoreError::Step(e) => write!(f, "Execute error: {e}"),
            StoreError::Migration(e) => write!(f, "Migration error: {e}"),
            StoreError::WorkerUnavailable(e) => write!(f, "Store worker unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

fn is_bind_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::InvalidParameterCount(..)
        | rusqlite::Error::InvalidParameterName(_)
        | rusqlite::Error::ToSqlConversionFailure(_) => true,
        rusqlite::Error::SqliteFailure(code, _) => {
            code.code == rusqlite::ErrorCode::ParameterOutOfRange
        }
        _ => false,
    }
}

/// Attach a store error kind and context to rusqlite results.
pub(crate) trait SqlResultExt<T> {
    fn or_open(self, context: &str) -> Result<T, StoreError>;
    fn or_prepare(self, context: &str) -> Result<T, StoreError>;
    /// Runtime failure; binding problems are reported as `Bind`.
    fn or_step(self, context: &str) -> Result<T, StoreError>;
    fn or_migration(self, context: &str) -> Result<T, StoreError>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn or_open(self, context: &str) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::Open(format!("{context}: {e}")))
    }

    fn or_prepare(self, context: &str) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::Prepare(format!("{context}: {e}")))
    }

    fn or_step(self, context: &str) -> Result<T, StoreError> {
        self.map_err(|e| {
            if is_bind_error(&e) {
                StoreError::Bind(format!("{context}: {e}"))
            } else {
                StoreError::Step(format!("{context}: {e}"))
            }
        })
    }

    fn or_migration(self, context: &str) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::Migration(format!("{context}: {e}")))
    }
}
