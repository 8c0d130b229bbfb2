use crate::collector::types::MAX_KEY_CODE;
use crate::store::error::{SqlResultExt, StoreError};
use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

const CURRENT_SCHEMA_VERSION: i32 = 1;

pub(crate) fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .or_migration("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        debug!(version, "schema up to date");
        return Ok(());
    }

    let tx = conn
        .transaction()
        .or_migration("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .or_migration("failed to update user_version pragma")?;
    tx.commit().or_migration("failed to commit migrations")?;

    info!(version = CURRENT_SCHEMA_VERSION, "schema migrated");
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), StoreError> {
    match version {
        1 => tx
            .execute_batch(include_str!("schemas/schema_v1.sql"))
            .or_migration("failed to execute schema_v1.sql"),
        _ => Err(StoreError::Migration(format!(
            "no migration defined for version {version}"
        ))),
    }
}

/// Drop raw events whose key code is outside the supported range.
///
/// Aggregate rows are only ever derived from valid codes, so the raw log is
/// the only place an out-of-range value can survive (older writers, manual
/// edits).
pub(crate) fn purge_invalid_key_codes(conn: &Connection) -> Result<usize, StoreError> {
    let removed = conn
        .execute(
            "DELETE FROM raw_events WHERE key_code < 0 OR key_code > ?1",
            [i64::from(MAX_KEY_CODE)],
        )
        .or_step("failed to purge invalid key codes")?;
    if removed > 0 {
        info!(removed, "purged raw events with invalid key codes");
    }
    Ok(removed)
}
