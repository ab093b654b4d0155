//! Change-capture apply.
//!
//! The source carries an operation tag (`I`, `U`, `D`) and a monotonic change
//! version per row. One statement reads every change above `:last_version`,
//! keeps the newest change per key, applies deletes and upserts, and appends
//! the highest version seen to the tracking table. Re-running with the same
//! `:last_version` re-applies the same final state.

use crate::core::quote_ident;
use crate::error::{LoadError, Result};
use crate::load_config::LoadConfig;

use super::source::source_select;
use super::upsert::UpsertStatement;
use super::{col, cte, key_join, SOURCE_ALIAS, TARGET_ALIAS};

/// Version bound used before anything has been tracked.
pub const INITIAL_VERSION: i64 = -1;

pub fn render(config: &LoadConfig, windowed: bool) -> Result<String> {
    let cdc = config.cdc.as_ref().ok_or_else(|| {
        LoadError::Render(format!(
            "{}: cdc scheme requires a tracking table",
            config.target_table
        ))
    })?;
    let version = quote_ident(&cdc.version_column);
    let operation = col(SOURCE_ALIAS, &cdc.operation_column);

    let source_keys: Vec<String> = config
        .unique_key
        .iter()
        .map(|k| quote_ident(config.source_column(k)))
        .collect();
    let key_pairs: Vec<(String, String)> = config
        .unique_key
        .iter()
        .map(|k| (config.source_column(k).to_string(), k.clone()))
        .collect();

    let changes = source_select(
        config,
        windowed,
        &[format!("{} > CAST(:last_version AS bigint)", version)],
    );

    let latest = format!(
        "SELECT DISTINCT ON ({keys}) *\nFROM changes\nORDER BY {keys}, {version} DESC",
        keys = source_keys.join(", "),
        version = version
    );

    let deleted = if config.audit.with_deleted_at {
        format!(
            "UPDATE {} AS {}\nSET deleted_at = CURRENT_TIMESTAMP\nFROM latest {}\nWHERE {} = 'D'\n  AND {} IS NULL\n  AND {}\nRETURNING 1",
            config.target_table.quoted(),
            TARGET_ALIAS,
            SOURCE_ALIAS,
            operation,
            col(TARGET_ALIAS, "deleted_at"),
            key_join(SOURCE_ALIAS, TARGET_ALIAS, &key_pairs)
        )
    } else {
        format!(
            "DELETE FROM {} AS {}\nUSING latest {}\nWHERE {} = 'D'\n  AND {}\nRETURNING 1",
            config.target_table.quoted(),
            TARGET_ALIAS,
            SOURCE_ALIAS,
            operation,
            key_join(SOURCE_ALIAS, TARGET_ALIAS, &key_pairs)
        )
    };

    let mut upsert = UpsertStatement::for_config(config, "latest");
    upsert.from = format!("latest {}\nWHERE {} IN ('I', 'U')", SOURCE_ALIAS, operation);
    upsert.only_changed = false;
    if config.audit.with_deleted_at {
        upsert.extra_set.push("deleted_at = NULL".to_string());
    }
    let upserted = upsert
        .with_returning(vec![format!("({}.xmax = 0) AS inserted", TARGET_ALIAS)])
        .to_sql();

    let tracking = format!(
        "INSERT INTO {} (last_source_version, loaded_at, rows_inserted, rows_updated, rows_deleted)\n\
         SELECT MAX(c.{version}),\n       CURRENT_TIMESTAMP,\n       \
         (SELECT COUNT(*) FROM upserted WHERE inserted),\n       \
         (SELECT COUNT(*) FROM upserted WHERE NOT inserted),\n       \
         (SELECT COUNT(*) FROM deleted)\n\
         FROM changes c\n\
         HAVING MAX(c.{version}) IS NOT NULL\n\
         RETURNING 1",
        cdc.tracking_table.quoted(),
        version = version
    );

    Ok(format!(
        "WITH {},\n{},\n{},\n{},\n{}\nSELECT (SELECT COUNT(*) FROM upserted) + (SELECT COUNT(*) FROM deleted)",
        cte("changes", &changes),
        cte("latest", &latest),
        cte("deleted", &deleted),
        cte("upserted", &upserted),
        cte("tracking", &tracking)
    ))
}
