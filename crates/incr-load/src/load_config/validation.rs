//! Cross-field validation of a load configuration.

use tracing::warn;

use super::{LoadConfig, LoadScheme};
use crate::core::identifier::validate_identifier;
use crate::core::{validate_sql_fragment, EntityDescription};
use crate::error::{LoadError, Result};

/// True for a composed merge that can only match existing parents through the
/// source's parent key column.
pub(crate) fn keys_parents_on_source(config: &LoadConfig) -> bool {
    config.scheme == LoadScheme::Merge
        && config.mapping.is_none()
        && config
            .inheritance
            .as_ref()
            .is_some_and(|inh| inh.parent_key_is_generated())
}

/// Validate a freshly built config against the target entity.
pub fn validate(config: &LoadConfig, entity: &EntityDescription) -> Result<()> {
    let table = &config.target_table;

    // Delete flags
    if config.with_soft_delete && config.hard_delete {
        return Err(LoadError::Config(format!(
            "{}: with_soft_delete and hard_delete are mutually exclusive",
            table
        )));
    }
    if config.with_soft_delete && !config.audit.with_deleted_at {
        return Err(LoadError::Config(format!(
            "{}: with_soft_delete requires audit.with_deleted_at",
            table
        )));
    }

    // Key and columns
    if !entity.is_unique_key(&config.unique_key) {
        return Err(LoadError::Config(format!(
            "{}: unique_key [{}] does not match any constraint (available: {})",
            table,
            config.unique_key.join(", "),
            entity.describe_keys()
        )));
    }
    if config.columns.is_empty() {
        return Err(LoadError::Config(format!("{}: no columns to load", table)));
    }
    for col in config.columns.iter().chain(config.unique_key.iter()) {
        validate_identifier(col)?;
        if !entity.has_column(col) {
            return Err(LoadError::Config(format!(
                "{}: column '{}' does not exist",
                table, col
            )));
        }
    }
    for key in &config.unique_key {
        if !config.columns.contains(key) {
            return Err(LoadError::Config(format!(
                "{}: unique_key column '{}' is excluded from columns",
                table, key
            )));
        }
    }
    for (target, source) in &config.column_mapping {
        if !config.columns.contains(target) {
            return Err(LoadError::Config(format!(
                "{}: column_mapping target '{}' is not a loaded column",
                table, target
            )));
        }
        validate_identifier(source)?;
    }

    // Audit columns must exist when maintained
    let audit_columns = [
        (config.audit.with_created_at, "created_at"),
        (config.audit.with_updated_at, "updated_at"),
        (config.audit.with_deleted_at, "deleted_at"),
    ];
    for (on, col) in audit_columns {
        if on && !entity.has_column(col) {
            return Err(LoadError::Config(format!(
                "{}: audit column '{}' does not exist",
                table, col
            )));
        }
    }

    // Fragments
    if let Some(order_by) = &config.order_by {
        validate_sql_fragment("order_by", order_by)?;
    }
    if let Some(condition) = &config.exclude_from_delete {
        validate_sql_fragment("exclude_from_delete", condition)?;
    }

    validate_scheme(config)?;
    validate_self_reference(config, entity)?;

    // Mapping writes the target's single-column id
    if config.mapping.is_some() && config.internal_id_column.is_none() {
        return Err(LoadError::Config(format!(
            "{}: mapping requires a single-column primary key or unique_key",
            table
        )));
    }

    if let Some(inh) = &config.inheritance {
        if config.scheme == LoadScheme::Upsert && inh.parent_key_is_generated() {
            return Err(LoadError::Config(format!(
                "{}: upsert inheritance cannot key on generated parent column '{}'; use merge",
                table, inh.parent_unique_key
            )));
        }
        if config.deletes() && config.mapping.is_none() {
            return Err(LoadError::Config(format!(
                "{}: inheritance deletes require mapping to resolve unchanged parents",
                table
            )));
        }
        if keys_parents_on_source(config) {
            warn!(
                "{}: parent key '{}' is generated and no mapping is configured; \
                 rows with NULL {} insert a new parent on every run",
                table, inh.parent_unique_key, inh.source_parent_key
            );
        }
        validate_identifier(&inh.source_parent_key)?;
    }

    // Window-scoped deletes need the date column on the target
    if let (Some(batch), true) = (&config.batch, config.deletes()) {
        validate_identifier(&batch.batch_date_column)?;
        let column = config.target_batch_column().unwrap_or_default();
        if !entity.has_column(column) {
            return Err(LoadError::Config(format!(
                "{}: batched deletes require target column '{}'",
                table, column
            )));
        }
    }

    Ok(())
}

fn validate_scheme(config: &LoadConfig) -> Result<()> {
    let table = &config.target_table;

    match config.scheme {
        LoadScheme::Insert | LoadScheme::Cdc => {
            let unsupported = [
                (config.mapping.is_some(), "mapping"),
                (config.inheritance.is_some(), "inheritance"),
                (config.self_reference.is_some(), "self_reference"),
                (config.deletes(), "deletes"),
            ];
            if let Some((_, feature)) = unsupported.iter().find(|(on, _)| *on) {
                return Err(LoadError::Config(format!(
                    "{}: {} scheme does not support {}",
                    table, config.scheme, feature
                )));
            }
        }
        LoadScheme::Upsert if config.deletes() => {
            return Err(LoadError::Config(format!(
                "{}: upsert scheme never deletes; use merge for soft or hard delete",
                table
            )));
        }
        _ => {}
    }

    // ON CONFLICT cannot match a key the insert never supplies
    if matches!(config.scheme, LoadScheme::Upsert | LoadScheme::Cdc)
        && config.inheritance.is_none()
        && !config.generated_key_columns.is_empty()
    {
        return Err(LoadError::Config(format!(
            "{}: {} scheme cannot key on generated column(s) [{}]",
            table,
            config.scheme,
            config.generated_key_columns.join(", ")
        )));
    }

    match (&config.cdc, config.scheme) {
        (None, LoadScheme::Cdc) => Err(LoadError::Config(format!(
            "{}: cdc scheme requires a tracking table",
            table
        ))),
        (Some(cdc), LoadScheme::Cdc) => {
            validate_identifier(&cdc.operation_column)?;
            validate_identifier(&cdc.version_column)?;
            Ok(())
        }
        (Some(_), scheme) => Err(LoadError::Config(format!(
            "{}: cdc settings given for {} scheme",
            table, scheme
        ))),
        (None, _) => Ok(()),
    }
}

fn validate_self_reference(config: &LoadConfig, entity: &EntityDescription) -> Result<()> {
    let Some(self_ref) = &config.self_reference else {
        return Ok(());
    };
    let table = &config.target_table;

    if self_ref.columns.is_empty() {
        return Err(LoadError::Config(format!(
            "{}: self_reference has no columns",
            table
        )));
    }

    if self_ref.requires_mapping {
        if config.mapping.is_none() {
            return Err(LoadError::Config(format!(
                "{}: self_reference requires mapping but no mapping is configured",
                table
            )));
        }
    } else if config.unique_key.len() != 1 {
        // The natural-key self-join is only deterministic on a unique column.
        return Err(LoadError::Config(format!(
            "{}: self_reference without mapping needs a single-column unique_key, found [{}]",
            table,
            config.unique_key.join(", ")
        )));
    }

    for (target, source) in &self_ref.columns {
        validate_identifier(source)?;
        if !entity.has_column(target) {
            return Err(LoadError::Config(format!(
                "{}: self_reference column '{}' does not exist",
                table, target
            )));
        }
        if config.columns.contains(target) {
            return Err(LoadError::Config(format!(
                "{}: self_reference column '{}' cannot also be loaded directly",
                table, target
            )));
        }
    }
    Ok(())
}
