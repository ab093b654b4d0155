//! Configuration validation.
//!
//! Only file-level rules live here. Rules that need the target's description
//! (keys, columns, scheme support) are checked when the load is resolved into
//! a `LoadConfig`.

use std::collections::HashSet;

use super::{Config, LoadSpec};
use crate::batching::StrategyConfig;
use crate::error::{LoadError, Result};
use crate::postgres::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Database validation
    if config.database.host.is_empty() {
        return Err(LoadError::Config("database.host is required".into()));
    }
    if config.database.database.is_empty() {
        return Err(LoadError::Config("database.database is required".into()));
    }
    if config.database.user.is_empty() {
        return Err(LoadError::Config("database.user is required".into()));
    }
    if config.database.max_connections == 0 {
        return Err(LoadError::Config(
            "database.max_connections must be at least 1".into(),
        ));
    }
    SslMode::parse(&config.database.ssl_mode)?;

    // Embedded entities must not shadow each other
    let mut tables = HashSet::new();
    for entity in &config.entities {
        if !tables.insert(entity.table.to_string()) {
            return Err(LoadError::Config(format!(
                "entity {} is described more than once",
                entity.table
            )));
        }
    }

    // Loads
    let mut names = HashSet::new();
    for load in &config.loads {
        if load.name.trim().is_empty() {
            return Err(LoadError::Config("load name cannot be empty".into()));
        }
        if !names.insert(load.name.as_str()) {
            return Err(LoadError::Config(format!(
                "duplicate load name '{}'",
                load.name
            )));
        }
        validate_spec(&load.name, &load.spec)?;
        if let Some(inh) = &load.spec.inheritance {
            if inh.parent.inheritance.is_some() {
                return Err(LoadError::Config(format!(
                    "load '{}': an inheritance parent cannot itself use inheritance",
                    load.name
                )));
            }
            validate_spec(&format!("{} (parent)", load.name), &inh.parent)?;
        }
    }

    Ok(())
}

fn validate_spec(name: &str, spec: &LoadSpec) -> Result<()> {
    if spec.strategy.is_some() && spec.batch.is_none() {
        return Err(LoadError::Config(format!(
            "load '{}': strategy requires a batch section",
            name
        )));
    }

    match &spec.strategy {
        Some(StrategyConfig::FixedInterval {
            interval,
            min_date,
            max_date,
            ..
        }) => {
            if *interval == 0 {
                return Err(LoadError::Config(format!(
                    "load '{}': strategy.interval must be at least 1",
                    name
                )));
            }
            if let (Some(min), Some(max)) = (min_date, max_date) {
                if min > max {
                    return Err(LoadError::Config(format!(
                        "load '{}': strategy.min_date {} is after max_date {}",
                        name, min, max
                    )));
                }
            }
        }
        Some(StrategyConfig::VolumeBased { target_rows }) if *target_rows <= 0 => {
            return Err(LoadError::Config(format!(
                "load '{}': strategy.target_rows must be positive",
                name
            )));
        }
        _ => {}
    }

    if let Some(batch) = &spec.batch {
        if batch.batch_date_column.is_empty() {
            return Err(LoadError::Config(format!(
                "load '{}': batch.batch_date_column is required",
                name
            )));
        }
    }

    if spec.hypertable_decompression_limit.is_some() && !spec.is_hypertable {
        return Err(LoadError::Config(format!(
            "load '{}': hypertable_decompression_limit requires is_hypertable",
            name
        )));
    }

    Ok(())
}
