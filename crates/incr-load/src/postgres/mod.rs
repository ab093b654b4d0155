//! PostgreSQL backend.
//!
//! [`PgTarget`] owns a deadpool-postgres pool and implements the engine's
//! three database seams: [`Catalog`], [`DateStats`] and [`StatementExecutor`].
//! Loads are sequential, so the pool is small and at most one connection is
//! busy at a time.

pub mod tls;

pub use tls::{SslMode, TlsBuilder};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::core::{
    quote_ident, BoundStatement, Catalog, Column, ConstraintDef, ConstraintKind, DateStats,
    EntityDescription, ExecutionOutcome, ForeignKey, IndexDef, RowCount, SqlParam,
    StatementExecutor, StatementRole, TableRef, UniqueConstraint,
};
use crate::error::{LoadError, Result};

/// PostgreSQL target: connection pool plus catalog and execution.
pub struct PgTarget {
    pool: Pool,
}

impl PgTarget {
    /// Create the pool and check that a connection can be made.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pg_config = pg_config(config);
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let pool = match TlsBuilder::new(ssl_mode).build()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| LoadError::pool(e, "creating PostgreSQL pool"))?
            }
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| LoadError::pool(e, "creating PostgreSQL pool"))?
            }
        };

        let target = Self { pool };
        target.test_connection().await?;
        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(target)
    }

    /// Round-trip `SELECT 1` and return the latency.
    pub async fn test_connection(&self) -> Result<Duration> {
        let start = Instant::now();
        let client = self.client("testing PostgreSQL connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(start.elapsed())
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| LoadError::pool(e, context.to_string()))
    }
}

fn pg_config(config: &DatabaseConfig) -> PgConfig {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);
    pg_config.application_name("incr-load");

    // Long batches must not be cut by idle middleboxes
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));
    pg_config.connect_timeout(Duration::from_secs(config.connect_timeout_secs));
    pg_config
}

/// Driver view of a bound value.
fn param_ref(param: &SqlParam) -> &(dyn ToSql + Sync) {
    match param {
        SqlParam::Date(d) => d,
        SqlParam::BigInt(v) => v,
    }
}

const COLUMNS_QUERY: &str = r#"
    SELECT
        a.attname,
        format_type(a.atttypid, a.atttypmod),
        NOT a.attnotnull,
        a.attidentity IN ('a', 'd')
            OR COALESCE(pg_get_expr(d.adbin, d.adrelid), '') LIKE 'nextval(%' AS is_identity,
        (d.adbin IS NOT NULL OR a.attgenerated <> '')
            AND COALESCE(pg_get_expr(d.adbin, d.adrelid), '') NOT LIKE 'nextval(%' AS has_default
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class t ON t.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE n.nspname = $1
      AND t.relname = $2
      AND a.attnum > 0
      AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

const KEY_CONSTRAINTS_QUERY: &str = r#"
    SELECT
        c.conname,
        c.contype::text,
        array_agg(a.attname::text ORDER BY array_position(c.conkey, a.attnum))
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(c.conkey)
    WHERE n.nspname = $1
      AND t.relname = $2
      AND c.contype IN ('p', 'u')
    GROUP BY c.conname, c.contype
    ORDER BY c.conname
"#;

const UNIQUE_INDEXES_QUERY: &str = r#"
    SELECT
        i.relname,
        array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum))
    FROM pg_catalog.pg_index ix
    JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
    JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
    WHERE n.nspname = $1
      AND t.relname = $2
      AND ix.indisunique
      AND ix.indpred IS NULL
      AND NOT EXISTS (
          SELECT 1 FROM pg_catalog.pg_constraint c WHERE c.conindid = ix.indexrelid
      )
    GROUP BY i.relname
    ORDER BY i.relname
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        c.conname,
        array_agg(a.attname::text ORDER BY array_position(c.conkey, a.attnum)),
        rn.nspname::text,
        rt.relname::text,
        array_agg(ra.attname::text ORDER BY array_position(c.confkey, ra.attnum))
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
    JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(c.conkey)
    JOIN pg_catalog.pg_attribute ra ON ra.attrelid = rt.oid AND ra.attnum = ANY(c.confkey)
    WHERE n.nspname = $1
      AND t.relname = $2
      AND c.contype = 'f'
      AND array_position(c.conkey, a.attnum) = array_position(c.confkey, ra.attnum)
    GROUP BY c.conname, rn.nspname, rt.relname
    ORDER BY c.conname
"#;

const INDEXES_QUERY: &str = r#"
    SELECT i.schemaname::text, i.indexname::text, i.indexdef
    FROM pg_catalog.pg_indexes i
    WHERE i.schemaname = $1
      AND i.tablename = $2
      AND NOT EXISTS (
          SELECT 1
          FROM pg_catalog.pg_constraint c
          JOIN pg_catalog.pg_class ic ON ic.oid = c.conindid
          JOIN pg_catalog.pg_namespace ns ON ns.oid = ic.relnamespace
          WHERE ic.relname = i.indexname AND ns.nspname = i.schemaname
      )
    ORDER BY i.indexname
"#;

#[async_trait]
impl Catalog for PgTarget {
    async fn describe_entity(&self, table: &TableRef) -> Result<EntityDescription> {
        let client = self.client("describing entity").await?;

        let rows = client
            .query(COLUMNS_QUERY, &[&table.schema, &table.name])
            .await?;
        if rows.is_empty() {
            return Err(LoadError::Config(format!(
                "table {} does not exist or has no columns",
                table
            )));
        }
        let columns: Vec<Column> = rows
            .iter()
            .map(|row| Column {
                name: row.get(0),
                data_type: row.get(1),
                is_nullable: row.get(2),
                is_identity: row.get(3),
                has_server_default: row.get(4),
            })
            .collect();
        let mut entity = EntityDescription::new(table.clone(), columns);

        for row in client
            .query(KEY_CONSTRAINTS_QUERY, &[&table.schema, &table.name])
            .await?
        {
            let name: String = row.get(0);
            let contype: String = row.get(1);
            let columns: Vec<String> = row.get(2);
            if contype == "p" {
                entity.primary_key = columns;
            } else {
                entity
                    .unique_constraints
                    .push(UniqueConstraint { name, columns });
            }
        }

        for row in client
            .query(UNIQUE_INDEXES_QUERY, &[&table.schema, &table.name])
            .await?
        {
            entity.unique_constraints.push(UniqueConstraint {
                name: row.get(0),
                columns: row.get(1),
            });
        }

        for row in client
            .query(FOREIGN_KEYS_QUERY, &[&table.schema, &table.name])
            .await?
        {
            entity.foreign_keys.push(ForeignKey {
                name: row.get(0),
                columns: row.get(1),
                ref_schema: row.get(2),
                ref_table: row.get(3),
                ref_columns: row.get(4),
            });
        }

        debug!(
            "Described {}: {} columns, keys {}",
            table,
            entity.columns.len(),
            entity.describe_keys()
        );
        Ok(entity)
    }

    async fn list_indexes(&self, table: &TableRef) -> Result<Vec<IndexDef>> {
        let client = self.client("listing indexes").await?;
        let rows = client
            .query(INDEXES_QUERY, &[&table.schema, &table.name])
            .await?;
        Ok(rows
            .iter()
            .map(|row| IndexDef {
                schema: row.get(0),
                name: row.get(1),
                definition: row.get(2),
            })
            .collect())
    }

    async fn list_constraints(
        &self,
        table: &TableRef,
        kind: ConstraintKind,
    ) -> Result<Vec<ConstraintDef>> {
        let client = self.client("listing constraints").await?;
        let query = format!(
            "SELECT c.conname::text, pg_get_constraintdef(c.oid)
             FROM pg_catalog.pg_constraint c
             JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
             JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
             WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = '{}'
             ORDER BY c.conname",
            kind.contype()
        );
        let rows = client.query(&query, &[&table.schema, &table.name]).await?;
        Ok(rows
            .iter()
            .map(|row| ConstraintDef {
                name: row.get(0),
                kind,
                definition: row.get(1),
            })
            .collect())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        debug!("DDL: {}", sql);
        let client = self.client("executing DDL").await?;
        client.batch_execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl DateStats for PgTarget {
    async fn min_max_date(
        &self,
        table: &TableRef,
        column: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let client = self.client("reading date bounds").await?;
        let column = quote_ident(column);
        let query = format!(
            "SELECT MIN({c})::date, MAX({c})::date FROM {t}",
            c = column,
            t = table.quoted()
        );
        let row = client.query_one(&query, &[]).await?;
        let min: Option<NaiveDate> = row.get(0);
        let max: Option<NaiveDate> = row.get(1);
        Ok(min.zip(max))
    }

    async fn min_date(&self, table: &TableRef, column: &str) -> Result<Option<NaiveDate>> {
        let client = self.client("reading minimum date").await?;
        let query = format!(
            "SELECT MIN({})::date FROM {}",
            quote_ident(column),
            table.quoted()
        );
        let row = client.query_one(&query, &[]).await?;
        Ok(row.get(0))
    }

    async fn daily_counts(&self, table: &TableRef, column: &str) -> Result<Vec<(NaiveDate, i64)>> {
        let client = self.client("reading daily counts").await?;
        let column = quote_ident(column);
        let query = format!(
            "SELECT {c}::date, COUNT(*)::int8 FROM {t} WHERE {c} IS NOT NULL GROUP BY 1 ORDER BY 1",
            c = column,
            t = table.quoted()
        );
        let rows = client.query(&query, &[]).await?;
        Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
    }
}

#[async_trait]
impl StatementExecutor for PgTarget {
    async fn execute_transaction(
        &self,
        statements: &[BoundStatement],
    ) -> Result<ExecutionOutcome> {
        let mut client = self.client("executing load").await?;
        let tx = client.transaction().await?;
        let mut outcome = ExecutionOutcome::default();

        for stmt in statements {
            let params: Vec<&(dyn ToSql + Sync)> = stmt.params.iter().map(param_ref).collect();
            match stmt.role {
                StatementRole::Session => {
                    tx.execute(stmt.sql.as_str(), &params).await?;
                }
                StatementRole::Load(RowCount::Affected) => {
                    outcome.rowcount += tx.execute(stmt.sql.as_str(), &params).await? as i64;
                }
                StatementRole::Load(RowCount::Selected) => {
                    let row = tx.query_one(stmt.sql.as_str(), &params).await?;
                    let count: Option<i64> = row.get(0);
                    outcome.rowcount += count.unwrap_or(0);
                }
                StatementRole::SelfReference => {
                    outcome.self_reference_rows +=
                        tx.execute(stmt.sql.as_str(), &params).await? as i64;
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn last_tracked_version(&self, tracking_table: &TableRef) -> Result<Option<i64>> {
        let client = self.client("reading tracked version").await?;
        let query = format!(
            "SELECT MAX(last_source_version)::int8 FROM {}",
            tracking_table.quoted()
        );
        let row = client.query_one(&query, &[]).await?;
        Ok(row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> DatabaseConfig {
        serde_yaml::from_str(
            "host: db.internal\nport: 6432\ndatabase: warehouse\nuser: loader\npassword: pw\nconnect_timeout_secs: 5\n",
        )
        .unwrap()
    }

    #[test]
    fn test_pg_config() {
        let cfg = pg_config(&database());
        assert_eq!(cfg.get_dbname(), Some("warehouse"));
        assert_eq!(cfg.get_user(), Some("loader"));
        assert_eq!(cfg.get_ports(), &[6432]);
        assert_eq!(cfg.get_connect_timeout(), Some(&Duration::from_secs(5)));
        assert_eq!(cfg.get_application_name(), Some("incr-load"));
    }

    #[test]
    fn test_param_ref_types() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let date = SqlParam::Date(d);
        let version = SqlParam::BigInt(7);
        assert!(format!("{:?}", param_ref(&date)).contains("2024-01-01"));
        assert_eq!(format!("{:?}", param_ref(&version)), "7");
    }
}
