//! PostgreSQL connections via `tokio-postgres`.

use async_trait::async_trait;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, warn};

use crate::{ConnectionManager, DatabaseSettings, DbConnection, DbError, Row, SqlParam, SqlValue};

/// Opens plain-TCP connections to one PostgreSQL database.
pub struct PostgresManager {
    config: Config,
    label: String,
}

impl PostgresManager {
    pub fn new(settings: &DatabaseSettings) -> Self {
        let mut config = Config::new();
        config
            .host(&settings.host)
            .port(settings.port)
            .dbname(&settings.name)
            .user(&settings.user)
            .application_name("mumblegate");
        if !settings.password.is_empty() {
            config.password(&settings.password);
        }
        Self {
            config,
            label: format!("{}:{}/{}", settings.host, settings.port, settings.name),
        }
    }
}

#[async_trait]
impl ConnectionManager for PostgresManager {
    type Connection = PostgresConnection;

    async fn connect(&self) -> Result<PostgresConnection, DbError> {
        debug!(database = %self.label, "connecting to database");
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| DbError::Connect(format!("{}: {e}", self.label)))?;

        // The connection object drives the socket; it finishes when the
        // client is dropped or the server goes away.
        let label = self.label.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(database = %label, error = %e, "database connection closed with error");
            }
        });

        Ok(PostgresConnection { client })
    }
}

/// One live PostgreSQL session.
pub struct PostgresConnection {
    client: Client,
}

#[async_trait]
impl DbConnection for PostgresConnection {
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, DbError> {
        let bound: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| match p {
                SqlParam::Int(v) => v as &(dyn ToSql + Sync),
                SqlParam::Text(s) => s as &(dyn ToSql + Sync),
            })
            .collect();

        let rows = self.client.query(sql, &bound).await.map_err(|e| {
            if e.is_closed() || self.client.is_closed() {
                DbError::ConnectionLost(e.to_string())
            } else {
                DbError::Query(e.to_string())
            }
        })?;

        rows.iter().map(convert_row).collect()
    }

    fn is_broken(&self) -> bool {
        self.client.is_closed()
    }
}

fn convert_row(row: &tokio_postgres::Row) -> Result<Row, DbError> {
    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let column_err = |e: tokio_postgres::Error| DbError::Column {
            index,
            reason: e.to_string(),
        };
        let ty = column.type_();
        let value = if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(index)
                .map_err(column_err)?
                .map(|v| SqlValue::Int(v.into()))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(index)
                .map_err(column_err)?
                .map(|v| SqlValue::Int(v.into()))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(index)
                .map_err(column_err)?
                .map(SqlValue::Int)
        } else if [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME].contains(ty) {
            row.try_get::<_, Option<String>>(index)
                .map_err(column_err)?
                .map(SqlValue::Text)
        } else {
            return Err(DbError::Column {
                index,
                reason: format!("unsupported column type {ty}"),
            });
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(Row::new(values))
}
