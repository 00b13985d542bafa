//! Read-only access to the user table.
//!
//! Every lookup is a single statement on a connection checked out of the
//! pool for just that call. If the connection turns out to be dead, the
//! statement is retried once on a fresh connection before giving up.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::identity::parse_groups;
use crate::{
    BackendError, ConnectionManager, DatabaseSettings, DbConnection, DbError, Identity, Pool,
    Row, SqlParam,
};

/// The statements the store runs, rendered once from the settings.
#[derive(Debug, Clone)]
struct Statements {
    by_username: String,
    by_id: String,
    search: String,
    character: String,
}

impl Statements {
    fn new(settings: &DatabaseSettings) -> Self {
        let table = quote_ident(&format!("{}{}", settings.prefix, settings.table));
        let characters = quote_ident(&format!("{}{}", settings.prefix, settings.character_table));
        let profiles = quote_ident(&format!("{}{}", settings.prefix, settings.profile_table));

        let display = settings
            .display_name_column
            .as_deref()
            .map(|col| format!(", {}", quote_ident(col)))
            .unwrap_or_default();
        let columns = format!(
            r#""user_id", "username", "pwhash", "groups", "hashfn"{display}"#
        );

        Self {
            by_username: format!(r#"SELECT {columns} FROM {table} WHERE "username" = $1"#),
            by_id: format!(r#"SELECT {columns} FROM {table} WHERE "user_id" = $1::int4"#),
            search: format!(
                "SELECT \"user_id\", \"username\" FROM {table} \
                 WHERE \"username\" LIKE $1 ORDER BY \"user_id\""
            ),
            character: format!(
                "SELECT eec.character_id FROM {characters} AS eec, {profiles} AS aup \
                 WHERE aup.user_id = $1::int4 AND aup.main_character_id = eec.id"
            ),
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Looks users up in the identity database.
pub struct IdentityStore<M: ConnectionManager> {
    pool: Arc<Pool<M>>,
    statements: Statements,
    has_display_name: bool,
}

impl<M: ConnectionManager> IdentityStore<M> {
    pub fn new(pool: Arc<Pool<M>>, settings: &DatabaseSettings) -> Self {
        Self {
            pool,
            statements: Statements::new(settings),
            has_display_name: settings.display_name_column.is_some(),
        }
    }

    pub fn pool(&self) -> &Arc<Pool<M>> {
        &self.pool
    }

    /// The user with this exact login name.
    pub async fn find_by_username(&self, name: &str) -> Result<Option<Identity>, BackendError> {
        let rows = self
            .query(&self.statements.by_username, &[SqlParam::Text(name.into())])
            .await?;
        self.first_identity(rows)
    }

    /// The user with this backend id.
    pub async fn find_by_id(&self, id: i32) -> Result<Option<Identity>, BackendError> {
        let rows = self
            .query(&self.statements.by_id, &[SqlParam::Int(id)])
            .await?;
        self.first_identity(rows)
    }

    /// Users whose name matches the SQL `LIKE` pattern `filter`; an empty
    /// filter matches everyone.
    pub async fn search(&self, filter: &str) -> Result<BTreeMap<i32, String>, BackendError> {
        let pattern = if filter.is_empty() { "%" } else { filter };
        let rows = self
            .query(&self.statements.search, &[SqlParam::Text(pattern.into())])
            .await?;
        let users = rows
            .iter()
            .map(|row| -> Result<(i32, String), DbError> { Ok((row.int(0)?, row.text(1)?)) })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(users)
    }

    /// The external character id of the user's main character, if any.
    pub async fn find_character_id(&self, id: i32) -> Result<Option<String>, BackendError> {
        let rows = self
            .query(&self.statements.character, &[SqlParam::Int(id)])
            .await?;
        match rows.first() {
            Some(row) => Ok(row.to_string_lossy(0)?),
            None => Ok(None),
        }
    }

    /// Closes the pool. Further lookups fail as unavailable.
    pub fn close(&self) {
        self.pool.close();
    }

    fn first_identity(&self, rows: Vec<Row>) -> Result<Option<Identity>, BackendError> {
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let identity = Identity {
            user_id: row.int(0)?,
            username: row.text(1)?,
            pwhash: row.text(2)?,
            groups: parse_groups(row.opt_text(3)?.as_deref()),
            hashfn: row.text(4)?,
            display_name: if self.has_display_name {
                row.opt_text(5)?
            } else {
                None
            },
        };
        Ok(Some(identity))
    }

    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, BackendError> {
        match self.query_once(sql, params).await {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_fatal() && !self.pool.is_closed() => {
                info!(error = %e, "retrying database operation on a fresh connection");
                self.query_once(sql, params).await.map_err(|e| {
                    error!(error = %e, "database operation failed ultimately");
                    BackendError::from(e)
                })
            }
            Err(e) => {
                error!(error = %e, "database operation failed");
                Err(e.into())
            }
        }
    }

    async fn query_once(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, DbError> {
        let mut conn = self.pool.get().await?;
        debug!(sql, "running query");
        let result = conn.query(sql, params).await;
        if matches!(&result, Err(e) if e.is_fatal()) {
            conn.discard();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_use_prefix_and_quoting() {
        let settings = DatabaseSettings {
            prefix: "aa_".into(),
            ..Default::default()
        };
        let s = Statements::new(&settings);
        assert_eq!(
            s.by_username,
            concat!(
                r#"SELECT "user_id", "username", "pwhash", "groups", "hashfn" "#,
                r#"FROM "aa_mumble_mumbleuser" WHERE "username" = $1"#
            )
        );
        assert!(s.by_id.ends_with(r#"WHERE "user_id" = $1::int4"#));
        assert!(s.search.contains(r#"WHERE "username" LIKE $1"#));
        assert!(s.character.contains(r#""aa_eveonline_evecharacter" AS eec"#));
        assert!(s.character.contains(r#""aa_authentication_userprofile" AS aup"#));
    }

    #[test]
    fn test_statements_include_display_name_column() {
        let settings = DatabaseSettings {
            display_name_column: Some("display_name".into()),
            ..Default::default()
        };
        let s = Statements::new(&settings);
        assert!(s.by_username.contains(r#""hashfn", "display_name" FROM"#));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }
}
