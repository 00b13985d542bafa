//! An in-memory stand-in for the user database.
//!
//! [`FakeManager`] hands out connections that answer the store's four
//! statement shapes from a shared [`FakeDb`], and can be told to fail.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mumblegate_backend::{ConnectionManager, DbConnection, DbError, Row, SqlParam, SqlValue};

#[derive(Debug, Clone)]
pub struct FakeUser {
    pub user_id: i32,
    pub username: String,
    pub pwhash: String,
    pub groups: Option<String>,
    pub hashfn: String,
    pub display_name: Option<String>,
}

impl FakeUser {
    /// A user whose password is `password`, stored as unsalted SHA-1.
    pub fn sha1(user_id: i32, username: &str, password: &str) -> Self {
        use sha1::{Digest, Sha1};
        Self {
            user_id,
            username: username.into(),
            pwhash: hex::encode(Sha1::digest(password.as_bytes())),
            groups: None,
            hashfn: "sha1".into(),
            display_name: None,
        }
    }

    pub fn with_groups(mut self, groups: &str) -> Self {
        self.groups = Some(groups.into());
        self
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Default)]
pub struct FakeDb {
    pub users: Mutex<Vec<FakeUser>>,
    /// backend user id → character id
    pub characters: Mutex<HashMap<i32, i64>>,
    /// Number of upcoming queries that fail with a lost connection.
    pub fail_queries: AtomicUsize,
    /// Number of upcoming connects that fail.
    pub fail_connects: AtomicUsize,
    pub queries: AtomicUsize,
    pub connects: AtomicUsize,
    pub last_sql: Mutex<Option<String>>,
}

impl FakeDb {
    pub fn with_users(users: Vec<FakeUser>) -> Arc<Self> {
        let db = Self::default();
        *db.users.lock().unwrap() = users;
        Arc::new(db)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct FakeManager(pub Arc<FakeDb>);

pub struct FakeConnection {
    db: Arc<FakeDb>,
    broken: bool,
}

#[async_trait]
impl ConnectionManager for FakeManager {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, DbError> {
        if FakeDb::take_failure(&self.0.fail_connects) {
            return Err(DbError::Connect("connection refused".into()));
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            db: Arc::clone(&self.0),
            broken: false,
        })
    }
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.into())
}

fn opt_text(s: &Option<String>) -> SqlValue {
    s.as_deref().map(text).unwrap_or(SqlValue::Null)
}

fn user_row(u: &FakeUser, with_display: bool) -> Row {
    let mut values = vec![
        SqlValue::Int(u.user_id.into()),
        text(&u.username),
        text(&u.pwhash),
        opt_text(&u.groups),
        text(&u.hashfn),
    ];
    if with_display {
        values.push(opt_text(&u.display_name));
    }
    Row::new(values)
}

/// `LIKE` with `%` wildcards only.
fn like(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return pattern == value;
    }
    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            let Some(r) = rest.strip_prefix(part) else {
                return false;
            };
            rest = r;
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            let Some(pos) = rest.find(part) else {
                return false;
            };
            rest = &rest[pos + part.len()..];
        }
    }
    true
}

#[async_trait]
impl DbConnection for FakeConnection {
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, DbError> {
        self.db.queries.fetch_add(1, Ordering::SeqCst);
        *self.db.last_sql.lock().unwrap() = Some(sql.to_string());

        if FakeDb::take_failure(&self.db.fail_queries) {
            self.broken = true;
            return Err(DbError::ConnectionLost("server closed the connection".into()));
        }

        let with_display = sql.contains("display_name");
        let users = self.db.users.lock().unwrap();

        let rows = match params {
            [SqlParam::Text(pattern)] if sql.contains("LIKE") => users
                .iter()
                .filter(|u| like(pattern, &u.username))
                .map(|u| Row::new(vec![SqlValue::Int(u.user_id.into()), text(&u.username)]))
                .collect(),
            [SqlParam::Text(name)] => users
                .iter()
                .filter(|u| &u.username == name)
                .map(|u| user_row(u, with_display))
                .collect(),
            [SqlParam::Int(id)] if sql.contains("character_id") => self
                .db
                .characters
                .lock()
                .unwrap()
                .get(id)
                .map(|c| vec![Row::new(vec![SqlValue::Int(*c)])])
                .unwrap_or_default(),
            [SqlParam::Int(id)] => users
                .iter()
                .filter(|u| u.user_id == *id)
                .map(|u| user_row(u, with_display))
                .collect(),
            other => return Err(DbError::Query(format!("unexpected params {other:?}"))),
        };
        Ok(rows)
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}
