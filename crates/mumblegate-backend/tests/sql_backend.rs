//! Integration tests for the SQL backend over an in-memory database.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FakeDb, FakeManager, FakeUser};
use mumblegate_backend::{
    AvatarFetcher, BackendAuthenticator, BackendError, DatabaseSettings, IdentityStore, Pool,
    SqlAuthenticator,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// =========================================================================
// Helpers
// =========================================================================

fn backend_with(db: &Arc<FakeDb>, settings: DatabaseSettings) -> SqlAuthenticator<FakeManager> {
    let pool = Arc::new(Pool::new(FakeManager(Arc::clone(db)), 8, 4));
    let store = IdentityStore::new(pool, &settings);
    SqlAuthenticator::new(store, vec!["SuperUser".into()])
}

fn backend(db: &Arc<FakeDb>) -> SqlAuthenticator<FakeManager> {
    backend_with(db, DatabaseSettings::default())
}

fn alice_db() -> Arc<FakeDb> {
    FakeDb::with_users(vec![
        FakeUser::sha1(42, "alice", "secret").with_groups("Member,Director"),
        FakeUser::sha1(7, "SuperUser", "root"),
        FakeUser::sha1(9, "bob", "hunter2"),
    ])
}

// =========================================================================
// authenticate
// =========================================================================

#[tokio::test]
async fn test_authenticate_correct_password_returns_user() {
    let db = alice_db();
    let user = backend(&db)
        .authenticate("alice", "secret")
        .await
        .unwrap()
        .expect("alice should authenticate");

    assert_eq!(user.id, 42);
    assert_eq!(user.name, "alice");
    assert_eq!(user.groups, vec!["Member", "Director"]);
    assert_eq!(db.query_count(), 1);
}

#[tokio::test]
async fn test_authenticate_wrong_password_is_refused() {
    let db = alice_db();
    let err = backend(&db).authenticate("alice", "secreT").await.unwrap_err();
    assert!(matches!(err, BackendError::AuthRefused));
}

#[tokio::test]
async fn test_authenticate_unknown_user_is_none() {
    let db = alice_db();
    let result = backend(&db).authenticate("mallory", "x").await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_authenticate_reserved_name_never_touches_database() {
    let db = alice_db();
    let result = backend(&db).authenticate("SuperUser", "root").await.unwrap();
    assert!(result.is_none());
    assert_eq!(db.query_count(), 0);
}

#[tokio::test]
async fn test_authenticate_bcrypt_sha256_stored_by_passlib() {
    // passlib's v2 layout for "secret": `$bcrypt-sha256$params$salt$digest`.
    const STORED: &str =
        "$bcrypt-sha256$v=2,t=2b,r=5$Ro0CUfOqk6cXEKf3dyaM7O$ZhnJ4JWzkhfiDujKXohjsFWTR4qGWae";
    let mut user = FakeUser::sha1(42, "alice", "unused");
    user.pwhash = STORED.into();
    user.hashfn = "bcrypt-sha256".into();
    let db = FakeDb::with_users(vec![user]);
    let b = backend(&db);

    let found = b.authenticate("alice", "secret").await.unwrap().expect("alice");
    assert_eq!(found.id, 42);
    let err = b.authenticate("alice", "Secret").await.unwrap_err();
    assert!(matches!(err, BackendError::AuthRefused));
}

#[tokio::test]
async fn test_authenticate_unknown_scheme_is_refused() {
    let mut user = FakeUser::sha1(3, "carol", "pw");
    user.hashfn = "md5".into();
    let db = FakeDb::with_users(vec![user]);

    let err = backend(&db).authenticate("carol", "pw").await.unwrap_err();
    assert!(matches!(err, BackendError::AuthRefused));
}

#[tokio::test]
async fn test_authenticate_decodes_and_prefers_display_name() {
    let db = FakeDb::with_users(vec![
        FakeUser::sha1(1, "d&amp;d", "pw"),
        FakeUser::sha1(2, "eve", "pw").with_display_name("&lt;CORP&gt; Eve"),
    ]);
    let b = backend_with(
        &db,
        DatabaseSettings {
            display_name_column: Some("display_name".into()),
            ..Default::default()
        },
    );

    let first = b.authenticate("d&amp;d", "pw").await.unwrap().unwrap();
    assert_eq!(first.name, "d&d");
    assert!(first.groups.is_empty());

    let second = b.authenticate("eve", "pw").await.unwrap().unwrap();
    assert_eq!(second.name, "<CORP> Eve");
}

// =========================================================================
// Lookups
// =========================================================================

#[tokio::test]
async fn test_get_id_and_get_name_round_trip() {
    let db = alice_db();
    let b = backend(&db);

    let id = b.get_id("alice").await.unwrap().unwrap();
    assert_eq!(id, 42);
    assert_eq!(b.get_name(id).await.unwrap().as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_reserved_name_is_unknown_in_both_directions() {
    let db = alice_db();
    let b = backend(&db);

    assert_eq!(b.get_id("SuperUser").await.unwrap(), None);
    assert_eq!(b.get_name(7).await.unwrap(), None);
}

#[tokio::test]
async fn test_get_name_unknown_id_is_none() {
    let db = alice_db();
    assert_eq!(backend(&db).get_name(1234).await.unwrap(), None);
}

#[tokio::test]
async fn test_get_registered_users_filters_and_hides_reserved() {
    let db = alice_db();
    let b = backend(&db);

    let all = b.get_registered_users("").await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.get(&42).map(String::as_str), Some("alice"));
    assert_eq!(all.get(&9).map(String::as_str), Some("bob"));

    let some = b.get_registered_users("%li%").await.unwrap();
    assert_eq!(some.keys().copied().collect::<Vec<_>>(), vec![42]);
}

#[tokio::test]
async fn test_get_info_defaults_to_none() {
    let db = alice_db();
    assert_eq!(backend(&db).get_info(42).await.unwrap(), None);
}

// =========================================================================
// Connection failures
// =========================================================================

#[tokio::test]
async fn test_lost_connection_is_retried_once() {
    let db = alice_db();
    db.fail_queries.store(1, Ordering::SeqCst);
    let b = backend(&db);

    let user = b.authenticate("alice", "secret").await.unwrap();
    assert!(user.is_some());
    assert_eq!(db.query_count(), 2);
    assert_eq!(db.connect_count(), 2, "broken connection must not be reused");
}

#[tokio::test]
async fn test_repeated_failure_is_unavailable() {
    let db = alice_db();
    db.fail_queries.store(2, Ordering::SeqCst);

    let err = backend(&db).authenticate("alice", "secret").await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(db.query_count(), 2);
}

#[tokio::test]
async fn test_connect_failure_is_unavailable() {
    let db = alice_db();
    db.fail_connects.store(5, Ordering::SeqCst);

    let err = backend(&db).get_id("alice").await.unwrap_err();
    assert!(matches!(err, BackendError::Unavailable(_)));
    assert_eq!(db.query_count(), 0);
}

#[tokio::test]
async fn test_connections_are_reused_between_calls() {
    let db = alice_db();
    let b = backend(&db);
    for _ in 0..5 {
        b.get_id("bob").await.unwrap();
    }
    assert_eq!(db.connect_count(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_pool() {
    let db = alice_db();
    let b = backend(&db);
    b.get_id("bob").await.unwrap();

    b.shutdown().await;
    assert!(b.store().pool().is_closed());
    assert!(b.get_id("bob").await.unwrap_err().is_unavailable());
}

// =========================================================================
// Avatars
// =========================================================================

/// Serves `body` with a 200 to every request and counts requests.
async fn image_server(body: &'static [u8]) -> (String, Arc<std::sync::atomic::AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(body).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/characters/{{charid}}.png"), hits)
}

#[tokio::test]
async fn test_texture_disabled_returns_none() {
    let db = alice_db();
    db.characters.lock().unwrap().insert(42, 90_000_001);
    assert_eq!(backend(&db).get_texture(42).await.unwrap(), None);
    assert_eq!(db.query_count(), 0);
}

#[tokio::test]
async fn test_texture_is_fetched_and_cached() {
    let db = alice_db();
    db.characters.lock().unwrap().insert(42, 90_000_001);
    let (template, hits) = image_server(b"\x89PNG fake").await;

    let avatars = AvatarFetcher::new(template, Duration::from_secs(5)).unwrap();
    let b = backend(&db).with_avatars(avatars);

    let first = b.get_texture(42).await.unwrap().expect("avatar");
    assert_eq!(first, b"\x89PNG fake");
    let second = b.get_texture(42).await.unwrap().expect("avatar");
    assert_eq!(second, first);
    assert_eq!(hits.load(Ordering::SeqCst), 1, "second fetch must hit the cache");
}

#[tokio::test]
async fn test_texture_without_character_is_none() {
    let db = alice_db();
    let (template, hits) = image_server(b"x").await;
    let avatars = AvatarFetcher::new(template, Duration::from_secs(5)).unwrap();
    let b = backend(&db).with_avatars(avatars);

    assert_eq!(b.get_texture(9).await.unwrap(), None);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_texture_download_failure_is_none() {
    let db = alice_db();
    db.characters.lock().unwrap().insert(42, 1);

    // Bind and drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let avatars =
        AvatarFetcher::new(format!("http://{addr}/{{charid}}"), Duration::from_secs(1)).unwrap();
    let b = backend(&db).with_avatars(avatars);
    assert_eq!(b.get_texture(42).await.unwrap(), None);
}

#[tokio::test]
async fn test_texture_from_stalled_server_times_out_uncached() {
    let db = alice_db();
    db.characters.lock().unwrap().insert(42, 90_000_001);

    // Accepts connections and never writes a byte back.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let template = format!("http://{addr}/{{charid}}");
    let avatars = AvatarFetcher::new(template, Duration::from_millis(200)).unwrap();
    let b = backend(&db).with_avatars(avatars);

    let texture = tokio::time::timeout(Duration::from_secs(2), b.get_texture(42))
        .await
        .expect("fetch must give up on its own timeout");
    assert_eq!(texture.unwrap(), None);
    assert_eq!(b.avatars().unwrap().cached().await, 0);
}
