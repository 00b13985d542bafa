//! Hand-written doubles for the chat server and a backend.
//!
//! Every double counts its calls so tests can assert not only what was
//! answered but also what was (not) asked.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mumblegate_backend::{AuthenticatedUser, BackendAuthenticator, BackendError, BackendRegistry};
use mumblegate_protocol::{
    AuthenticateRequest, Context, MetaCallback, MetaProxy, PeerConnector, PeerError,
    ServerAuthenticator, ServerId, ServerProxy, UserId, UserInfo, UserInfoField,
};
use mumblegate_session::{ErrorPolicy, ServerProfile, SessionConfig};

pub const SECRET: &str = "s3cret";
pub const MOCK_KIND: &str = "mock";
pub const OFFSET: i32 = 1_000_000_000;

// =========================================================================
// Backend
// =========================================================================

pub struct MockUser {
    pub id: i32,
    pub name: &'static str,
    pub password: &'static str,
    pub groups: Vec<String>,
}

#[derive(Default)]
pub struct MockBackend {
    pub users: Vec<MockUser>,
    pub calls: AtomicUsize,
    pub shutdowns: AtomicUsize,
    /// Every call fails as unavailable.
    pub fail: AtomicBool,
    /// Every call panics.
    pub panic: AtomicBool,
}

impl MockBackend {
    /// alice (42) and bob (9), plus the reserved SuperUser (7).
    pub fn standard() -> Arc<Self> {
        Arc::new(Self {
            users: vec![
                MockUser {
                    id: 42,
                    name: "alice",
                    password: "secret",
                    groups: vec!["Member".into(), "Director".into()],
                },
                MockUser {
                    id: 9,
                    name: "bob",
                    password: "hunter2",
                    groups: vec![],
                },
                MockUser {
                    id: 7,
                    name: "SuperUser",
                    password: "root",
                    groups: vec![],
                },
            ],
            ..Default::default()
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic.load(Ordering::SeqCst) {
            panic!("mock backend exploded");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("database down".into()));
        }
        Ok(())
    }

    fn visible(&self) -> impl Iterator<Item = &MockUser> {
        self.users.iter().filter(|u| u.name != "SuperUser")
    }
}

#[async_trait]
impl BackendAuthenticator for MockBackend {
    fn kind(&self) -> &str {
        MOCK_KIND
    }

    async fn authenticate(
        &self,
        name: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>, BackendError> {
        self.enter()?;
        let Some(user) = self.visible().find(|u| u.name == name) else {
            return Ok(None);
        };
        if user.password != password {
            return Err(BackendError::AuthRefused);
        }
        Ok(Some(AuthenticatedUser {
            id: user.id,
            name: user.name.to_string(),
            groups: user.groups.clone(),
        }))
    }

    async fn get_id(&self, name: &str) -> Result<Option<i32>, BackendError> {
        self.enter()?;
        Ok(self.visible().find(|u| u.name == name).map(|u| u.id))
    }

    async fn get_name(&self, id: i32) -> Result<Option<String>, BackendError> {
        self.enter()?;
        Ok(self.visible().find(|u| u.id == id).map(|u| u.name.to_string()))
    }

    async fn get_info(&self, id: i32) -> Result<Option<UserInfo>, BackendError> {
        self.enter()?;
        Ok(self.visible().find(|u| u.id == id).map(|u| {
            let mut info = UserInfo::new();
            info.insert(UserInfoField::UserName, u.name.to_string());
            info
        }))
    }

    async fn get_texture(&self, id: i32) -> Result<Option<Vec<u8>>, BackendError> {
        self.enter()?;
        Ok((id == 42).then(|| b"avatar".to_vec()))
    }

    async fn get_registered_users(
        &self,
        filter: &str,
    ) -> Result<BTreeMap<i32, String>, BackendError> {
        self.enter()?;
        let needle = filter.trim_matches('%');
        Ok(self
            .visible()
            .filter(|u| u.name.contains(needle))
            .map(|u| (u.id, u.name.to_string()))
            .collect())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// A registry whose "mock" kind always hands out `backend`, counting builds.
pub fn registry_with(backend: &Arc<MockBackend>) -> (BackendRegistry, Arc<AtomicUsize>) {
    let builds = Arc::new(AtomicUsize::new(0));
    let mut registry = BackendRegistry::new();
    let backend = Arc::clone(backend);
    let counter = Arc::clone(&builds);
    registry.register(MOCK_KIND, move |_spec| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&backend) as Arc<dyn BackendAuthenticator>)
    });
    (registry, builds)
}

pub fn config(secret: Option<&str>) -> SessionConfig {
    SessionConfig {
        secret: secret.map(str::to_string),
        watchdog: Duration::ZERO,
        error_policy: ErrorPolicy::Reject,
        default_profile: ServerProfile {
            id_offset: OFFSET,
            backend_kind: MOCK_KIND.into(),
            backend_settings: serde_json::Value::Null,
        },
        ..Default::default()
    }
}

pub fn ctx() -> Context {
    Context::with_secret(Some(SECRET))
}

// =========================================================================
// Chat server
// =========================================================================

pub struct MockServer {
    pub id: ServerId,
    pub id_calls: AtomicUsize,
    pub set_calls: AtomicUsize,
    pub reachable: AtomicBool,
    pub reject_secret: AtomicBool,
    pub installed: Mutex<Option<Arc<dyn ServerAuthenticator>>>,
    pub releases: AtomicUsize,
}

impl MockServer {
    pub fn new(id: i32) -> Arc<Self> {
        Arc::new(Self {
            id: ServerId(id),
            id_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
            reachable: AtomicBool::new(true),
            reject_secret: AtomicBool::new(false),
            installed: Mutex::new(None),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn rpc_calls(&self) -> usize {
        self.id_calls.load(Ordering::SeqCst) + self.set_calls.load(Ordering::SeqCst)
    }

    pub fn installed(&self) -> Option<Arc<dyn ServerAuthenticator>> {
        self.installed.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), PeerError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PeerError::Unreachable("connection refused".into()))
        }
    }
}

#[async_trait]
impl ServerProxy for MockServer {
    async fn id(&self) -> Result<ServerId, PeerError> {
        self.id_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.id)
    }

    fn known_id(&self) -> Option<ServerId> {
        Some(self.id)
    }

    async fn set_authenticator(
        &self,
        authenticator: Arc<dyn ServerAuthenticator>,
    ) -> Result<(), PeerError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if self.reject_secret.load(Ordering::SeqCst) {
            return Err(PeerError::InvalidSecret);
        }
        *self.installed.lock().unwrap() = Some(authenticator);
        Ok(())
    }

    async fn verify_password(&self, name: &str, password: &str) -> Result<UserId, PeerError> {
        self.check()?;
        let Some(auth) = self.installed() else {
            return Ok(-2);
        };
        let reply = auth
            .authenticate(AuthenticateRequest::new(name, password), &ctx())
            .await?;
        Ok(reply.id)
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        *self.installed.lock().unwrap() = None;
    }
}

#[derive(Default)]
pub struct MockMeta {
    pub servers: Mutex<Vec<Arc<MockServer>>>,
    pub callbacks: Mutex<Vec<Arc<dyn MetaCallback>>>,
    pub add_callback_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub unreachable: AtomicBool,
    pub closed: AtomicUsize,
}

impl MockMeta {
    pub fn with_servers(servers: &[&Arc<MockServer>]) -> Arc<Self> {
        let meta = Self::default();
        *meta.servers.lock().unwrap() = servers.iter().map(|s| Arc::clone(s)).collect();
        Arc::new(meta)
    }

    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
        for server in self.servers.lock().unwrap().iter() {
            server.reachable.store(!down, Ordering::SeqCst);
        }
    }

    fn check(&self) -> Result<(), PeerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(PeerError::Unreachable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetaProxy for MockMeta {
    async fn get_booted_servers(&self) -> Result<Vec<Arc<dyn ServerProxy>>, PeerError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .servers
            .lock()
            .unwrap()
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn ServerProxy>)
            .collect())
    }

    async fn add_callback(&self, callback: Arc<dyn MetaCallback>) -> Result<(), PeerError> {
        self.add_callback_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.callbacks.lock().unwrap().push(callback);
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockConnector {
    pub meta: Arc<MockMeta>,
    pub fail: AtomicBool,
    pub context: Mutex<Option<Context>>,
}

impl MockConnector {
    pub fn new(meta: &Arc<MockMeta>) -> Self {
        Self {
            meta: Arc::clone(meta),
            fail: AtomicBool::new(false),
            context: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(&self, context: Context) -> Result<Arc<dyn MetaProxy>, PeerError> {
        *self.context.lock().unwrap() = Some(context);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PeerError::Unreachable("no route to host".into()));
        }
        Ok(Arc::clone(&self.meta) as Arc<dyn MetaProxy>)
    }
}
