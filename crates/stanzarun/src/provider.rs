//! # Session Provider
//!
//! The server side: one provider is bound to one (engine, provider id) pair,
//! owns a [`SessionRegistry`] of interpreter sessions and answers the six
//! session operations.
//!
//! ## Concurrency
//!
//! Each request runs as its own task on the engine's worker pool. The
//! registry sits behind a plain mutex that is only held for lookups and
//! inserts, never across an await. Calls into one session queue on that
//! session's lock; calls into different sessions run side by side.
//!
//! ## Failures
//!
//! A backend failure never escapes a handler: it becomes a failed `Outcome`
//! in an ordinary reply. Teardown failures are logged and skipped.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use stanzapack::Map;
use stanzapack::Value;
use stanzarpc::Fault;
use stanzarpc::Outcome;
use stanzarpc::Payload;
use stanzarpc::SessionId;
use stanzarpc::SessionTarget;
use stanzarpc::Status;
use stanzarpc::ops;
use stanzarpc::ops::SessionInfo;

use crate::backend::BackendRegistry;
use crate::backend::ForeignFn;
use crate::backend::Invocation;
use crate::config::ProviderConfig;
use crate::config::SessionConfig;
use crate::engine::Engine;
use crate::engine::Handler;
use crate::engine::IDENTITY;
use crate::error::Result;
use crate::memview::settle_write_backs;
use crate::registry::SessionRegistry;
use crate::session::InterpreterSession;

/// A registered session provider. Dropping it withdraws its operations.
pub struct Provider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    engine: Engine,
    provider_id: u16,
    backends: Arc<BackendRegistry>,
    sessions: Mutex<SessionRegistry<Arc<InterpreterSession>>>,
    /// Set once the provider id has been handed back to the engine.
    withdrawn: AtomicBool,
}

impl Provider {
    /// Registers a provider and creates the sessions `config` declares, in order.
    ///
    /// A session that fails to come up is logged and skipped; only a taken
    /// provider id fails registration.
    pub async fn new(
        engine: &Engine,
        provider_id: u16,
        config: &ProviderConfig,
        backends: Arc<BackendRegistry>,
    ) -> Result<Self> {
        engine.register_provider(provider_id, IDENTITY)?;

        let inner = Arc::new(ProviderInner {
            engine: engine.clone(),
            provider_id,
            backends,
            sessions: Mutex::new(SessionRegistry::new()),
            withdrawn: AtomicBool::new(false),
        });
        ProviderInner::register_handlers(&inner);

        for (name, session) in &config.sessions {
            inner.create_from_config(name, session).await;
        }

        tracing::info!(
            provider = provider_id,
            address = %engine.address(),
            sessions = inner.registry().count(),
            "provider registered"
        );
        Ok(Self { inner })
    }

    /// Registers a provider from a JSON configuration document.
    pub async fn from_json(
        engine: &Engine,
        provider_id: u16,
        config: &str,
        backends: Arc<BackendRegistry>,
    ) -> Result<Self> {
        let config = ProviderConfig::parse(config)?;
        Self::new(engine, provider_id, &config, backends).await
    }

    pub fn provider_id(&self) -> u16 {
        self.inner.provider_id
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Creates a named session.
    pub async fn add_session(&self, name: &str, language: &str, config: &Value) -> Result<SessionId> {
        Ok(self.inner.create_session(name, language, config).await.into_result()?)
    }

    /// Removes and destroys one session.
    pub async fn remove_session(&self, id: SessionId) -> Result<()> {
        self.inner.delete_session(id).await.into_result()?;
        Ok(())
    }

    /// Removes and destroys every session.
    pub async fn remove_all_sessions(&self) {
        self.inner.remove_all_sessions().await;
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry().count()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.registry().list_ids()
    }

    pub fn find_session(&self, name: &str) -> Option<SessionId> {
        self.inner.registry().find_by_name(name)
    }

    /// Installs a host function into one session's backend.
    pub async fn install(&self, id: SessionId, name: &str, function: ForeignFn, arity: usize) -> Result<bool> {
        let session = self.inner.session(id);
        let Some(session) = session else {
            return Err(no_session(id).into());
        };
        let outcome = session.lock().await.install(name, function, arity);
        Ok(outcome.into_result()?)
    }

    /// The configuration that would recreate the named sessions.
    ///
    /// `{"sessions": {name: {"language": .., "config": ..}}}`, where `config`
    /// is the backend's own report, parsed as JSON when it is JSON.
    pub async fn config(&self) -> Value {
        let named: Vec<(String, Arc<InterpreterSession>)> = self
            .inner
            .registry()
            .iter()
            .filter_map(|(_, name, session)| name.map(|name| (name.to_string(), session.clone())))
            .collect();

        let mut sessions = Map::new();
        for (name, session) in named {
            let text = session.lock().await.get_config();
            let config = match Value::from_json_str(&text) {
                Ok(config) => config,
                Err(_) => Value::String(text),
            };
            let mut entry = Map::new();
            entry.insert("language", session.language());
            entry.insert("config", config);
            sessions.insert(name, entry);
        }

        let mut root = Map::new();
        root.insert("sessions", sessions);
        Value::Object(root)
    }

    pub async fn config_json(&self) -> String {
        self.config().await.to_json_string()
    }

    /// Withdraws the provider's operations and destroys every session.
    pub async fn shutdown(self) {
        self.inner.withdraw();
        self.inner.remove_all_sessions().await;
        tracing::info!(provider = self.inner.provider_id, "provider shut down");
    }
}

impl ProviderInner {
    fn registry(&self) -> MutexGuard<'_, SessionRegistry<Arc<InterpreterSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn withdraw(&self) {
        if !self.withdrawn.swap(true, Ordering::AcqRel) {
            self.engine.deregister_provider(self.provider_id);
        }
    }

    fn session(&self, id: SessionId) -> Option<Arc<InterpreterSession>> {
        self.registry().get(id).cloned()
    }

    fn register_handlers(inner: &Arc<Self>) {
        let weak = Arc::downgrade(inner);
        let engine = &inner.engine;
        let id = inner.provider_id;

        engine.register_handler(
            id,
            ops::GET_SESSION_INFO,
            route(&weak, |p, req: ops::GetSessionInfo| async move { p.get_session_info(&req.name) }),
        );
        engine.register_handler(
            id,
            ops::CREATE_SESSION,
            route(&weak, |p, req: ops::CreateSession| async move {
                p.create_session(&req.name, &req.language, &Value::Null).await
            }),
        );
        engine.register_handler(
            id,
            ops::DELETE_SESSION,
            route(&weak, |p, req: ops::DeleteSession| async move { p.delete_session(req.id).await }),
        );
        engine.register_handler(
            id,
            ops::EXECUTE,
            route(&weak, |p, req: ops::Execute| async move {
                let invocation = Invocation::Execute { code: req.code, args: req.args };
                p.run(req.target, req.language.as_deref(), invocation).await
            }),
        );
        engine.register_handler(
            id,
            ops::LOAD,
            route(&weak, |p, req: ops::Load| async move {
                let invocation = Invocation::Load { path: req.path, args: req.args };
                p.run(req.target, req.language.as_deref(), invocation).await
            }),
        );
        engine.register_handler(
            id,
            ops::CALL,
            route(&weak, |p, req: ops::Call| async move {
                let invocation = Invocation::Call { function: req.function, object: req.object, args: req.args };
                p.run(req.target, req.language.as_deref(), invocation).await
            }),
        );
    }

    fn get_session_info(&self, name: &str) -> Outcome<SessionInfo> {
        let registry = self.registry();
        match registry.find_by_name(name).and_then(|id| registry.get(id)) {
            Some(session) => Outcome::Success(SessionInfo { id: session.id(), language: session.language().to_string() }),
            None => Outcome::failure(Status::NoSession, format!("Could not find session named {}", name)),
        }
    }

    async fn create_session(&self, name: &str, language: &str, config: &Value) -> Outcome<SessionId> {
        if self.registry().find_by_name(name).is_some() {
            return session_exists(name);
        }

        let backend = match self.backends.create(language, &self.engine, config) {
            Ok(backend) => backend,
            Err(failure) => {
                tracing::error!(provider = self.provider_id, session = name, error = %failure, "could not create session");
                return Outcome::Failure(failure);
            }
        };

        // The name may have been taken while the backend was being built.
        let inserted = {
            let mut registry = self.registry();
            if registry.find_by_name(name).is_some() {
                Err(backend)
            } else {
                Ok(registry.insert_with(Some(name.to_string()), |id| {
                    Arc::new(InterpreterSession::new(id, Some(name.to_string()), backend))
                }))
            }
        };

        match inserted {
            Ok(id) => {
                tracing::debug!(provider = self.provider_id, session = name, %id, language, "created session");
                Outcome::Success(id)
            }
            Err(mut backend) => {
                if let Outcome::Failure(f) = crate::backend::destroy(backend.as_mut()).await {
                    tracing::warn!(provider = self.provider_id, session = name, error = %f, "could not destroy surplus backend");
                }
                session_exists(name)
            }
        }
    }

    async fn create_from_config(&self, name: &str, session: &SessionConfig) {
        let id = match self.create_session(name, &session.language, &session.backend_config()).await {
            Outcome::Success(id) => id,
            Outcome::Failure(f) => {
                tracing::error!(provider = self.provider_id, session = name, error = %f, "could not create configured session");
                return;
            }
        };

        let args = session.preamble_args();
        if let Some(path) = &session.preamble_file {
            let invocation = Invocation::Load { path: path.clone(), args: args.clone() };
            if let Outcome::Failure(f) = self.run(SessionTarget::Id(id), None, invocation).await {
                tracing::warn!(provider = self.provider_id, session = name, path = %path, error = %f, "preamble file failed");
            }
        }
        if let Some(code) = &session.preamble {
            let invocation = Invocation::Execute { code: code.clone(), args };
            if let Outcome::Failure(f) = self.run(SessionTarget::Id(id), None, invocation).await {
                tracing::warn!(provider = self.provider_id, session = name, error = %f, "preamble failed");
            }
        }
    }

    async fn delete_session(&self, id: SessionId) -> Outcome<bool> {
        let session = self.registry().take(id);
        let Some(session) = session else {
            return Outcome::Failure(no_session(id));
        };

        if let Outcome::Failure(f) = session.destroy().await {
            tracing::warn!(provider = self.provider_id, %id, error = %f, "session did not destroy cleanly");
        }
        tracing::debug!(provider = self.provider_id, %id, "deleted session");
        Outcome::Success(true)
    }

    async fn remove_all_sessions(&self) {
        let sessions = self.registry().drain();
        for (id, session) in sessions {
            if let Outcome::Failure(f) = session.destroy().await {
                tracing::warn!(provider = self.provider_id, %id, error = %f, "session did not destroy cleanly");
            }
        }
    }

    /// Runs one code operation. Views the backend dropped without releasing
    /// are written back before this returns.
    async fn run(&self, target: SessionTarget, language: Option<&str>, invocation: Invocation) -> Outcome<Value> {
        tracing::trace!(provider = self.provider_id, %target, op = invocation.kind(), "running");

        let SessionTarget::Id(id) = target else {
            return settle_write_backs(self.run_anonymous(language, invocation)).await;
        };
        let session = self.session(id);
        let Some(session) = session else {
            return Outcome::Failure(no_session(id));
        };
        settle_write_backs(session.invoke(&invocation)).await
    }

    /// Runs one operation in a throwaway backend that never enters the registry.
    async fn run_anonymous(&self, language: Option<&str>, invocation: Invocation) -> Outcome<Value> {
        let Some(language) = language else {
            return Outcome::failure(Status::InvalidArgument, "An anonymous session needs a language");
        };
        let mut backend = match self.backends.create(language, &self.engine, &Value::Null) {
            Ok(backend) => backend,
            Err(failure) => return Outcome::Failure(failure),
        };

        let outcome = invocation.run(backend.as_mut()).await;
        if let Outcome::Failure(f) = crate::backend::destroy(backend.as_mut()).await {
            tracing::warn!(provider = self.provider_id, language, error = %f, "anonymous session did not destroy cleanly");
        }
        outcome
    }
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        self.withdraw();

        let sessions = self.registry().drain();
        if sessions.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(provider = self.provider_id, count = sessions.len(), "sessions dropped without being destroyed");
            return;
        };
        let provider_id = self.provider_id;
        runtime.spawn(async move {
            for (id, session) in sessions {
                if let Outcome::Failure(f) = session.destroy().await {
                    tracing::warn!(provider = provider_id, %id, error = %f, "session did not destroy cleanly");
                }
            }
        });
    }
}

/// Wraps a typed operation as an engine handler.
///
/// The handler holds the provider weakly; once the provider is gone it
/// answers with an unknown-provider failure.
fn route<Req, Resp, F, Fut>(provider: &Weak<ProviderInner>, op: F) -> Arc<dyn Handler>
where
    Req: Payload + Send + 'static,
    Resp: Payload + Send + 'static,
    F: Fn(Arc<ProviderInner>, Req) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Outcome<Resp>> + Send + 'static,
{
    let provider = provider.clone();
    let op = Arc::new(op);
    Arc::new(move |body: Vec<u8>| {
        let provider = provider.upgrade();
        let op = op.clone();
        async move {
            let outcome = match (provider, Req::from_bytes(&body)) {
                (None, _) => Outcome::failure(Status::UnknownProvider, "Provider has shut down"),
                (Some(_), Err(e)) => Outcome::failure(Status::InvalidArgument, format!("Malformed request: {}", e)),
                (Some(provider), Ok(request)) => op(provider, request).await,
            };
            outcome.to_bytes().map_err(|e| Fault::HandlerFailed(e.to_string()))
        }
    })
}

fn no_session(id: SessionId) -> stanzarpc::Failure {
    stanzarpc::Failure::new(Status::NoSession, format!("Could not find session with id {}", id.0))
}

fn session_exists<T>(name: &str) -> Outcome<T> {
    Outcome::failure(Status::SessionExists, format!("Session {} already exists", name))
}
