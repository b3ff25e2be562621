//! # Session Client
//!
//! The calling side. A `Client` binds the session operations to an engine
//! once; handles created from it are cheap to clone and turn each call into
//! a single asynchronous request that resolves through a [`Future`].
//!
//! Handles never block: every request is submitted to the engine and the
//! returned future is waited on separately. Submitting requires a running
//! tokio runtime.

use std::sync::Arc;

use stanzapack::Value;
use stanzarpc::Payload;
use stanzarpc::SessionId;
use stanzarpc::SessionTarget;
use stanzarpc::ops;
use stanzarpc::ops::SessionInfo;

use crate::engine::Engine;
use crate::engine::IDENTITY;
use crate::engine::Procedure;
use crate::error::Error;
use crate::error::Result;
use crate::future::Future;

struct Procedures {
    get_session_info: Procedure,
    create_session: Procedure,
    delete_session: Procedure,
    execute: Procedure,
    load: Procedure,
    call: Procedure,
}

/// Factory for provider and session handles.
#[derive(Clone)]
pub struct Client {
    engine: Engine,
    procedures: Arc<Procedures>,
}

impl Client {
    /// Declares the session operations on `engine`. Declaring on an engine
    /// that already has them reuses the existing declarations.
    pub fn new(engine: &Engine) -> Self {
        let procedures = Procedures {
            get_session_info: engine.declare(ops::GET_SESSION_INFO),
            create_session: engine.declare(ops::CREATE_SESSION),
            delete_session: engine.declare(ops::DELETE_SESSION),
            execute: engine.declare(ops::EXECUTE),
            load: engine.declare(ops::LOAD),
            call: engine.declare(ops::CALL),
        };
        Self { engine: engine.clone(), procedures: Arc::new(procedures) }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// A handle on the provider at (`address`, `provider_id`).
    ///
    /// With `verify`, one round trip confirms that a session provider answers
    /// there; otherwise a wrong address only shows up when a request fails.
    pub async fn provider_handle(&self, address: &str, provider_id: u16, verify: bool) -> Result<ProviderHandle> {
        if verify {
            let identity = self.engine.identity(address, provider_id).await?;
            if identity != IDENTITY {
                tracing::debug!(address, provider_id, identity, "identity mismatch");
                return Err(Error::NotAProvider { address: address.to_string(), provider_id });
            }
        }

        Ok(ProviderHandle {
            inner: Arc::new(HandleInner {
                engine: self.engine.clone(),
                procedures: self.procedures.clone(),
                address: address.to_string(),
                provider_id,
            }),
        })
    }

    /// A handle on one session. A name is resolved to an id up front.
    pub async fn session_handle(
        &self,
        address: &str,
        provider_id: u16,
        session: SessionRef,
        verify: bool,
    ) -> Result<SessionHandle> {
        let provider = self.provider_handle(address, provider_id, verify).await?;
        let (target, language, name) = match session {
            SessionRef::Name(name) => {
                let info = provider.get_session_info(&name).wait().await?;
                (SessionTarget::Id(info.id), Some(info.language), Some(name))
            }
            SessionRef::Id(id) => (SessionTarget::Id(id), None, None),
            SessionRef::Anonymous(language) => (SessionTarget::Anonymous, Some(language), None),
        };
        Ok(SessionHandle { provider, target, language, name })
    }
}

/// How a session handle picks its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRef {
    Name(String),
    Id(SessionId),
    /// A throwaway session of the given language, one per request.
    Anonymous(String),
}

impl From<SessionId> for SessionRef {
    fn from(id: SessionId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for SessionRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

struct HandleInner {
    engine: Engine,
    procedures: Arc<Procedures>,
    address: String,
    provider_id: u16,
}

/// A provider at one address. Clones share one binding.
#[derive(Clone)]
pub struct ProviderHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("address", &self.inner.address)
            .field("provider_id", &self.inner.provider_id)
            .finish()
    }
}

impl ProviderHandle {
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn provider_id(&self) -> u16 {
        self.inner.provider_id
    }

    pub fn get_session_info(&self, name: &str) -> Future<SessionInfo> {
        self.submit(&self.inner.procedures.get_session_info, &ops::GetSessionInfo { name: name.to_string() })
    }

    pub fn create_session(&self, name: &str, language: &str) -> Future<SessionId> {
        let request = ops::CreateSession { name: name.to_string(), language: language.to_string() };
        self.submit(&self.inner.procedures.create_session, &request)
    }

    pub fn delete_session(&self, id: SessionId) -> Future<bool> {
        self.submit(&self.inner.procedures.delete_session, &ops::DeleteSession { id })
    }

    /// Runs `code` in a session that exists only for this request.
    pub fn execute_anonymous(&self, language: &str, code: &str, args: Vec<Value>) -> Future<Value> {
        let request = ops::Execute {
            target: SessionTarget::Anonymous,
            language: Some(language.to_string()),
            code: code.to_string(),
            args,
        };
        self.submit(&self.inner.procedures.execute, &request)
    }

    fn submit<Req: Payload, Resp: Payload + Clone>(&self, procedure: &Procedure, request: &Req) -> Future<Resp> {
        let body = match request.to_bytes() {
            Ok(body) => body,
            Err(e) => return Future::ready(Err(e.into())),
        };
        tracing::trace!(address = %self.inner.address, provider = self.inner.provider_id, op = procedure.name(), "submit");
        let rx = self.inner.engine.submit(&self.inner.address, self.inner.provider_id, procedure, body);
        Future::pending(rx)
    }
}

/// One session on one provider.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    provider: ProviderHandle,
    target: SessionTarget,
    language: Option<String>,
    name: Option<String>,
}

impl SessionHandle {
    pub fn provider(&self) -> &ProviderHandle {
        &self.provider
    }

    pub fn target(&self) -> SessionTarget {
        self.target
    }

    /// Known when the handle was resolved by name or is anonymous.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn execute(&self, code: &str, args: Vec<Value>) -> Future<Value> {
        let request = ops::Execute {
            target: self.target,
            language: self.anonymous_language(),
            code: code.to_string(),
            args,
        };
        self.provider.submit(&self.provider.inner.procedures.execute, &request)
    }

    /// Runs a script file that lives on the provider's host.
    pub fn load(&self, path: &str, args: Vec<Value>) -> Future<Value> {
        let request = ops::Load {
            target: self.target,
            language: self.anonymous_language(),
            path: path.to_string(),
            args,
        };
        self.provider.submit(&self.provider.inner.procedures.load, &request)
    }

    /// Calls `function`, as a method of `object` unless `object` is empty.
    pub fn call(&self, function: &str, object: &str, args: Vec<Value>) -> Future<Value> {
        let request = ops::Call {
            target: self.target,
            language: self.anonymous_language(),
            function: function.to_string(),
            object: object.to_string(),
            args,
        };
        self.provider.submit(&self.provider.inner.procedures.call, &request)
    }

    fn anonymous_language(&self) -> Option<String> {
        match self.target {
            SessionTarget::Anonymous => self.language.clone(),
            SessionTarget::Id(_) => None,
        }
    }
}
