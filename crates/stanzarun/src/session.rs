//! Interpreter sessions: a backend plus the lock that serializes calls into it.

use tokio::sync::Mutex;
use tokio::sync::MutexGuard;

use stanzarpc::Outcome;
use stanzarpc::SessionId;
use stanzapack::Value;

use crate::backend::Backend;
use crate::backend::Invocation;

pub struct InterpreterSession {
    id: SessionId,
    name: Option<String>,
    language: String,
    backend: Mutex<Box<dyn Backend>>,
}

impl InterpreterSession {
    pub fn new(id: SessionId, name: Option<String>, backend: Box<dyn Backend>) -> Self {
        let language = backend.language().to_string();
        Self { id, name, language, backend: Mutex::new(backend) }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Waits for exclusive use of the backend. Waiters are served in order.
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn Backend>> {
        self.backend.lock().await
    }

    /// Runs one code operation under the session lock.
    pub async fn invoke(&self, invocation: &Invocation) -> Outcome<Value> {
        let mut backend = self.lock().await;
        invocation.run(backend.as_mut()).await
    }

    /// Destroys the backend, waiting for any running call to finish first.
    pub async fn destroy(&self) -> Outcome<bool> {
        let mut backend = self.lock().await;
        crate::backend::destroy(backend.as_mut()).await
    }
}

impl std::fmt::Debug for InterpreterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("language", &self.language)
            .finish()
    }
}
