//! # Interpreter Backends
//!
//! A session wraps one [`Backend`]: an interpreter for some scripting
//! language, reduced to a small capability set. Backends are constructed
//! by a factory registered under the language name.
//!
//! A backend is only ever driven by one task at a time (its session holds
//! it behind a lock), but successive calls may come from different tasks.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;

use stanzapack::Value;
use stanzarpc::Failure;
use stanzarpc::Outcome;
use stanzarpc::Status;

use crate::engine::Engine;

/// A host function made callable from interpreted code.
pub type ForeignFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Builds a backend from its per-session configuration.
///
/// The engine is passed so that backends can resolve memory views found in
/// their arguments.
pub type BackendFactory = Arc<dyn Fn(&Engine, &Value) -> anyhow::Result<Box<dyn Backend>> + Send + Sync>;

/// The operations every interpreter backend provides.
///
/// Failures are reported inside the returned `Outcome`, with the message
/// prefixed by the stage that failed (for example `Error executing code: ...`).
#[async_trait::async_trait]
pub trait Backend: Send {
    /// The language name this backend was registered under.
    fn language(&self) -> &str;

    /// The backend's configuration, as JSON text where possible.
    fn get_config(&self) -> String;

    /// Runs source code.
    async fn execute(&mut self, code: &str, args: &[Value]) -> Outcome<Value>;

    /// Runs a source file from the local filesystem.
    async fn load(&mut self, path: &str, args: &[Value]) -> Outcome<Value>;

    /// Calls `function`, as a method of `target` when `target` is not empty.
    async fn call(&mut self, function: &str, target: &str, args: &[Value]) -> Outcome<Value>;

    /// Makes a host function callable from interpreted code under `name`.
    fn install(&mut self, name: &str, function: ForeignFn, arity: usize) -> Outcome<bool>;

    /// Tears the interpreter down. Later calls fail.
    async fn destroy(&mut self) -> Outcome<bool>;
}

/// Backend factories keyed by language name.
#[derive(Default)]
pub struct BackendRegistry {
    factories: DashMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `language`.
    pub fn register<F>(&self, language: &str, factory: F)
    where
        F: Fn(&Engine, &Value) -> anyhow::Result<Box<dyn Backend>> + Send + Sync + 'static,
    {
        self.factories.insert(language.to_string(), Arc::new(factory));
    }

    pub fn supports(&self, language: &str) -> bool {
        self.factories.contains_key(language)
    }

    /// Registered language names, sorted.
    pub fn languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Constructs a backend for `language`.
    pub fn create(&self, language: &str, engine: &Engine, config: &Value) -> Result<Box<dyn Backend>, Failure> {
        let factory = self
            .factories
            .get(language)
            .map(|f| f.value().clone())
            .ok_or_else(|| Failure::new(Status::Language, format!("Unsupported language {}", language)))?;

        factory(engine, config).map_err(|e| {
            Failure::new(Status::SessionInit, format!("Could not initialize {} session: {:#}", language, e))
        })
    }
}

/// A code operation addressed to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Execute { code: String, args: Vec<Value> },
    Load { path: String, args: Vec<Value> },
    Call { function: String, object: String, args: Vec<Value> },
}

impl Invocation {
    /// Runs this operation on `backend`. A panicking backend yields a failed
    /// `Outcome` like any other code error.
    pub async fn run(&self, backend: &mut dyn Backend) -> Outcome<Value> {
        let run = async {
            match self {
                Invocation::Execute { code, args } => backend.execute(code, args).await,
                Invocation::Load { path, args } => backend.load(path, args).await,
                Invocation::Call { function, object, args } => backend.call(function, object, args).await,
            }
        };
        contain(self.kind(), run).await
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Invocation::Execute { .. } => "execute",
            Invocation::Load { .. } => "load",
            Invocation::Call { .. } => "call",
        }
    }
}

/// Destroys `backend`, turning a panic into a failed `Outcome`.
pub async fn destroy(backend: &mut dyn Backend) -> Outcome<bool> {
    contain("destroy", backend.destroy()).await
}

async fn contain<T>(stage: &str, op: impl std::future::Future<Output = Outcome<T>>) -> Outcome<T> {
    match AssertUnwindSafe(op).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(stage, panic = %message, "backend panicked");
            Outcome::failure(Status::Code, format!("Backend panicked during {}: {}", stage, message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    match (panic.downcast_ref::<&str>(), panic.downcast_ref::<String>()) {
        (Some(message), _) => message.to_string(),
        (_, Some(message)) => message.clone(),
        _ => "unknown panic".to_string(),
    }
}
