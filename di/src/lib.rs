//! # Fibre DI
//!
//! A dependency-injection container with lazily resolved construction graphs,
//! singleton memoization and ordered start/stop lifecycle hooks.
//!
//! ## Core Concepts
//!
//! - **Container**: an explicitly created and explicitly owned registry of
//!   providers. There is no global container.
//! - **Providers**: plain functions. Their parameter types (`Arc<T>`) are their
//!   dependencies and their return type is what they provide. Providers can
//!   also be spelled out with explicit [`TypeKey`]s, including tagged ones.
//! - **Resolution**: the dependency graph is resolved depth-first on demand.
//!   Cycles are reported before anything is constructed, and every provider runs
//!   at most once per container, even under concurrent resolution.
//! - **Lifecycle**: providers may append [`Hook`]s. `start` runs them in
//!   registration order; `stop` unwinds them in reverse and tries every one.
//! - **Events**: every step is pushed to an optional [`EventSink`].
//!
//! ## Quick Start
//!
//! ```
//! use fibre_di::{BoxError, Container, Hook, Hooks};
//! use std::sync::Arc;
//!
//! struct Config {
//!     addr: String,
//! }
//!
//! struct Server {
//!     addr: String,
//! }
//!
//! fn new_server(config: Arc<Config>, hooks: Hooks) -> Result<Server, BoxError> {
//!     let addr = config.addr.clone();
//!     hooks.append(
//!         Hook::new()
//!             .on_start(move |_ctx| {
//!                 println!("listening on {}", addr);
//!                 Ok::<(), BoxError>(())
//!             })
//!             .on_stop(|_ctx| Ok::<(), BoxError>(())),
//!     )?;
//!     Ok(Server { addr: config.addr.clone() })
//! }
//!
//! fn main() -> Result<(), fibre_di::Error> {
//!     let mut container = Container::new();
//!     container.supply(Config { addr: "127.0.0.1:8080".into() })?;
//!     container.provide(new_server)?;
//!
//!     let addr = container.invoke(|server: Arc<Server>| Ok::<_, BoxError>(server.addr.clone()))?;
//!     assert_eq!(addr, "127.0.0.1:8080");
//!
//!     container.start()?;
//!     container.stop()?;
//!     Ok(())
//! }
//! ```

mod builder;
mod cache;
mod container;
mod context;
mod error;
mod event;
mod inject;
mod key;
mod lifecycle;
mod macros;
mod provider;
mod registry;
mod resolver;

pub use builder::{ContainerBuilder, ContainerConfig};
pub use container::Container;
pub use context::{Context, Interrupt};
pub use error::{BoxError, BuildError, Error, HookFailure, Result, SharedError};
pub use event::{Event, EventKind, EventLog, EventSink, Outcome, Subject, TracingSink};
pub use inject::{Constructor, Inject, Invocable};
pub use key::TypeKey;
pub use lifecycle::{Hook, HookState, Hooks, Phase};
pub use provider::{instance, Arguments, Instance, Products, Provider};
