//! The main `Container` struct and its associated methods.

use crate::builder::{ContainerBuilder, ContainerConfig};
use crate::cache::ConstructionCache;
use crate::context::Context;
use crate::error::{BoxError, Error, Result};
use crate::event::{Emitter, EventKind, EventSink, Outcome, Subject};
use crate::inject::{Constructor, Invocable};
use crate::key::TypeKey;
use crate::lifecycle::{HookState, Hooks, Lifecycle, Phase};
use crate::provider::{instance, Arguments, Instance, Products, Provider};
use crate::registry::{ProviderId, Registry};
use crate::resolver::{self, Resolver};

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// The dependency-injection container.
///
/// A container moves through two phases. While it is exclusively owned,
/// providers are registered through `&mut self` methods. The first resolution
/// (`invoke`, `resolve*`, `resolve_plan` or `validate`) seals the registry;
/// from then on the container is read through `&self`, may be shared across
/// threads, and rejects further registration with
/// [`Error::RegistrationClosed`].
///
/// Every value is constructed at most once per container. Hooks appended while
/// constructing are driven by [`start`](Self::start) and [`stop`](Self::stop).
pub struct Container {
  registry: Registry,
  cache: ConstructionCache,
  lifecycle: Arc<Lifecycle>,
  emitter: Arc<Emitter>,
  config: ContainerConfig,
  sealed: AtomicBool,
}

impl Default for Container {
  fn default() -> Self {
    Self::from_parts(ContainerConfig::default(), None)
  }
}

impl fmt::Debug for Container {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Container")
      .field("providers", &self.registry.len())
      .field("instances", &self.cache.len())
      .field("phase", &self.lifecycle.phase())
      .field("sealed", &self.sealed.load(Ordering::Acquire))
      .field("has_sink", &self.emitter.is_enabled())
      .finish_non_exhaustive()
  }
}

impl Container {
  /// Creates a new, empty `Container` with default settings and no event sink.
  pub fn new() -> Self {
    Self::default()
  }

  pub fn builder() -> ContainerBuilder {
    ContainerBuilder::new()
  }

  pub(crate) fn from_parts(config: ContainerConfig, sink: Option<Arc<dyn EventSink>>) -> Self {
    let emitter = Arc::new(Emitter::new(sink));
    Self {
      registry: Registry::new(),
      cache: ConstructionCache::new(),
      lifecycle: Arc::new(Lifecycle::new(Arc::clone(&emitter))),
      emitter,
      config,
      sealed: AtomicBool::new(false),
    }
  }

  pub fn config(&self) -> &ContainerConfig {
    &self.config
  }

  // --- Registration ---

  /// Registers an explicitly keyed provider.
  pub fn register(&mut self, provider: Provider) -> Result<()> {
    if self.sealed.load(Ordering::Acquire) {
      if let Some(key) = provider.outputs().first() {
        return Err(Error::RegistrationClosed { key: key.clone() });
      }
    }

    let label = provider.label().to_owned();
    let outputs = provider.outputs().to_vec();
    self.registry.register(provider)?;

    tracing::debug!(provider = %label, outputs = outputs.len(), "provider registered");
    for key in outputs {
      self
        .emitter
        .emit(EventKind::Provided, || Subject::Type(key), None, Outcome::Success);
    }
    Ok(())
  }

  /// Registers a constructor producing a single `T`.
  ///
  /// The constructor's parameters are its dependencies: each `Arc<U>` asks for
  /// the singleton keyed by `U`, and a [`Hooks`] parameter receives a handle
  /// for appending lifecycle hooks.
  ///
  /// # Examples
  ///
  /// ```
  /// use fibre_di::{BoxError, Container};
  /// use std::sync::Arc;
  ///
  /// struct Config { url: String }
  /// struct Database { url: String }
  ///
  /// fn new_database(config: Arc<Config>) -> Result<Database, BoxError> {
  ///   Ok(Database { url: config.url.clone() })
  /// }
  ///
  /// let mut container = Container::new();
  /// container.supply(Config { url: "postgres://localhost".into() }).unwrap();
  /// container.provide(new_database).unwrap();
  ///
  /// let db = container.resolve::<Database>().unwrap();
  /// assert_eq!(db.url, "postgres://localhost");
  /// ```
  pub fn provide<M, F, T, E>(&mut self, constructor: F) -> Result<()>
  where
    F: Constructor<M, Output = std::result::Result<T, E>>,
    T: Any + Send + Sync,
    E: Into<BoxError>,
  {
    self.provide_keyed(TypeKey::of::<T>(), constructor)
  }

  /// Registers a constructor producing a `T` under `tag`.
  pub fn provide_tagged<M, F, T, E>(&mut self, tag: &str, constructor: F) -> Result<()>
  where
    F: Constructor<M, Output = std::result::Result<T, E>>,
    T: Any + Send + Sync,
    E: Into<BoxError>,
  {
    self.provide_keyed(TypeKey::tagged::<T>(tag), constructor)
  }

  fn provide_keyed<M, F, T, E>(&mut self, key: TypeKey, constructor: F) -> Result<()>
  where
    F: Constructor<M, Output = std::result::Result<T, E>>,
    T: Any + Send + Sync,
    E: Into<BoxError>,
  {
    let provider = Provider::new(
      std::any::type_name::<F>(),
      F::dependencies(),
      vec![key],
      move |args: &mut Arguments<'_>| -> std::result::Result<Vec<Instance>, BoxError> {
        let value = constructor.construct(args)?.map_err(Into::<BoxError>::into)?;
        Ok(vec![instance(value)])
      },
    );
    self.register(provider)
  }

  /// Registers a constructor producing several values at once, returned as a tuple.
  ///
  /// The constructor runs once and every element is cached under its own key.
  pub fn provide_many<M, F, O, E>(&mut self, constructor: F) -> Result<()>
  where
    F: Constructor<M, Output = std::result::Result<O, E>>,
    O: Products,
    E: Into<BoxError>,
  {
    let provider = Provider::new(
      std::any::type_name::<F>(),
      F::dependencies(),
      O::keys(),
      move |args: &mut Arguments<'_>| -> std::result::Result<Vec<Instance>, BoxError> {
        let products = constructor.construct(args)?.map_err(Into::<BoxError>::into)?;
        Ok(products.into_instances())
      },
    );
    self.register(provider)
  }

  /// Registers an already-built value.
  pub fn supply<T: Any + Send + Sync>(&mut self, value: T) -> Result<()> {
    self.supply_keyed(TypeKey::of::<T>(), value)
  }

  pub fn supply_tagged<T: Any + Send + Sync>(&mut self, tag: &str, value: T) -> Result<()> {
    self.supply_keyed(TypeKey::tagged::<T>(tag), value)
  }

  fn supply_keyed<T: Any + Send + Sync>(&mut self, key: TypeKey, value: T) -> Result<()> {
    let value = instance(value);
    let label = format!("supply({})", key);
    let provider = Provider::new(label, Vec::new(), vec![key], move |_: &mut Arguments<'_>| {
      Ok::<_, BoxError>(vec![Arc::clone(&value)])
    });
    self.register(provider)
  }

  pub fn is_registered(&self, key: &TypeKey) -> bool {
    self.registry.contains(key)
  }

  // --- Resolution ---

  /// The providers that must run, in order, to produce `key`.
  ///
  /// Nothing is constructed. Fails with [`Error::CyclicDependency`] or
  /// [`Error::UnknownType`] when the graph below `key` is unusable.
  pub fn resolve_plan(&self, key: &TypeKey) -> Result<Vec<Arc<Provider>>> {
    self.seal();
    let plan = resolver::resolve(&self.registry, key)?;
    Ok(
      plan
        .into_iter()
        .map(|id| Arc::clone(self.registry.provider(id)))
        .collect(),
    )
  }

  /// Resolves the graph of every registered key without constructing anything.
  pub fn validate(&self) -> Result<()> {
    self.seal();
    let mut resolver = Resolver::new(&self.registry);
    for key in self.registry.keys() {
      resolver.visit_root(key, None)?;
    }
    Ok(())
  }

  /// Returns the instance for `key`, constructing it and its dependencies if needed.
  pub fn resolve_key(&self, key: &TypeKey) -> Result<Instance> {
    let roots = std::slice::from_ref(key);
    self.build(roots, || Subject::Type(key.clone()), None)?;
    self.cached(key, None)
  }

  pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
    downcast(&TypeKey::of::<T>(), self.resolve_key(&TypeKey::of::<T>())?)
  }

  pub fn resolve_tagged<T: Any + Send + Sync>(&self, tag: &str) -> Result<Arc<T>> {
    let key = TypeKey::tagged::<T>(tag);
    downcast(&key, self.resolve_key(&key)?)
  }

  /// Constructs the dependencies of `function`, then calls it.
  ///
  /// `function` may take a [`Hooks`] parameter to register lifecycle hooks.
  /// An error returned by `function` surfaces as [`Error::InvokeFailed`].
  ///
  /// # Examples
  ///
  /// ```
  /// use fibre_di::{BoxError, Container, Hook, Hooks};
  /// use std::sync::Arc;
  ///
  /// struct Port(u16);
  ///
  /// let mut container = Container::new();
  /// container.supply(Port(8080)).unwrap();
  ///
  /// let port = container
  ///   .invoke(|port: Arc<Port>, hooks: Hooks| -> Result<u16, BoxError> {
  ///     hooks.append(Hook::new().on_start(|_| Ok::<(), BoxError>(())))?;
  ///     Ok(port.0)
  ///   })
  ///   .unwrap();
  ///
  /// assert_eq!(port, 8080);
  /// container.start().unwrap();
  /// container.stop().unwrap();
  /// ```
  pub fn invoke<M, F, R, E>(&self, function: F) -> Result<R>
  where
    F: Invocable<M, Output = std::result::Result<R, E>>,
    E: Into<BoxError>,
  {
    let name = std::any::type_name::<F>();
    let dependencies = F::dependencies();
    self.build(&dependencies, || Subject::Function(name.to_owned()), Some(name))?;

    let values = dependencies
      .iter()
      .map(|key| self.cached(key, Some(name)))
      .collect::<Result<Vec<_>>>()?;
    let hooks = Hooks::new(Arc::clone(&self.lifecycle), name);
    let mut args = Arguments::new(&dependencies, &values, &hooks);

    self.emitter.emit(
      EventKind::Invoking,
      || Subject::Function(name.to_owned()),
      None,
      Outcome::Success,
    );
    let began = Instant::now();
    let result = function
      .call_once(&mut args)
      .and_then(|output| {
        output.map_err(|cause| Error::InvokeFailed {
          function: name.to_owned(),
          cause: cause.into(),
        })
      })
      .and_then(|value| {
        hooks.commit()?;
        Ok(value)
      });
    if result.is_err() {
      hooks.discard();
    }
    self.emitter.emit(
      EventKind::Invoked,
      || Subject::Function(name.to_owned()),
      Some(began.elapsed()),
      Outcome::from_result(&result),
    );
    result
  }

  fn seal(&self) {
    if !self.sealed.swap(true, Ordering::AcqRel) {
      tracing::debug!(providers = self.registry.len(), "registry sealed");
    }
  }

  /// Resolves `roots` into one plan and constructs whatever is missing.
  fn build(
    &self,
    roots: &[TypeKey],
    subject: impl Fn() -> Subject,
    required_by: Option<&str>,
  ) -> Result<()> {
    self.seal();
    let plan = self.plan(roots, &subject, required_by)?;
    self
      .cache
      .get_or_build(&plan, &self.registry, &self.lifecycle, &self.emitter)
  }

  fn plan(
    &self,
    roots: &[TypeKey],
    subject: &impl Fn() -> Subject,
    required_by: Option<&str>,
  ) -> Result<Vec<ProviderId>> {
    self
      .emitter
      .emit(EventKind::Resolving, subject, None, Outcome::Success);
    let began = Instant::now();

    let mut resolver = Resolver::new(&self.registry);
    let result = roots
      .iter()
      .try_for_each(|root| resolver.visit_root(root, required_by))
      .map(|()| resolver.finish());

    self.emitter.emit(
      EventKind::Resolved,
      subject,
      Some(began.elapsed()),
      Outcome::from_result(&result),
    );
    if let Err(err) = &result {
      tracing::debug!(error = %err, "resolution failed");
    }
    result
  }

  fn cached(&self, key: &TypeKey, required_by: Option<&str>) -> Result<Instance> {
    self.cache.get(key).ok_or_else(|| Error::UnknownType {
      key: key.clone(),
      required_by: required_by.map(str::to_owned),
    })
  }

  // --- Lifecycle ---

  /// Runs every start hook in registration order, bounded by the configured
  /// start timeout.
  pub fn start(&self) -> Result<()> {
    let ctx = match self.config.start_timeout {
      Some(timeout) => Context::with_timeout(timeout),
      None => Context::background(),
    };
    self.start_with(&ctx)
  }

  /// Runs every start hook in registration order under a caller-supplied context.
  ///
  /// The first failing hook, or `ctx` firing between two hooks, halts the
  /// sequence with [`Error::StartFailed`]. Hooks that already started are left
  /// running; call [`stop`](Self::stop) to unwind them.
  pub fn start_with(&self, ctx: &Context) -> Result<()> {
    self.lifecycle.start(ctx)
  }

  /// Runs the stop hook of every started hook in reverse order, with the
  /// configured stop timeout as advisory deadline.
  pub fn stop(&self) -> Result<()> {
    let ctx = match self.config.stop_timeout {
      Some(timeout) => Context::with_timeout(timeout),
      None => Context::background(),
    };
    self.stop_with(&ctx)
  }

  /// Runs the stop hook of every started hook in reverse order.
  ///
  /// Every started hook gets an attempt; failures are aggregated into
  /// [`Error::StopFailed`].
  pub fn stop_with(&self, ctx: &Context) -> Result<()> {
    self.lifecycle.stop(ctx)
  }

  pub fn phase(&self) -> Phase {
    self.lifecycle.phase()
  }

  /// The owner and state of every hook, in registration order.
  pub fn hook_states(&self) -> Vec<(String, HookState)> {
    self.lifecycle.states()
  }
}

fn downcast<T: Any + Send + Sync>(key: &TypeKey, value: Instance) -> Result<Arc<T>> {
  value.downcast::<T>().map_err(|_| Error::TypeMismatch {
    key: key.clone(),
    expected: std::any::type_name::<T>(),
  })
}
