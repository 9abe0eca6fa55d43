//! The construction cache: runs each provider at most once and memoizes its outputs.

use crate::error::{BoxError, Error, Result, SharedError};
use crate::event::{Emitter, EventKind, Outcome, Subject};
use crate::key::TypeKey;
use crate::lifecycle::{Hooks, Lifecycle};
use crate::provider::{Arguments, Instance, Provider};
use crate::registry::{ProviderId, Registry};

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

enum SlotState {
  Building,
  Done(Result<(), SharedError>),
}

struct SlotInner {
  state: SlotState,
  waiters: VecDeque<Thread>,
}

/// An in-flight construction. The thread that created it builds; every other
/// thread needing the same provider parks here until the outcome is known.
struct BuildSlot {
  inner: Mutex<SlotInner>,
}

impl BuildSlot {
  fn new() -> Self {
    Self {
      inner: Mutex::new(SlotInner {
        state: SlotState::Building,
        waiters: VecDeque::new(),
      }),
    }
  }

  fn complete(&self, result: Result<(), SharedError>) {
    let mut inner = self.inner.lock();
    inner.state = SlotState::Done(result);
    for waiter in inner.waiters.drain(..) {
      waiter.unpark();
    }
  }

  fn wait(&self) -> Result<(), SharedError> {
    let mut inner = self.inner.lock();
    loop {
      match &inner.state {
        SlotState::Done(result) => return result.clone(),
        SlotState::Building => {
          inner.waiters.push_back(thread::current());
          drop(inner); // Unlock before parking.
          thread::park();
          inner = self.inner.lock();
        }
      }
    }
  }
}

enum Role {
  Leader(Arc<BuildSlot>),
  Waiter(Arc<BuildSlot>),
}

/// Completes and unregisters a slot when the leader is done, including when
/// the provider panics, so waiters are never left parked.
struct SlotGuard<'c> {
  cache: &'c ConstructionCache,
  id: ProviderId,
  slot: Arc<BuildSlot>,
  completed: bool,
}

impl SlotGuard<'_> {
  fn complete(mut self, result: Result<(), SharedError>) {
    self.release(result);
    self.completed = true;
  }

  fn release(&self, result: Result<(), SharedError>) {
    self.cache.pending.lock().remove(&self.id);
    self.slot.complete(result);
  }
}

impl Drop for SlotGuard<'_> {
  fn drop(&mut self) {
    if !self.completed {
      let cause: BoxError = "provider panicked during construction".into();
      self.release(Err(Arc::from(cause)));
    }
  }
}

/// Memoized instances, one per key, for the lifetime of the owning container.
#[derive(Default)]
pub(crate) struct ConstructionCache {
  instances: DashMap<TypeKey, Instance>,
  pending: Mutex<HashMap<ProviderId, Arc<BuildSlot>>>,
}

impl ConstructionCache {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn get(&self, key: &TypeKey) -> Option<Instance> {
    self.instances.get(key).map(|entry| Arc::clone(entry.value()))
  }

  pub(crate) fn contains(&self, key: &TypeKey) -> bool {
    self.instances.contains_key(key)
  }

  pub(crate) fn len(&self) -> usize {
    self.instances.len()
  }

  fn is_built(&self, provider: &Provider) -> bool {
    provider.outputs().iter().all(|key| self.contains(key))
  }

  /// Runs, in order, every provider of `plan` whose outputs are not cached yet.
  ///
  /// `plan` must be topologically ordered, so each provider's inputs are cached
  /// by the time it runs. The first failure stops the batch; instances built
  /// earlier in the batch stay cached.
  pub(crate) fn get_or_build(
    &self,
    plan: &[ProviderId],
    registry: &Registry,
    lifecycle: &Arc<Lifecycle>,
    emitter: &Emitter,
  ) -> Result<()> {
    for &id in plan {
      let provider = registry.provider(id);
      if self.is_built(provider) {
        continue;
      }

      let role = {
        let mut pending = self.pending.lock();
        // Re-check under the lock: a leader inserts its outputs before it
        // removes its slot.
        if self.is_built(provider) {
          continue;
        }
        match pending.get(&id) {
          Some(slot) => Role::Waiter(Arc::clone(slot)),
          None => {
            let slot = Arc::new(BuildSlot::new());
            pending.insert(id, Arc::clone(&slot));
            Role::Leader(slot)
          }
        }
      };

      let outcome = match role {
        Role::Waiter(slot) => {
          tracing::trace!(provider = provider.label(), "waiting for in-flight construction");
          slot.wait()
        }
        Role::Leader(slot) => {
          let guard = SlotGuard {
            cache: self,
            id,
            slot,
            completed: false,
          };
          let outcome = self.construct(provider, lifecycle, emitter);
          guard.complete(outcome.clone());
          outcome
        }
      };

      outcome.map_err(|cause| Error::ConstructionFailed {
        key: provider.primary_key().clone(),
        cause,
      })?;
    }
    Ok(())
  }

  fn construct(
    &self,
    provider: &Provider,
    lifecycle: &Arc<Lifecycle>,
    emitter: &Emitter,
  ) -> Result<(), SharedError> {
    let values = provider
      .inputs()
      .iter()
      .map(|key| {
        self.get(key).ok_or_else(|| -> BoxError {
          format!("dependency {} has not been constructed", key).into()
        })
      })
      .collect::<Result<Vec<_>, BoxError>>()
      .map_err(|err| -> SharedError { Arc::from(err) })?;

    let hooks = Hooks::new(Arc::clone(lifecycle), provider.label());
    let mut args = Arguments::new(provider.inputs(), &values, &hooks);

    tracing::debug!(provider = provider.label(), "constructing");
    let began = Instant::now();
    let result = provider
      .call(&mut args)
      .and_then(|outputs| check_outputs(provider, outputs))
      .and_then(|outputs| {
        hooks.commit()?;
        Ok(outputs)
      });
    if result.is_err() {
      hooks.discard();
    }
    let elapsed = began.elapsed();

    emitter.emit(
      EventKind::Constructed,
      || Subject::Type(provider.primary_key().clone()),
      Some(elapsed),
      Outcome::from_result(&result),
    );

    match result {
      Ok(outputs) => {
        for (key, value) in provider.outputs().iter().zip(outputs) {
          self.instances.insert(key.clone(), value);
        }
        Ok(())
      }
      Err(cause) => {
        tracing::debug!(provider = provider.label(), error = %cause, "construction failed");
        Err(Arc::from(cause))
      }
    }
  }
}

fn check_outputs(provider: &Provider, outputs: Vec<Instance>) -> Result<Vec<Instance>, BoxError> {
  if outputs.len() != provider.outputs().len() {
    return Err(
      format!(
        "provider `{}` returned {} value(s) but declares {}",
        provider.label(),
        outputs.len(),
        provider.outputs().len()
      )
      .into(),
    );
  }
  for (key, value) in provider.outputs().iter().zip(&outputs) {
    if (**value).type_id() != key.type_id() {
      return Err(
        Error::TypeMismatch {
          key: key.clone(),
          expected: key.type_name(),
        }
        .into(),
      );
    }
  }
  Ok(outputs)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::provider::instance;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct A;
  struct B;

  fn setup() -> (Registry, Arc<Lifecycle>, Emitter) {
    let lifecycle = Lifecycle::new(Arc::new(Emitter::new(None)));
    (Registry::new(), Arc::new(lifecycle), Emitter::new(None))
  }

  #[test]
  fn wrong_output_type_fails_construction() {
    let (mut registry, lifecycle, emitter) = setup();
    let id = registry
      .register(Provider::new("liar", vec![], vec![TypeKey::of::<A>()], |_| {
        Ok::<_, BoxError>(vec![instance(B)])
      }))
      .unwrap();

    let cache = ConstructionCache::new();
    let err = cache
      .get_or_build(&[id], &registry, &lifecycle, &emitter)
      .unwrap_err();
    assert!(matches!(err, Error::ConstructionFailed { key, .. } if key == TypeKey::of::<A>()));
    assert!(!cache.contains(&TypeKey::of::<A>()));
  }

  #[test]
  fn wrong_output_count_fails_construction() {
    let (mut registry, lifecycle, emitter) = setup();
    let id = registry
      .register(Provider::new(
        "short",
        vec![],
        vec![TypeKey::of::<A>(), TypeKey::of::<B>()],
        |_| Ok::<_, BoxError>(vec![instance(A)]),
      ))
      .unwrap();

    let cache = ConstructionCache::new();
    let err = cache
      .get_or_build(&[id], &registry, &lifecycle, &emitter)
      .unwrap_err();
    assert!(err.to_string().contains("returned 1 value(s) but declares 2"));
  }

  #[test]
  fn failed_provider_can_be_retried_by_a_later_call() {
    let (mut registry, lifecycle, emitter) = setup();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let id = registry
      .register(Provider::new("flaky", vec![], vec![TypeKey::of::<A>()], move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
          Err::<Vec<Instance>, BoxError>("not yet".into())
        } else {
          Ok(vec![instance(A)])
        }
      }))
      .unwrap();

    let cache = ConstructionCache::new();
    assert!(cache
      .get_or_build(&[id], &registry, &lifecycle, &emitter)
      .is_err());
    cache
      .get_or_build(&[id], &registry, &lifecycle, &emitter)
      .unwrap();
    cache
      .get_or_build(&[id], &registry, &lifecycle, &emitter)
      .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn concurrent_builds_share_one_execution() {
    let (mut registry, lifecycle, emitter) = setup();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let id = registry
      .register(Provider::new("slow", vec![], vec![TypeKey::of::<A>()], move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(std::time::Duration::from_millis(50));
        Ok::<_, BoxError>(vec![instance(A)])
      }))
      .unwrap();

    let cache = ConstructionCache::new();
    thread::scope(|s| {
      for _ in 0..16 {
        s.spawn(|| {
          cache
            .get_or_build(&[id], &registry, &lifecycle, &emitter)
            .unwrap();
        });
      }
    });

    assert_eq!(runs.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn waiters_observe_the_leaders_failure() {
    let (mut registry, lifecycle, emitter) = setup();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let id = registry
      .register(Provider::new("doomed", vec![], vec![TypeKey::of::<A>()], move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(std::time::Duration::from_millis(100));
        Err::<Vec<Instance>, BoxError>("no database".into())
      }))
      .unwrap();

    let cache = ConstructionCache::new();
    let failures = AtomicUsize::new(0);
    thread::scope(|s| {
      for _ in 0..8 {
        s.spawn(|| {
          if let Err(Error::ConstructionFailed { cause, .. }) =
            cache.get_or_build(&[id], &registry, &lifecycle, &emitter)
          {
            assert_eq!(cause.to_string(), "no database");
            failures.fetch_add(1, Ordering::SeqCst);
          }
        });
      }
    });

    assert_eq!(failures.load(Ordering::SeqCst), 8);
    // Threads arriving after the leader finished may retry, but never while
    // a construction is in flight.
    assert!(runs.load(Ordering::SeqCst) >= 1);
  }
}
