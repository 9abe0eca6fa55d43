//! The type registry: which provider produces which key.

use crate::error::{Error, Result};
use crate::key::TypeKey;
use crate::provider::Provider;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Index of a provider within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ProviderId(pub(crate) usize);

/// Maps every output key to the single provider able to produce it.
///
/// Mutation requires `&mut self`; once the owning container starts resolving,
/// the registry is only ever read.
#[derive(Default)]
pub(crate) struct Registry {
  providers: Vec<Arc<Provider>>,
  by_key: HashMap<TypeKey, ProviderId>,
}

impl Registry {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Adds `provider`, rejecting it whole if any of its outputs is already taken.
  pub(crate) fn register(&mut self, provider: Provider) -> Result<ProviderId> {
    if provider.outputs().is_empty() {
      return Err(Error::EmptyProvider {
        provider: provider.label().to_owned(),
      });
    }

    let mut seen = HashSet::with_capacity(provider.outputs().len());
    for key in provider.outputs() {
      if let Some(existing) = self.by_key.get(key) {
        return Err(Error::DuplicateProvider {
          key: key.clone(),
          existing: self.providers[existing.0].label().to_owned(),
        });
      }
      if !seen.insert(key) {
        return Err(Error::DuplicateProvider {
          key: key.clone(),
          existing: provider.label().to_owned(),
        });
      }
    }

    let id = ProviderId(self.providers.len());
    for key in provider.outputs() {
      self.by_key.insert(key.clone(), id);
    }
    self.providers.push(Arc::new(provider));
    Ok(id)
  }

  pub(crate) fn lookup(&self, key: &TypeKey) -> Result<ProviderId> {
    self
      .by_key
      .get(key)
      .copied()
      .ok_or_else(|| Error::UnknownType {
        key: key.clone(),
        required_by: None,
      })
  }

  pub(crate) fn provider(&self, id: ProviderId) -> &Arc<Provider> {
    &self.providers[id.0]
  }

  pub(crate) fn contains(&self, key: &TypeKey) -> bool {
    self.by_key.contains_key(key)
  }

  pub(crate) fn keys(&self) -> impl Iterator<Item = &TypeKey> {
    self.providers.iter().flat_map(|provider| provider.outputs().iter())
  }

  pub(crate) fn len(&self) -> usize {
    self.providers.len()
  }
}
