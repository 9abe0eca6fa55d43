//! Dependency graph resolution: computes a construction order, detecting cycles.

use crate::error::{Error, Result};
use crate::key::TypeKey;
use crate::registry::{ProviderId, Registry};

use std::collections::HashMap;

/// Traversal state of one provider during a single resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
  Unvisited,
  InProgress,
  Resolved,
  Failed,
}

/// A depth-first walk over the provider graph.
///
/// Node states live only as long as the resolver. Resolving several roots with
/// the same resolver shares the `Resolved` set, so a provider reachable from
/// more than one root still appears once in the plan.
pub(crate) struct Resolver<'r> {
  registry: &'r Registry,
  states: HashMap<ProviderId, NodeState>,
  // The keys through which each in-progress provider was entered.
  path: Vec<(ProviderId, TypeKey)>,
  order: Vec<ProviderId>,
}

impl<'r> Resolver<'r> {
  pub(crate) fn new(registry: &'r Registry) -> Self {
    Self {
      registry,
      states: HashMap::new(),
      path: Vec::new(),
      order: Vec::new(),
    }
  }

  /// Adds `key` and everything it transitively needs to the plan.
  ///
  /// `required_by` names the requester and is only used in the error for a
  /// missing root.
  pub(crate) fn visit_root(&mut self, key: &TypeKey, required_by: Option<&str>) -> Result<()> {
    let id = self.registry.lookup(key).map_err(|_| Error::UnknownType {
      key: key.clone(),
      required_by: required_by.map(str::to_owned),
    })?;
    self.visit(id, key)
  }

  /// The construction order: every provider after all providers of its inputs.
  pub(crate) fn finish(self) -> Vec<ProviderId> {
    self.order
  }

  fn state(&self, id: ProviderId) -> NodeState {
    self.states.get(&id).copied().unwrap_or(NodeState::Unvisited)
  }

  fn visit(&mut self, id: ProviderId, via: &TypeKey) -> Result<()> {
    match self.state(id) {
      NodeState::Resolved => return Ok(()),
      NodeState::InProgress => return Err(self.cycle_error(id, via)),
      NodeState::Failed | NodeState::Unvisited => {}
    }

    self.states.insert(id, NodeState::InProgress);
    self.path.push((id, via.clone()));

    let registry = self.registry;
    let provider = registry.provider(id);
    for input in provider.inputs() {
      let step = match registry.lookup(input) {
        Ok(dep) => self.visit(dep, input),
        Err(_) => Err(Error::UnknownType {
          key: input.clone(),
          required_by: Some(provider.label().to_owned()),
        }),
      };
      if let Err(err) = step {
        self.states.insert(id, NodeState::Failed);
        self.path.pop();
        return Err(err);
      }
    }

    self.path.pop();
    self.states.insert(id, NodeState::Resolved);
    self.order.push(id);
    Ok(())
  }

  fn cycle_error(&self, id: ProviderId, via: &TypeKey) -> Error {
    let start = self
      .path
      .iter()
      .position(|(entered, _)| *entered == id)
      .unwrap_or(0);
    let mut cycle: Vec<TypeKey> = self.path[start..].iter().map(|(_, key)| key.clone()).collect();
    cycle.push(via.clone());
    Error::CyclicDependency { cycle }
  }
}

/// Resolves a single key into its construction order.
pub(crate) fn resolve(registry: &Registry, key: &TypeKey) -> Result<Vec<ProviderId>> {
  let mut resolver = Resolver::new(registry);
  resolver.visit_root(key, None)?;
  Ok(resolver.finish())
}
