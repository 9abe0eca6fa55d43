//! Type identifiers used to match providers with their dependents.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Uniquely names a constructible type within a container.
///
/// A key is the pair of a Rust type and an optional tag. Two providers may
/// produce the same Rust type as long as they use different tags.
///
/// Equality and hashing only consider the `TypeId` and the tag; the type name
/// is carried along for diagnostics.
#[derive(Clone)]
pub struct TypeKey {
  type_id: TypeId,
  type_name: &'static str,
  tag: Option<Arc<str>>,
}

impl TypeKey {
  /// The untagged key for `T`.
  pub fn of<T: ?Sized + Any>() -> Self {
    Self {
      type_id: TypeId::of::<T>(),
      type_name: std::any::type_name::<T>(),
      tag: None,
    }
  }

  /// The key for `T` qualified by `tag`.
  pub fn tagged<T: ?Sized + Any>(tag: impl Into<Arc<str>>) -> Self {
    Self {
      type_id: TypeId::of::<T>(),
      type_name: std::any::type_name::<T>(),
      tag: Some(tag.into()),
    }
  }

  pub fn type_id(&self) -> TypeId {
    self.type_id
  }

  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  pub fn tag(&self) -> Option<&str> {
    self.tag.as_deref()
  }
}

impl PartialEq for TypeKey {
  fn eq(&self, other: &Self) -> bool {
    self.type_id == other.type_id && self.tag == other.tag
  }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.type_id.hash(state);
    self.tag.hash(state);
  }
}

impl fmt::Display for TypeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.tag {
      Some(tag) => write!(f, "{}[{}]", self.type_name, tag),
      None => f.write_str(self.type_name),
    }
  }
}

impl fmt::Debug for TypeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.tag {
      Some(tag) => write!(f, "Key({}, Tag({}))", self.type_name, tag),
      None => write!(f, "Key({})", self.type_name),
    }
  }
}
