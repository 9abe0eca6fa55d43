//! Providers: registered constructor functions with declared inputs and outputs.

use crate::error::{BoxError, Error, Result};
use crate::key::TypeKey;
use crate::lifecycle::Hooks;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use variadics_please::all_tuples;

/// A constructed value, type-erased. Each cached instance is shared by every dependent.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Wraps `value` as an [`Instance`].
pub fn instance<T: Any + Send + Sync>(value: T) -> Instance {
  Arc::new(value)
}

type ProviderFn = dyn Fn(&mut Arguments<'_>) -> Result<Vec<Instance>, BoxError> + Send + Sync;

/// A function value together with the keys it consumes and the keys it produces.
///
/// Providers are immutable once built. The typed registration methods on
/// [`Container`](crate::Container) build them from ordinary functions; this
/// type is the explicit form for when keys must be spelled out, e.g. tagged inputs.
pub struct Provider {
  label: String,
  inputs: Vec<TypeKey>,
  outputs: Vec<TypeKey>,
  func: Box<ProviderFn>,
}

impl Provider {
  /// Builds a provider from an explicit key table.
  ///
  /// `func` receives the instances for `inputs` (in order) and must return one
  /// instance per entry of `outputs`, in the same order and of the declared types.
  ///
  /// # Examples
  ///
  /// ```
  /// use fibre_di::{instance, Container, Provider, TypeKey};
  ///
  /// struct Pool { url: String }
  ///
  /// let mut container = Container::new();
  /// container.supply_tagged("primary", String::from("postgres://primary")).unwrap();
  /// container
  ///   .register(Provider::new(
  ///     "primary_pool",
  ///     vec![TypeKey::tagged::<String>("primary")],
  ///     vec![TypeKey::tagged::<Pool>("primary")],
  ///     |args| {
  ///       let url = args.get::<String>(0)?;
  ///       Ok::<_, fibre_di::Error>(vec![instance(Pool { url: (*url).clone() })])
  ///     },
  ///   ))
  ///   .unwrap();
  ///
  /// let pool = container.resolve_tagged::<Pool>("primary").unwrap();
  /// assert_eq!(pool.url, "postgres://primary");
  /// ```
  pub fn new<F, E>(
    label: impl Into<String>,
    inputs: Vec<TypeKey>,
    outputs: Vec<TypeKey>,
    func: F,
  ) -> Self
  where
    F: Fn(&mut Arguments<'_>) -> Result<Vec<Instance>, E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    Self {
      label: label.into(),
      inputs,
      outputs,
      func: Box::new(move |args| func(args).map_err(Into::into)),
    }
  }

  /// A human-readable name, used in events and error messages.
  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn inputs(&self) -> &[TypeKey] {
    &self.inputs
  }

  pub fn outputs(&self) -> &[TypeKey] {
    &self.outputs
  }

  /// The key reported when this provider fails.
  pub(crate) fn primary_key(&self) -> &TypeKey {
    // Registration rejects providers without outputs.
    &self.outputs[0]
  }

  pub(crate) fn call(&self, args: &mut Arguments<'_>) -> Result<Vec<Instance>, BoxError> {
    (self.func)(args)
  }
}

impl fmt::Debug for Provider {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Provider")
      .field("label", &self.label)
      .field("inputs", &self.inputs)
      .field("outputs", &self.outputs)
      .finish_non_exhaustive()
  }
}

/// The dependency instances handed to a provider, plus its hook handle.
pub struct Arguments<'a> {
  keys: &'a [TypeKey],
  values: &'a [Instance],
  cursor: usize,
  hooks: &'a Hooks,
}

impl<'a> Arguments<'a> {
  pub(crate) fn new(keys: &'a [TypeKey], values: &'a [Instance], hooks: &'a Hooks) -> Self {
    Self {
      keys,
      values,
      cursor: 0,
      hooks,
    }
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn key(&self, index: usize) -> Option<&TypeKey> {
    self.keys.get(index)
  }

  /// The dependency at `index`, downcast to `T`.
  pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
    let (Some(key), Some(value)) = (self.keys.get(index), self.values.get(index)) else {
      return Err(Error::UnknownType {
        key: TypeKey::of::<T>(),
        required_by: Some(format!("argument #{}", index)),
      });
    };
    Arc::clone(value)
      .downcast::<T>()
      .map_err(|_| Error::TypeMismatch {
        key: key.clone(),
        expected: std::any::type_name::<T>(),
      })
  }

  /// The next positional dependency, for [`Inject`](crate::Inject) implementations
  /// that consume a key.
  pub fn take_next<T: Any + Send + Sync>(&mut self) -> Result<Arc<T>> {
    let value = self.get::<T>(self.cursor)?;
    self.cursor += 1;
    Ok(value)
  }

  /// A handle for appending lifecycle hooks owned by the value being built.
  pub fn hooks(&self) -> Hooks {
    self.hooks.clone()
  }
}

/// A set of values produced together by one provider.
///
/// Implemented for tuples of up to eight values; each element becomes its own
/// untagged [`TypeKey`].
pub trait Products: Send + 'static {
  fn keys() -> Vec<TypeKey>;
  fn into_instances(self) -> Vec<Instance>;
}

macro_rules! impl_products_tuple {
  ($($product:ident),*) => {
    impl<$($product: Any + Send + Sync),*> Products for ($($product,)*) {
      fn keys() -> Vec<TypeKey> {
        vec![$(TypeKey::of::<$product>()),*]
      }

      #[allow(non_snake_case)]
      fn into_instances(self) -> Vec<Instance> {
        let ($($product,)*) = self;
        vec![$(instance($product)),*]
      }
    }
  };
}

all_tuples!(impl_products_tuple, 1, 8, T);
