//! Typed parameter extraction for constructors and invoked functions.
//!
//! Any function whose parameters all implement [`Inject`] can be registered as
//! a provider or invoked by the container. The parameter types are the
//! declared dependencies; no runtime inspection is involved.

use crate::error::Result;
use crate::key::TypeKey;
use crate::lifecycle::Hooks;
use crate::provider::Arguments;

use std::any::Any;
use std::sync::Arc;

use variadics_please::all_tuples;

/// A value a constructor can ask for.
pub trait Inject: Sized {
  /// The dependency this parameter consumes, if any.
  fn key() -> Option<TypeKey>;

  fn inject(args: &mut Arguments<'_>) -> Result<Self>;
}

/// The shared singleton registered for `T`.
impl<T: Any + Send + Sync> Inject for Arc<T> {
  fn key() -> Option<TypeKey> {
    Some(TypeKey::of::<T>())
  }

  fn inject(args: &mut Arguments<'_>) -> Result<Self> {
    args.take_next::<T>()
  }
}

/// The hook-registration handle. Not a dependency.
impl Inject for Hooks {
  fn key() -> Option<TypeKey> {
    None
  }

  fn inject(args: &mut Arguments<'_>) -> Result<Self> {
    Ok(args.hooks())
  }
}

/// A function the container can run as a provider, any number of times.
///
/// Implemented for `Fn` values of up to eight [`Inject`] parameters. `Marker`
/// only disambiguates the arities and is always inferred.
pub trait Constructor<Marker>: Send + Sync + 'static {
  type Output;

  fn dependencies() -> Vec<TypeKey>;

  fn construct(&self, args: &mut Arguments<'_>) -> Result<Self::Output>;
}

/// A function the container runs once, after constructing its dependencies.
///
/// Unlike [`Constructor`], invoked functions may borrow from their caller.
pub trait Invocable<Marker> {
  type Output;

  fn dependencies() -> Vec<TypeKey>;

  fn call_once(self, args: &mut Arguments<'_>) -> Result<Self::Output>;
}

macro_rules! impl_injectable_fn {
  ($($param:ident),*) => {
    impl<Func, Out, $($param: Inject),*> Constructor<fn($($param,)*) -> Out> for Func
    where
      Func: Fn($($param),*) -> Out + Send + Sync + 'static,
    {
      type Output = Out;

      #[allow(unused_mut)]
      fn dependencies() -> Vec<TypeKey> {
        let mut keys = Vec::new();
        $(keys.extend($param::key());)*
        keys
      }

      #[allow(non_snake_case, unused_variables)]
      fn construct(&self, args: &mut Arguments<'_>) -> Result<Out> {
        $(let $param = $param::inject(args)?;)*
        Ok(self($($param),*))
      }
    }

    impl<Func, Out, $($param: Inject),*> Invocable<fn($($param,)*) -> Out> for Func
    where
      Func: FnOnce($($param),*) -> Out,
    {
      type Output = Out;

      #[allow(unused_mut)]
      fn dependencies() -> Vec<TypeKey> {
        let mut keys = Vec::new();
        $(keys.extend($param::key());)*
        keys
      }

      #[allow(non_snake_case, unused_variables)]
      fn call_once(self, args: &mut Arguments<'_>) -> Result<Out> {
        $(let $param = $param::inject(args)?;)*
        Ok(self($($param),*))
      }
    }
  };
}

all_tuples!(impl_injectable_fn, 0, 8, P);
