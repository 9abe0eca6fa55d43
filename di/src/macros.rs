//! Public macros for spelling out type keys.

/// Builds a [`TypeKey`](crate::TypeKey).
///
/// # Examples
///
/// ```
/// use fibre_di::{key, TypeKey};
///
/// struct Database;
///
/// assert_eq!(key!(Database), TypeKey::of::<Database>());
/// assert_eq!(key!(Database, "replica"), TypeKey::tagged::<Database>("replica"));
/// ```
#[macro_export]
macro_rules! key {
    // Arm for an untagged key: key!(MyService)
    ($type:ty) => {
        $crate::TypeKey::of::<$type>()
    };

    // Arm for a tagged key: key!(MyService, "tag")
    ($type:ty, $tag:expr) => {
        $crate::TypeKey::tagged::<$type>($tag)
    };
}
