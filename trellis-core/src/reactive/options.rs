//! Equality options for observables and computeds.
//!
//! Without an equality check every write (or recomputation) counts as a
//! change and is broadcast. With one, a new value judged equal to the
//! current one is dropped and nothing downstream hears about it.

use std::fmt;
use std::rc::Rc;

/// Comparison `(current, next) -> equal`.
pub type Equality<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Construction options shared by observables and computeds.
///
/// ```rust,ignore
/// let name = runtime.observable_with(String::new(), Options::new().check_value(true));
/// let rounded = runtime.computed_with(
///     move || Ok(price.get()),
///     Options::new().check_value_with(|a: &f64, b: &f64| (a - b).abs() < 0.01),
/// );
/// ```
pub struct Options<T> {
    equality: Option<Equality<T>>,
}

impl<T> Options<T> {
    /// Options with equality gating disabled.
    pub fn new() -> Self {
        Self { equality: None }
    }

    /// Gate changes with a custom comparison.
    pub fn check_value_with<F>(mut self, equal: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        self.equality = Some(Rc::new(equal));
        self
    }

    /// Whether an equality check is configured.
    pub fn checks_value(&self) -> bool {
        self.equality.is_some()
    }

    pub(crate) fn into_equality(self) -> Option<Equality<T>> {
        self.equality
    }
}

impl<T: PartialEq + 'static> Options<T> {
    /// `true` gates changes with `PartialEq`; `false` disables gating.
    pub fn check_value(mut self, enabled: bool) -> Self {
        self.equality = if enabled {
            Some(Rc::new(|current: &T, next: &T| current == next))
        } else {
            None
        };
        self
    }
}

impl<T> Default for Options<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Options<T> {
    fn clone(&self) -> Self {
        Self {
            equality: self.equality.clone(),
        }
    }
}

impl<T> fmt::Debug for Options<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("checks_value", &self.checks_value())
            .finish()
    }
}
