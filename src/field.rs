use serde::{Deserialize, Serialize};

/// A value that may not have been computed yet.
///
/// Landmark models are filled in stage by stage, so most geometric
/// quantities start out absent. `Field` makes that explicit instead of
/// relying on sentinel coordinates; it serializes as an optional value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Field<T> {
    value: Option<T>,
}

impl<T> Field<T> {
    /// A present field.
    pub const fn new(value: T) -> Self {
        Self { value: Some(value) }
    }

    /// An absent field.
    pub const fn absent() -> Self {
        Self { value: None }
    }

    pub fn has(&self) -> bool {
        self.value.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    pub fn set(&mut self, value: T) {
        self.value = Some(value);
    }

    pub fn clear(&mut self) {
        self.value = None;
    }

    pub fn take(&mut self) -> Option<T> {
        self.value.take()
    }

    pub fn into_option(self) -> Option<T> {
        self.value
    }

    /// Apply `f` to a present value; absent stays absent.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Field<U> {
        Field {
            value: self.value.map(f),
        }
    }

    /// Fallible [`Field::map`]; `f` is never called for an absent field.
    pub fn try_map<U, E, F>(self, f: F) -> Result<Field<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Ok(Field {
            value: self.value.map(f).transpose()?,
        })
    }
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::absent()
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        Self { value }
    }
}

impl<T> From<Field<T>> for Option<T> {
    fn from(field: Field<T>) -> Self {
        field.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_tracking() {
        let mut f: Field<f32> = Field::default();
        assert!(!f.has());
        assert_eq!(f.get(), None);

        f.set(1.5);
        assert!(f.has());
        assert_eq!(f.get(), Some(&1.5));

        if let Some(v) = f.get_mut() {
            *v = 2.0;
        }
        assert_eq!(f.take(), Some(2.0));
        assert!(!f.has());
    }

    #[test]
    fn map_leaves_absent_untouched() {
        let absent: Field<i32> = Field::absent();
        let mut called = false;
        let mapped = absent.map(|v| {
            called = true;
            v * 2
        });
        assert!(!mapped.has());
        assert!(!called);

        let present = Field::new(3).map(|v| v * 2);
        assert_eq!(present.into_option(), Some(6));
    }

    #[test]
    fn try_map_propagates_errors() {
        let r: Result<Field<i32>, &str> = Field::new(1).try_map(|_| Err("bad"));
        assert_eq!(r, Err("bad"));

        let r: Result<Field<i32>, &str> = Field::absent().try_map(|_: i32| Err("bad"));
        assert_eq!(r, Ok(Field::absent()));
    }

    #[test]
    fn serializes_as_option() {
        let json = serde_json::to_string(&Field::new(4)).unwrap();
        assert_eq!(json, "4");
        let json = serde_json::to_string(&Field::<i32>::absent()).unwrap();
        assert_eq!(json, "null");

        let back: Field<i32> = serde_json::from_str("null").unwrap();
        assert!(!back.has());
    }
}
