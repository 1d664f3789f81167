//! Attribute records
//!
//! A record is a fixed set of named attributes split into required and optional ones.
//! Optional attributes that are absent at construction are resolved by an ordered
//! table of [`Initializer`]s. The table is evaluated strictly in order and there is no
//! dependency resolution: an initializer can only rely on the attributes resolved
//! before it, so reordering the table changes the resulting record.

use crate::{Error, Result};
use std::fmt;

/// Change of a single attribute in a partial update
#[derive(Debug, Clone, Default)]
pub enum Field<T> {
    /// The current value is carried over
    #[default]
    Keep,
    /// The value is replaced
    Set(T),
    /// The value is dropped and its initializer, if any, runs again
    Clear,
}
impl<T> Field<T> {
    /// Merges the change into an attribute slot
    pub fn merge(self, slot: &mut Option<T>) {
        match self {
            Field::Keep => (),
            Field::Set(value) => *slot = Some(value),
            Field::Clear => *slot = None,
        }
    }
    pub fn is_keep(&self) -> bool {
        matches!(self, Field::Keep)
    }
}
impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Field::Set(value),
            None => Field::Clear,
        }
    }
}

/// Default value of an attribute computed from the attributes resolved so far
pub struct Initializer<N, A> {
    pub name: N,
    pub init: fn(&mut A) -> Result<()>,
}
impl<N, A> Initializer<N, A> {
    pub fn new(name: N, init: fn(&mut A) -> Result<()>) -> Self {
        Self { name, init }
    }
}

/// Record with required and optional attributes
///
/// `Attributes` is the attribute map (every attribute optional) and `Patch` the
/// partial mapping returned by the record transforms.
pub trait Record: Sized {
    type Name: Copy + fmt::Display + 'static;
    type Attributes: Clone;
    type Patch;

    /// Attributes that must be present once the initializers have run
    const REQUIRED: &'static [Self::Name];

    /// Ordered initializers of the optional attributes
    fn initializers() -> Vec<Initializer<Self::Name, Self::Attributes>>;
    fn is_present(attributes: &Self::Attributes, name: Self::Name) -> bool;
    /// Merges a partial update over an attribute map
    fn merge(attributes: &mut Self::Attributes, patch: Self::Patch);
    fn attributes(&self) -> &Self::Attributes;
    fn attributes_mut(&mut self) -> &mut Self::Attributes;
    /// Builds the record from a fully resolved attribute map
    fn assemble(attributes: Self::Attributes) -> Result<Self>;

    /// Resolves the absent attributes and builds the record
    fn build(mut attributes: Self::Attributes) -> Result<Self> {
        for Initializer { name, init } in Self::initializers() {
            if !Self::is_present(&attributes, name) {
                log::debug!("initializing `{}`", name);
                init(&mut attributes)?;
            }
        }
        if let Some(name) = Self::REQUIRED
            .iter()
            .find(|&&name| !Self::is_present(&attributes, name))
        {
            return Err(Error::MissingAttribute(name.to_string()));
        }
        Self::assemble(attributes)
    }
    /// Returns a new record with `patch` merged over a snapshot of this one
    fn update(&self, patch: Self::Patch) -> Result<Self> {
        let mut attributes = self.attributes().clone();
        Self::merge(&mut attributes, patch);
        Self::build(attributes)
    }
    /// Merges `patch` into this record, the initializers are not run
    fn update_in_place(&mut self, patch: Self::Patch) {
        Self::merge(self.attributes_mut(), patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Name {
        Base,
        Double,
        Next,
    }
    impl fmt::Display for Name {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }
    #[derive(Debug, Clone, Default)]
    struct Attrs {
        base: Option<i32>,
        double: Option<i32>,
        next: Option<i32>,
    }
    #[derive(Default)]
    struct AttrsPatch {
        base: Field<i32>,
        double: Field<i32>,
        next: Field<i32>,
    }
    struct Chain(Attrs);

    fn init_double(a: &mut Attrs) -> Result<()> {
        a.double = a.base.map(|x| 2 * x);
        Ok(())
    }
    fn init_next(a: &mut Attrs) -> Result<()> {
        a.next = a.double.map(|x| x + 1);
        Ok(())
    }

    impl Record for Chain {
        type Name = Name;
        type Attributes = Attrs;
        type Patch = AttrsPatch;
        const REQUIRED: &'static [Name] = &[Name::Base];

        fn initializers() -> Vec<Initializer<Name, Attrs>> {
            vec![
                Initializer::new(Name::Double, init_double),
                Initializer::new(Name::Next, init_next),
            ]
        }
        fn is_present(attributes: &Attrs, name: Name) -> bool {
            match name {
                Name::Base => attributes.base.is_some(),
                Name::Double => attributes.double.is_some(),
                Name::Next => attributes.next.is_some(),
            }
        }
        fn merge(attributes: &mut Attrs, patch: AttrsPatch) {
            patch.base.merge(&mut attributes.base);
            patch.double.merge(&mut attributes.double);
            patch.next.merge(&mut attributes.next);
        }
        fn attributes(&self) -> &Attrs {
            &self.0
        }
        fn attributes_mut(&mut self) -> &mut Attrs {
            &mut self.0
        }
        fn assemble(attributes: Attrs) -> Result<Self> {
            Ok(Self(attributes))
        }
    }

    #[test]
    fn initializers_run_in_order() {
        let chain = Chain::build(Attrs {
            base: Some(3),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(chain.0.double, Some(6));
        assert_eq!(chain.0.next, Some(7));
    }

    #[test]
    fn missing_required() {
        let err = Chain::build(Attrs::default()).err().unwrap();
        assert!(matches!(err, Error::MissingAttribute(name) if name == "Base"));
    }

    #[test]
    fn functional_update_keeps_source() {
        let chain = Chain::build(Attrs {
            base: Some(1),
            ..Default::default()
        })
        .unwrap();
        let updated = chain
            .update(AttrsPatch {
                base: Field::Set(5),
                double: Field::Clear,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(chain.0.double, Some(2));
        assert_eq!(updated.0.double, Some(10));
        // `next` was carried over, its initializer does not run again
        assert_eq!(updated.0.next, Some(3));
    }

    #[test]
    fn in_place_update_skips_initializers() {
        let mut chain = Chain::build(Attrs {
            base: Some(1),
            ..Default::default()
        })
        .unwrap();
        chain.update_in_place(AttrsPatch {
            double: Field::Clear,
            ..Default::default()
        });
        assert_eq!(chain.0.double, None);
        assert_eq!(chain.0.next, Some(3));
    }
}
