//! Conversions between typed Rust values and [`Tree`]s.

use std::collections::BTreeMap;

use super::{Tree, expected};
use crate::array::NdArray;
use crate::autodiff::Tracked;
use crate::error::{Result, StructureError};

/// A value that can be taken apart into a [`Tree`] and rebuilt from one.
///
/// `grad` and friends accept any `PyTree` as the differentiated argument
/// and return gradients with the same structure.
///
/// Implemented for [`Tracked`] (a leaf), [`NdArray`] (a frozen array that
/// is carried along but never differentiated), [`Tree`] itself, `Vec<T>`
/// (list), `BTreeMap<String, T>` (dict), `Option<T>` (`None` has no leaves)
/// and tuples up to four elements.
///
/// Gradients hold `None` where the argument held a frozen array, so frozen
/// slots are usually typed `Option<NdArray>`.
///
/// Other types either implement the trait by hand or go through
/// [`Tree::custom`] after [`register_node`](super::register_node).
pub trait PyTree: Sized {
    /// Describe `self` as a tree.
    fn to_tree(&self) -> Result<Tree>;

    /// Rebuild a value from a tree of the shape [`to_tree`](Self::to_tree)
    /// produces.
    fn from_tree(tree: Tree) -> Result<Self>;
}

impl PyTree for Tree {
    fn to_tree(&self) -> Result<Tree> {
        Ok(self.clone())
    }

    fn from_tree(tree: Tree) -> Result<Self> {
        Ok(tree)
    }
}

impl PyTree for Tracked {
    fn to_tree(&self) -> Result<Tree> {
        Ok(Tree::Leaf(self.clone()))
    }

    fn from_tree(tree: Tree) -> Result<Self> {
        tree.into_leaf()
    }
}

impl PyTree for NdArray {
    fn to_tree(&self) -> Result<Tree> {
        Ok(Tree::Static(self.clone()))
    }

    fn from_tree(tree: Tree) -> Result<Self> {
        match tree {
            Tree::Static(a) => Ok(a),
            other => Err(expected("static", &other)),
        }
    }
}

impl<T: PyTree> PyTree for Vec<T> {
    fn to_tree(&self) -> Result<Tree> {
        Ok(Tree::List(self.iter().map(T::to_tree).collect::<Result<_>>()?))
    }

    fn from_tree(tree: Tree) -> Result<Self> {
        match tree {
            Tree::List(items) => items.into_iter().map(T::from_tree).collect(),
            other => Err(expected("list", &other)),
        }
    }
}

impl<T: PyTree> PyTree for BTreeMap<String, T> {
    fn to_tree(&self) -> Result<Tree> {
        Ok(Tree::Dict(
            self.iter()
                .map(|(k, v)| Ok((k.clone(), v.to_tree()?)))
                .collect::<Result<_>>()?,
        ))
    }

    fn from_tree(tree: Tree) -> Result<Self> {
        match tree {
            Tree::Dict(map) => map
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_tree(v)?)))
                .collect(),
            other => Err(expected("dict", &other)),
        }
    }
}

impl<T: PyTree> PyTree for Option<T> {
    fn to_tree(&self) -> Result<Tree> {
        match self {
            Some(value) => value.to_tree(),
            None => Ok(Tree::None),
        }
    }

    fn from_tree(tree: Tree) -> Result<Self> {
        match tree {
            Tree::None => Ok(None),
            other => T::from_tree(other).map(Some),
        }
    }
}

macro_rules! impl_tuple {
    ($len:literal; $($name:ident),+) => {
        impl<$($name: PyTree),+> PyTree for ($($name,)+) {
            #[allow(non_snake_case)]
            fn to_tree(&self) -> Result<Tree> {
                let ($($name,)+) = self;
                Ok(Tree::Tuple(vec![$($name.to_tree()?),+]))
            }

            #[allow(non_snake_case)]
            fn from_tree(tree: Tree) -> Result<Self> {
                let items = match tree {
                    Tree::Tuple(items) => items,
                    other => return Err(expected("tuple", &other)),
                };
                let items: [Tree; $len] = items.try_into().map_err(|_| {
                    StructureError::Expected {
                        expected: concat!("tuple of ", $len, " elements"),
                        found: "tuple of another length",
                    }
                })?;
                let [$($name),+] = items;
                Ok(($($name::from_tree($name)?,)+))
            }
        }
    };
}

impl_tuple!(1; A);
impl_tuple!(2; A, B);
impl_tuple!(3; A, B, C);
impl_tuple!(4; A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GradError;
    use crate::pytree::{flatten, unflatten};

    fn round_trip<X: PyTree>(x: &X) -> X {
        let (leaves, def) = flatten(&x.to_tree().unwrap()).unwrap();
        X::from_tree(unflatten(&def, leaves).unwrap()).unwrap()
    }

    #[test]
    fn test_nested_round_trip() {
        let x = (
            Tracked::scalar(1.0),
            vec![Some(Tracked::scalar(2.0)), None],
            BTreeMap::from([("k".to_string(), Tracked::scalar(3.0))]),
        );
        let y = round_trip(&x);
        assert_eq!(y.0, x.0);
        assert_eq!(y.1[0], x.1[0]);
        assert!(y.1[1].is_none());
        assert_eq!(y.2["k"], x.2["k"]);
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let err = Vec::<Tracked>::from_tree(Tree::Leaf(Tracked::scalar(1.0))).unwrap_err();
        assert!(matches!(
            err,
            GradError::Structure(StructureError::Expected {
                expected: "list",
                found: "leaf"
            })
        ));
    }

    #[test]
    fn test_tuple_arity_is_checked() {
        let tree = Tree::Tuple(vec![Tree::Leaf(Tracked::scalar(1.0))]);
        let err = <(Tracked, Tracked)>::from_tree(tree).unwrap_err();
        assert!(matches!(
            err,
            GradError::Structure(StructureError::Expected {
                expected: "tuple of 2 elements",
                ..
            })
        ));
    }

    #[test]
    fn test_frozen_array_round_trip() {
        let x = (Tracked::scalar(1.0), Some(crate::array([2.0, 3.0])));
        let y = round_trip(&x);
        assert_eq!(y.1.as_ref().map(|a| a.data()), Some(&[2.0, 3.0][..]));

        let err = NdArray::from_tree(Tree::None).unwrap_err();
        assert!(err.to_string().contains("expected static, found none"));
    }
}
