//! Nested containers of tracked arrays.
//!
//! A [`Tree`] is either a leaf ([`Tracked`]), a frozen array, an empty
//! marker, or a container (list, tuple, string-keyed dict, or a registered
//! custom type) of subtrees. [`flatten`] splits a tree into its leaves, in a
//! deterministic order, plus a [`TreeDef`] describing everything else;
//! [`unflatten`] is the inverse.
//!
//! Leaf order is depth-first, left to right. Dict children are visited in
//! ascending key order.
//!
//! Typed Rust values enter and leave trees through the [`PyTree`] trait.
//!
//! Frozen arrays ([`Tree::Static`]) travel inside the structure descriptor
//! instead of the leaf list, so `grad` never differentiates them and
//! reports `None` in their place.

mod convert;
mod registry;

pub use convert::PyTree;
pub use registry::{AuxData, AuxValue, CustomNode, is_registered, register_node};

use std::any::TypeId;
use std::collections::BTreeMap;

use crate::array::NdArray;
use crate::autodiff::Tracked;
use crate::error::{Result, ShapeError, StructureError};

/// Deepest chain of nested custom nodes `flatten` follows.
pub const MAX_CUSTOM_DEPTH: usize = 256;

/// A nested container whose leaves are tracked arrays.
#[derive(Debug, Clone)]
pub enum Tree {
    /// A single array.
    Leaf(Tracked),
    /// A frozen array. Kept in the structure, never differentiated.
    Static(NdArray),
    /// Absent value. Contributes no leaves.
    None,
    /// Ordered sequence.
    List(Vec<Tree>),
    /// Fixed-arity sequence.
    Tuple(Vec<Tree>),
    /// String-keyed mapping, visited in key order.
    Dict(BTreeMap<String, Tree>),
    /// Value of a registered container type.
    Custom(CustomNode),
}

impl Tree {
    /// Wrap a value of a registered container type.
    pub fn custom<T: std::any::Any + Send + Sync>(value: T) -> Self {
        Self::Custom(CustomNode::new(value))
    }

    /// Short name of this node's kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Leaf(_) => "leaf",
            Self::Static(_) => "static",
            Self::None => "none",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Custom(node) => node.type_name(),
        }
    }

    /// Borrow the leaf.
    pub fn as_leaf(&self) -> Result<&Tracked> {
        match self {
            Self::Leaf(t) => Ok(t),
            other => Err(expected("leaf", other)),
        }
    }

    /// Take the leaf.
    pub fn into_leaf(self) -> Result<Tracked> {
        match self {
            Self::Leaf(t) => Ok(t),
            other => Err(expected("leaf", &other)),
        }
    }

    /// Child of a dict by key.
    pub fn get(&self, key: &str) -> Result<&Tree> {
        match self {
            Self::Dict(map) => map
                .get(key)
                .ok_or_else(|| StructureError::MissingKey(key.to_string()).into()),
            other => Err(expected("dict", other)),
        }
    }

    /// Child of a list or tuple by position.
    pub fn index(&self, index: usize) -> Result<&Tree> {
        let (kind, items) = match self {
            Self::List(items) => ("list", items),
            Self::Tuple(items) => ("tuple", items),
            other => return Err(expected("list or tuple", other)),
        };
        items.get(index).ok_or_else(|| {
            StructureError::IndexOutOfRange {
                kind,
                index,
                len: items.len(),
            }
            .into()
        })
    }

    /// Clone the registered value out of a custom node.
    pub fn downcast_custom<T: Clone + 'static>(&self) -> Result<T> {
        match self {
            Self::Custom(node) => node.downcast_ref::<T>().cloned().ok_or_else(|| {
                StructureError::Expected {
                    expected: std::any::type_name::<T>(),
                    found: node.type_name(),
                }
                .into()
            }),
            other => Err(expected(std::any::type_name::<T>(), other)),
        }
    }
}

pub(crate) fn expected(expected: &'static str, found: &Tree) -> crate::error::GradError {
    StructureError::Expected {
        expected,
        found: found.kind_name(),
    }
    .into()
}

/// Structural equality. Leaves compare by value; custom nodes compare by
/// type, auxiliary data, and children. Custom nodes that fail to flatten
/// are unequal to everything.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Leaf(a), Self::Leaf(b)) => a == b,
            (Self::Static(a), Self::Static(b)) => a == b,
            (Self::None, Self::None) => true,
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (Self::Custom(a), Self::Custom(b)) => {
                if a.type_id() != b.type_id() {
                    return false;
                }
                // flatten bounds the depth; direct recursion would not
                match (flatten(self), flatten(other)) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl From<Tracked> for Tree {
    fn from(t: Tracked) -> Self {
        Self::Leaf(t)
    }
}

/// Structure of a [`Tree`] with the leaves removed.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeDef {
    Leaf,
    Static(NdArray),
    None,
    List(Vec<TreeDef>),
    Tuple(Vec<TreeDef>),
    Dict(BTreeMap<String, TreeDef>),
    Custom {
        type_id: TypeId,
        type_name: &'static str,
        aux: AuxData,
        children: Vec<TreeDef>,
    },
}

impl TreeDef {
    /// Number of leaves a tree of this structure holds.
    pub fn num_leaves(&self) -> usize {
        match self {
            Self::Leaf => 1,
            Self::Static(_) | Self::None => 0,
            Self::List(children) | Self::Tuple(children) => {
                children.iter().map(Self::num_leaves).sum()
            }
            Self::Dict(children) => children.values().map(Self::num_leaves).sum(),
            Self::Custom { children, .. } => children.iter().map(Self::num_leaves).sum(),
        }
    }

    /// The same structure with every frozen array replaced by `None`.
    ///
    /// Gradients are rebuilt with this descriptor.
    pub fn without_static(&self) -> TreeDef {
        let strip = |defs: &[TreeDef]| -> Vec<TreeDef> {
            defs.iter().map(Self::without_static).collect()
        };
        match self {
            Self::Static(_) => Self::None,
            Self::Leaf => Self::Leaf,
            Self::None => Self::None,
            Self::List(children) => Self::List(strip(children)),
            Self::Tuple(children) => Self::Tuple(strip(children)),
            Self::Dict(children) => Self::Dict(
                children
                    .iter()
                    .map(|(key, d)| (key.clone(), d.without_static()))
                    .collect(),
            ),
            Self::Custom {
                type_id,
                type_name,
                aux,
                children,
            } => Self::Custom {
                type_id: *type_id,
                type_name: *type_name,
                aux: aux.clone(),
                children: strip(children),
            },
        }
    }
}

/// Split a tree into its leaves and structure.
///
/// Fails with [`StructureError::Unregistered`] on custom nodes whose type
/// was never registered and with [`StructureError::Cycle`] when a custom
/// node (transitively) contains itself. A chain of custom nodes deeper
/// than [`MAX_CUSTOM_DEPTH`] is reported as
/// [`StructureError::DepthExceeded`]; this catches cycles that hand out a
/// fresh handle at every level.
pub fn flatten(tree: &Tree) -> Result<(Vec<Tracked>, TreeDef)> {
    let mut leaves = Vec::new();
    let mut path = Vec::new();
    let def = flatten_into(tree, &mut leaves, &mut path)?;
    Ok((leaves, def))
}

fn flatten_into(tree: &Tree, leaves: &mut Vec<Tracked>, path: &mut Vec<usize>) -> Result<TreeDef> {
    Ok(match tree {
        Tree::Leaf(t) => {
            leaves.push(t.clone());
            TreeDef::Leaf
        }
        Tree::Static(a) => TreeDef::Static(a.clone()),
        Tree::None => TreeDef::None,
        Tree::List(items) => TreeDef::List(flatten_children(items, leaves, path)?),
        Tree::Tuple(items) => TreeDef::Tuple(flatten_children(items, leaves, path)?),
        Tree::Dict(map) => TreeDef::Dict(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), flatten_into(item, leaves, path)?)))
                .collect::<Result<_>>()?,
        ),
        Tree::Custom(node) => {
            let addr = node.addr();
            if path.contains(&addr) {
                return Err(StructureError::Cycle {
                    type_name: node.type_name(),
                }
                .into());
            }
            if path.len() >= MAX_CUSTOM_DEPTH {
                return Err(StructureError::DepthExceeded {
                    type_name: node.type_name(),
                    limit: MAX_CUSTOM_DEPTH,
                }
                .into());
            }
            let (items, aux) = registry::flatten_custom(node)?;
            path.push(addr);
            let children = flatten_children(&items, leaves, path);
            path.pop();
            TreeDef::Custom {
                type_id: node.type_id(),
                type_name: node.type_name(),
                aux,
                children: children?,
            }
        }
    })
}

fn flatten_children(
    items: &[Tree],
    leaves: &mut Vec<Tracked>,
    path: &mut Vec<usize>,
) -> Result<Vec<TreeDef>> {
    items
        .iter()
        .map(|item| flatten_into(item, leaves, path))
        .collect()
}

/// Rebuild a tree from a structure and exactly `def.num_leaves()` leaves.
pub fn unflatten(def: &TreeDef, leaves: Vec<Tracked>) -> Result<Tree> {
    let expected = def.num_leaves();
    if leaves.len() != expected {
        return Err(ShapeError::LeafCount {
            expected,
            actual: leaves.len(),
        }
        .into());
    }
    let mut leaves = leaves.into_iter();
    unflatten_from(def, &mut leaves)
}

type Leaves = std::vec::IntoIter<Tracked>;

fn unflatten_from(def: &TreeDef, leaves: &mut Leaves) -> Result<Tree> {
    Ok(match def {
        TreeDef::Leaf => {
            let leaf = leaves.next().ok_or(ShapeError::LeafCount {
                expected: 1,
                actual: 0,
            })?;
            Tree::Leaf(leaf)
        }
        TreeDef::Static(a) => Tree::Static(a.clone()),
        TreeDef::None => Tree::None,
        TreeDef::List(defs) => Tree::List(unflatten_children(defs, leaves)?),
        TreeDef::Tuple(defs) => Tree::Tuple(unflatten_children(defs, leaves)?),
        TreeDef::Dict(defs) => Tree::Dict(
            defs.iter()
                .map(|(key, d)| Ok((key.clone(), unflatten_from(d, leaves)?)))
                .collect::<Result<_>>()?,
        ),
        TreeDef::Custom {
            type_id,
            type_name,
            aux,
            children,
        } => {
            let children = unflatten_children(children, leaves)?;
            Tree::Custom(registry::unflatten_custom(*type_id, type_name, aux, children)?)
        }
    })
}

fn unflatten_children(defs: &[TreeDef], leaves: &mut Leaves) -> Result<Vec<Tree>> {
    defs.iter().map(|d| unflatten_from(d, leaves)).collect()
}

/// Leaves of a value in flattening order.
pub fn tree_leaves<X: PyTree>(x: &X) -> Result<Vec<Tracked>> {
    Ok(flatten(&x.to_tree()?)?.0)
}

/// Structure of a value.
pub fn tree_structure<X: PyTree>(x: &X) -> Result<TreeDef> {
    Ok(flatten(&x.to_tree()?)?.1)
}

/// Apply `f` to every leaf, keeping the structure.
///
/// ```
/// use std::collections::BTreeMap;
/// use ndgrad::Tracked;
/// use ndgrad::pytree::tree_map;
///
/// let params = BTreeMap::from([
///     ("a".to_string(), Tracked::scalar(1.0)),
///     ("b".to_string(), Tracked::scalar(2.0)),
/// ]);
/// let doubled = tree_map(&params, |t| t.try_mul(&t.scalar_like(2.0))).unwrap();
/// assert_eq!(doubled["b"].item().unwrap(), 4.0);
/// ```
pub fn tree_map<X: PyTree>(x: &X, mut f: impl FnMut(&Tracked) -> Result<Tracked>) -> Result<X> {
    let (leaves, def) = flatten(&x.to_tree()?)?;
    let mapped = leaves.iter().map(&mut f).collect::<Result<Vec<_>>>()?;
    X::from_tree(unflatten(&def, mapped)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array;

    fn leaf(v: f64) -> Tree {
        Tree::Leaf(Tracked::scalar(v))
    }

    #[test]
    fn test_flatten_order_is_depth_first_with_sorted_keys() {
        let tree = Tree::List(vec![
            leaf(1.0),
            Tree::Dict(BTreeMap::from([
                ("z".to_string(), leaf(3.0)),
                ("a".to_string(), Tree::Tuple(vec![leaf(2.0), Tree::None])),
            ])),
            leaf(4.0),
        ]);
        let (leaves, def) = flatten(&tree).unwrap();
        let values: Vec<f64> = leaves.iter().map(|t| t.item().unwrap()).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(def.num_leaves(), 4);
        assert_eq!(unflatten(&def, leaves).unwrap(), tree);
    }

    #[test]
    fn test_unflatten_rejects_wrong_leaf_count() {
        let (_, def) = flatten(&Tree::List(vec![leaf(1.0), leaf(2.0)])).unwrap();
        let err = unflatten(&def, vec![Tracked::scalar(1.0)]).unwrap_err();
        assert!(matches!(
            err,
            crate::GradError::Shape(ShapeError::LeafCount {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_none_and_empty_containers_have_no_leaves() {
        let tree = Tree::Tuple(vec![Tree::None, Tree::List(vec![]), Tree::Dict(BTreeMap::new())]);
        let (leaves, def) = flatten(&tree).unwrap();
        assert!(leaves.is_empty());
        assert_eq!(unflatten(&def, vec![]).unwrap(), tree);
    }

    #[test]
    fn test_accessors() {
        let tree = Tree::Dict(BTreeMap::from([(
            "w".to_string(),
            Tree::List(vec![Tree::Leaf(Tracked::new(array([1.0, 2.0])))]),
        )]));
        let w = tree.get("w").unwrap().index(0).unwrap().as_leaf().unwrap();
        assert_eq!(w.data(), &[1.0, 2.0]);

        assert!(matches!(
            tree.get("missing"),
            Err(crate::GradError::Structure(StructureError::MissingKey(_)))
        ));
        assert!(matches!(
            tree.get("w").unwrap().index(3),
            Err(crate::GradError::Structure(StructureError::IndexOutOfRange {
                kind: "list",
                index: 3,
                len: 1
            }))
        ));
        assert!(tree.as_leaf().is_err());
    }

    #[test]
    fn test_tree_map_keeps_structure() {
        let x = (Tracked::scalar(1.0), vec![Tracked::scalar(2.0), Tracked::scalar(3.0)]);
        let y = tree_map(&x, |t| t.exp()).unwrap();
        assert_eq!(y.1.len(), 2);
        assert!((y.1[1].item().unwrap() - 3.0f64.exp()).abs() < 1e-12);
        assert_eq!(tree_structure(&x).unwrap(), tree_structure(&y).unwrap());
    }

    #[test]
    fn test_static_arrays_stay_in_the_structure() {
        let frozen = array([1.0, 2.0]);
        let tree = Tree::Tuple(vec![leaf(3.0), Tree::Static(frozen.clone())]);
        let (leaves, def) = flatten(&tree).unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(def.num_leaves(), 1);
        assert_eq!(unflatten(&def, leaves.clone()).unwrap(), tree);

        let stripped = unflatten(&def.without_static(), leaves).unwrap();
        assert_eq!(stripped, Tree::Tuple(vec![leaf(3.0), Tree::None]));
        assert_eq!(Tree::Static(frozen).kind_name(), "static");
    }
}
