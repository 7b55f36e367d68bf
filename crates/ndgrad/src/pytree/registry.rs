//! Process-wide registry of user-defined container types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use super::Tree;
use crate::error::{Result, StructureError};

/// Type-erased value of a registered container type.
///
/// Cloning shares the value.
#[derive(Clone)]
pub struct CustomNode {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl CustomNode {
    /// Wrap a value of a (registered) container type.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Name of the wrapped type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrow the wrapped value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Address of the shared value, used to detect cycles.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.value) as *const () as usize
    }
}

impl fmt::Debug for CustomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomNode")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Auxiliary (non-leaf) data a registered type keeps in its structure
/// descriptor, e.g. field names or static configuration.
pub trait AuxValue: Any + fmt::Debug + Send + Sync {
    /// Dynamic equality.
    fn dyn_eq(&self, other: &dyn AuxValue) -> bool;

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<A: Any + fmt::Debug + PartialEq + Send + Sync> AuxValue for A {
    fn dyn_eq(&self, other: &dyn AuxValue) -> bool {
        other.as_any().downcast_ref::<A>() == Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared handle to auxiliary data.
#[derive(Clone)]
pub struct AuxData(Arc<dyn AuxValue>);

impl AuxData {
    /// Borrow the data if it is an `A`.
    pub fn downcast_ref<A: Any>(&self) -> Option<&A> {
        self.0.as_any().downcast_ref::<A>()
    }
}

impl PartialEq for AuxData {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl fmt::Debug for AuxData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

type FlattenFn = dyn Fn(&CustomNode) -> Result<(Vec<Tree>, AuxData)> + Send + Sync;
type UnflattenFn = dyn Fn(&AuxData, Vec<Tree>) -> Result<CustomNode> + Send + Sync;

struct Entry {
    flatten: Box<FlattenFn>,
    unflatten: Box<UnflattenFn>,
}

static REGISTRY: LazyLock<RwLock<HashMap<TypeId, Arc<Entry>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Declare `T` as a container.
///
/// `flatten` splits a value into child subtrees plus auxiliary data;
/// `unflatten` is its inverse. Registering a type again replaces the
/// previous pair.
///
/// # Example
///
/// ```
/// use ndgrad::pytree::{CustomNode, Tree, flatten, register_node};
/// use ndgrad::{Tracked, array};
///
/// #[derive(Clone)]
/// struct Affine {
///     weight: Tracked,
///     bias: Tracked,
/// }
///
/// register_node::<Affine, _>(
///     |a| Ok((vec![Tree::Leaf(a.weight.clone()), Tree::Leaf(a.bias.clone())], ())),
///     |_, children| {
///         let [weight, bias]: [Tree; 2] = children.try_into().map_err(|_| {
///             ndgrad::StructureError::UnflattenFailed {
///                 type_name: "Affine",
///                 reason: "expected two children".into(),
///             }
///         })?;
///         Ok(Affine { weight: weight.into_leaf()?, bias: bias.into_leaf()? })
///     },
/// );
///
/// let layer = Affine {
///     weight: Tracked::new(array([[1.0, 2.0]])),
///     bias: Tracked::scalar(0.5),
/// };
/// let (leaves, _) = flatten(&Tree::Custom(CustomNode::new(layer))).unwrap();
/// assert_eq!(leaves.len(), 2);
/// ```
pub fn register_node<T, A>(
    flatten: impl Fn(&T) -> Result<(Vec<Tree>, A)> + Send + Sync + 'static,
    unflatten: impl Fn(&A, Vec<Tree>) -> Result<T> + Send + Sync + 'static,
) where
    T: Any + Send + Sync,
    A: Any + fmt::Debug + PartialEq + Send + Sync,
{
    let type_name = std::any::type_name::<T>();
    let entry = Entry {
        flatten: Box::new(move |node: &CustomNode| {
            let value = node
                .downcast_ref::<T>()
                .ok_or(StructureError::Expected {
                    expected: type_name,
                    found: node.type_name(),
                })?;
            let (children, aux) = flatten(value)?;
            Ok((children, AuxData(Arc::new(aux))))
        }),
        unflatten: Box::new(move |aux: &AuxData, children| {
            let aux = aux.downcast_ref::<A>().ok_or(StructureError::UnflattenFailed {
                type_name,
                reason: "auxiliary data has an unexpected type".to_string(),
            })?;
            unflatten(aux, children).map(CustomNode::new)
        }),
    };

    let previous = REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(TypeId::of::<T>(), Arc::new(entry));
    if previous.is_some() {
        log::debug!("re-registered pytree node `{type_name}`");
    } else {
        log::debug!("registered pytree node `{type_name}`");
    }
}

/// Whether `T` has been registered.
pub fn is_registered<T: Any>() -> bool {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&TypeId::of::<T>())
}

fn lookup(type_id: TypeId, type_name: &'static str) -> Result<Arc<Entry>> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&type_id)
        .cloned()
        .ok_or_else(|| StructureError::Unregistered { type_name }.into())
}

/// Split a custom node with its registered flatten function.
pub(crate) fn flatten_custom(node: &CustomNode) -> Result<(Vec<Tree>, AuxData)> {
    let entry = lookup(node.type_id(), node.type_name())?;
    (entry.flatten)(node)
}

/// Rebuild a custom node with its registered unflatten function.
pub(crate) fn unflatten_custom(
    type_id: TypeId,
    type_name: &'static str,
    aux: &AuxData,
    children: Vec<Tree>,
) -> Result<CustomNode> {
    let entry = lookup(type_id, type_name)?;
    (entry.unflatten)(aux, children)
}
