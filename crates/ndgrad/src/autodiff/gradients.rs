//! Gradient storage container.

use std::collections::HashMap;

use super::graph::NodeId;
use super::tensor::Tracked;
use crate::error::Result;

/// Container for accumulated gradients of one reverse pass.
///
/// Stores gradients keyed by NodeId. A missing entry means zero; when
/// several consumers route gradient to the same node the contributions are
/// summed with the traced `add`, so accumulation is differentiable too.
#[derive(Debug, Default)]
pub struct Gradients {
    grads: HashMap<NodeId, Tracked>,
}

impl Gradients {
    /// Create empty gradient container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate gradient for a node.
    ///
    /// If gradient already exists, adds to it (for multiple paths).
    pub fn accumulate(&mut self, id: NodeId, grad: Tracked) -> Result<()> {
        let summed = match self.grads.remove(&id) {
            Some(existing) => existing.try_add(&grad)?,
            None => grad,
        };
        self.grads.insert(id, summed);
        Ok(())
    }

    /// Get gradient for a node.
    pub fn get(&self, id: NodeId) -> Option<&Tracked> {
        self.grads.get(&id)
    }

    /// Remove and return gradient (for passing to backward functions).
    pub fn remove(&mut self, id: NodeId) -> Option<Tracked> {
        self.grads.remove(&id)
    }

    /// Check if gradient exists for node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.grads.contains_key(&id)
    }

    /// Number of stored gradients.
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    /// Check if no gradients stored.
    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array;

    #[test]
    fn test_gradients_accumulate_single() {
        let mut grads = Gradients::new();
        let id = NodeId::new_for_test(0);

        grads.accumulate(id, Tracked::new(array([1.0, 2.0, 3.0]))).unwrap();

        assert!(grads.contains(id));
        assert_eq!(grads.get(id).unwrap().data(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_gradients_accumulate_multiple() {
        let mut grads = Gradients::new();
        let id = NodeId::new_for_test(0);

        grads.accumulate(id, Tracked::new(array([1.0, 2.0, 3.0]))).unwrap();
        grads.accumulate(id, Tracked::new(array([4.0, 5.0, 6.0]))).unwrap();

        assert_eq!(grads.len(), 1);
        assert_eq!(grads.get(id).unwrap().data(), &[5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_gradients_remove() {
        let mut grads = Gradients::new();
        let id = NodeId::new_for_test(0);

        grads.accumulate(id, Tracked::scalar(1.0)).unwrap();
        assert!(grads.remove(id).is_some());
        assert!(!grads.contains(id));
        assert!(grads.is_empty());
    }
}
