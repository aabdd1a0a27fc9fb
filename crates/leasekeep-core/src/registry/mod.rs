//! Model registry.
//!
//! The registry is the single source of truth for the order in which models
//! are created and deleted. It is computed once from the declared
//! foreign-key graph: every model appears after all models it references,
//! and the reverse of that order is the safe deletion order.

mod model;

use std::collections::HashMap;
use std::sync::OnceLock;

pub use model::{
    declared_models, ForeignKey, ModelDescriptor, ModelKind, UnknownModelName, DELETED_AT,
};

use crate::error::RegistryError;

/// Models in dependency order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    /// Descriptors in creation order.
    ordered: Vec<ModelDescriptor>,
    /// Position of each kind in `ordered`.
    positions: HashMap<ModelKind, usize>,
}

impl ModelRegistry {
    /// The registry for the application schema, computed on first use.
    pub fn global() -> &'static ModelRegistry {
        static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            // The declared graph is covered by tests; a failure here is a build defect.
            match ModelRegistry::from_descriptors(declared_models()) {
                Ok(registry) => registry,
                Err(e) => panic!("declared model graph is invalid: {e}"),
            }
        })
    }

    /// Build a registry by topologically sorting `descriptors`.
    ///
    /// Ties are broken by declaration order, so the same input always yields
    /// the same order.
    pub fn from_descriptors(descriptors: Vec<ModelDescriptor>) -> Result<Self, RegistryError> {
        let mut declared: HashMap<ModelKind, usize> = HashMap::with_capacity(descriptors.len());
        for (idx, desc) in descriptors.iter().enumerate() {
            if declared.insert(desc.kind, idx).is_some() {
                return Err(RegistryError::DuplicateModel(desc.kind));
            }
        }

        for desc in &descriptors {
            for dep in desc.dependencies() {
                if !declared.contains_key(&dep) {
                    return Err(RegistryError::UndeclaredDependency {
                        model: desc.kind,
                        references: dep,
                    });
                }
            }
        }

        let mut placed = vec![false; descriptors.len()];
        let mut order: Vec<usize> = Vec::with_capacity(descriptors.len());

        while order.len() < descriptors.len() {
            let next = descriptors.iter().enumerate().position(|(idx, desc)| {
                !placed[idx]
                    && desc
                        .dependencies()
                        .iter()
                        .all(|dep| placed[declared[dep]])
            });

            match next {
                Some(idx) => {
                    placed[idx] = true;
                    order.push(idx);
                }
                None => {
                    let stuck = descriptors
                        .iter()
                        .enumerate()
                        .filter(|(idx, _)| !placed[*idx])
                        .map(|(_, desc)| desc.kind)
                        .collect();
                    return Err(RegistryError::Cycle(stuck));
                }
            }
        }

        let mut slots: Vec<Option<ModelDescriptor>> = descriptors.into_iter().map(Some).collect();
        let ordered: Vec<ModelDescriptor> = order
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();
        let positions = ordered
            .iter()
            .enumerate()
            .map(|(pos, desc)| (desc.kind, pos))
            .collect();

        Ok(Self { ordered, positions })
    }

    /// Descriptors in creation order (parents before children).
    pub fn ordered(&self) -> &[ModelDescriptor] {
        &self.ordered
    }

    /// Descriptors in deletion order (children before parents).
    pub fn reverse(&self) -> impl Iterator<Item = &ModelDescriptor> + '_ {
        self.ordered.iter().rev()
    }

    /// Kinds in creation order.
    pub fn kinds(&self) -> Vec<ModelKind> {
        self.ordered.iter().map(|d| d.kind).collect()
    }

    /// Kinds in deletion order.
    pub fn reverse_kinds(&self) -> Vec<ModelKind> {
        self.reverse().map(|d| d.kind).collect()
    }

    /// Descriptor for a kind, if registered.
    pub fn descriptor(&self, kind: ModelKind) -> Option<&ModelDescriptor> {
        self.positions.get(&kind).map(|&pos| &self.ordered[pos])
    }

    /// Position of a kind in creation order.
    pub fn position(&self, kind: ModelKind) -> Option<usize> {
        self.positions.get(&kind).copied()
    }

    /// Whether a kind is registered.
    pub fn contains(&self, kind: ModelKind) -> bool {
        self.positions.contains_key(&kind)
    }

    /// Models that hold a foreign key to `parent`.
    pub fn dependents(&self, parent: ModelKind) -> impl Iterator<Item = &ModelDescriptor> + '_ {
        self.ordered
            .iter()
            .filter(move |desc| desc.depends_on(parent))
    }

    /// Sort registered kinds into creation order, dropping unregistered ones.
    pub fn sort_forward(&self, kinds: &[ModelKind]) -> Vec<ModelKind> {
        let mut sorted: Vec<ModelKind> = kinds
            .iter()
            .copied()
            .filter(|kind| self.contains(*kind))
            .collect();
        sorted.sort_by_key(|kind| self.positions[kind]);
        sorted.dedup();
        sorted
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
