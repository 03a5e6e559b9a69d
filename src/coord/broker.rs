//! `CoordinateBroker`: an ordered, deduplicated layout of coordinate
//! subsets inside a flat vector (C1).

use nalgebra::DVector;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::AstrodyneError;

use super::subset::CoordinateSubset;

#[derive(Clone, Debug, Default)]
pub struct CoordinateBroker {
    subsets: Vec<Arc<dyn CoordinateSubset>>,
    offsets: HashMap<&'static str, usize>,
    total_size: usize,
}

impl CoordinateBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subsets(
        subsets: impl IntoIterator<Item = Arc<dyn CoordinateSubset>>,
    ) -> Result<Self, AstrodyneError> {
        let mut broker = Self::new();
        for s in subsets {
            broker.add(s)?;
        }
        Ok(broker)
    }

    /// Adds a subset, returning its offset. Idempotent: re-adding a subset
    /// with the same name returns the existing offset. A different subset
    /// claiming the same name (different size) is rejected.
    pub fn add(&mut self, subset: Arc<dyn CoordinateSubset>) -> Result<usize, AstrodyneError> {
        let name = subset.name();
        if let Some(&offset) = self.offsets.get(name) {
            if self.subset_by_name(name).map(|s| s.size()) != Some(subset.size()) {
                return Err(AstrodyneError::ConflictingSubset(name.to_string()));
            }
            return Ok(offset);
        }
        let offset = self.total_size;
        self.offsets.insert(name, offset);
        self.total_size += subset.size();
        self.subsets.push(subset);
        Ok(offset)
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.offsets.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.offsets.contains_key(name)
    }

    pub fn subset_by_name(&self, name: &str) -> Option<&Arc<dyn CoordinateSubset>> {
        self.subsets.iter().find(|s| s.name() == name)
    }

    pub fn subsets(&self) -> &[Arc<dyn CoordinateSubset>] {
        &self.subsets
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn zero(&self) -> DVector<f64> {
        let mut v = DVector::zeros(self.total_size);
        for subset in &self.subsets {
            let offset = self.offsets[subset.name()];
            for (i, value) in subset.default_value().into_iter().enumerate() {
                v[offset + i] = value;
            }
        }
        v
    }

    /// Copies the contiguous window `[offset, offset+size)` belonging to `subset`.
    pub fn extract(&self, full: &DVector<f64>, subset: &dyn CoordinateSubset) -> Result<Vec<f64>, AstrodyneError> {
        self.extract_by_name(full, subset.name())
    }

    pub fn extract_by_name(&self, full: &DVector<f64>, name: &'static str) -> Result<Vec<f64>, AstrodyneError> {
        let offset = self
            .offsets
            .get(name)
            .ok_or_else(|| AstrodyneError::MissingSubset(name.to_string()))?;
        let size = self.subset_by_name(name).unwrap().size();
        if full.len() < offset + size {
            return Err(AstrodyneError::SizeMismatch {
                expected: offset + size,
                got: full.len(),
            });
        }
        Ok(full.rows(*offset, size).iter().copied().collect())
    }

    /// Validates that every entry in `names` is present in this broker.
    pub fn require(&self, names: &[&'static str]) -> Result<(), AstrodyneError> {
        for name in names {
            if !self.contains(name) {
                return Err(AstrodyneError::MissingSubset(name.to_string()));
            }
        }
        Ok(())
    }
}

impl PartialEq for CoordinateBroker {
    /// Structural identity: same subsets, in the same order.
    fn eq(&self, other: &Self) -> bool {
        self.subsets.len() == other.subsets.len()
            && self
                .subsets
                .iter()
                .zip(other.subsets.iter())
                .all(|(a, b)| a.name() == b.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::subset::{CARTESIAN_POSITION, CARTESIAN_VELOCITY, MASS};

    #[test]
    fn add_is_idempotent() {
        let mut broker = CoordinateBroker::new();
        let o1 = broker.add(CARTESIAN_POSITION.clone()).unwrap();
        let o2 = broker.add(CARTESIAN_POSITION.clone()).unwrap();
        assert_eq!(o1, o2);
        assert_eq!(broker.total_size(), 3);
    }

    #[test]
    fn offsets_are_contiguous() {
        let mut broker = CoordinateBroker::new();
        broker.add(CARTESIAN_POSITION.clone()).unwrap();
        broker.add(CARTESIAN_VELOCITY.clone()).unwrap();
        broker.add(MASS.clone()).unwrap();
        assert_eq!(broker.offset_of("cartesian_position"), Some(0));
        assert_eq!(broker.offset_of("cartesian_velocity"), Some(3));
        assert_eq!(broker.offset_of("mass"), Some(6));
        assert_eq!(broker.total_size(), 7);
    }

    #[test]
    fn zero_matches_default_values() {
        let mut broker = CoordinateBroker::new();
        broker.add(CARTESIAN_POSITION.clone()).unwrap();
        broker.add(MASS.clone()).unwrap();
        let z = broker.zero();
        let extracted = broker.extract_by_name(&z, "cartesian_position").unwrap();
        assert_eq!(extracted, vec![0.0, 0.0, 0.0]);
    }
}
