// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Monitored entities (cameras and areas) and request-time selection.

use crate::error::{Result, TallyError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Keyword selecting every entity of a kind.
pub const ALL_ENTITIES: &str = "ALL";

/// Kind of monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Camera,
    Area,
}

impl EntityKind {
    /// Directory grouping entities of this kind under the store root.
    pub fn dir_name(self) -> &'static str {
        match self {
            EntityKind::Camera => "cameras",
            EntityKind::Area => "areas",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Camera => f.write_str("camera"),
            EntityKind::Area => f.write_str("area"),
        }
    }
}

/// Directed line segment used for in/out counting, in normalized frame
/// coordinates `(x, y)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub name: String,
    pub start: (f64, f64),
    pub end: (f64, f64),
}

impl Boundary {
    pub fn new(name: &str, start: (f64, f64), end: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }
}

/// A camera or an area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    /// Capacity of an area, reported as `OccupancyThreshold`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupancy_threshold: Option<f64>,
    /// In/out counting lines of a camera.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boundaries: Vec<Boundary>,
}

impl Entity {
    pub fn camera(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: EntityKind::Camera,
            occupancy_threshold: None,
            boundaries: Vec::new(),
        }
    }

    pub fn area(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: EntityKind::Area,
            occupancy_threshold: None,
            boundaries: Vec::new(),
        }
    }

    pub fn with_occupancy_threshold(mut self, threshold: f64) -> Self {
        self.occupancy_threshold = Some(threshold);
        self
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundaries.push(boundary);
        self
    }
}

/// Known entities.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
}

impl EntityRegistry {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    pub fn add(&mut self, entity: Entity) {
        self.entities.push(entity);
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.kind == kind && e.id == id)
    }

    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Resolve requested ids into a deduplicated entity list.
    ///
    /// An empty request or `ALL` (any case) selects every entity of `kind`;
    /// `ALL` may be mixed with explicit ids. Unknown ids are rejected.
    pub fn select<S: AsRef<str>>(&self, kind: EntityKind, requested: &[S]) -> Result<Vec<&Entity>> {
        let wants_all = requested.is_empty()
            || requested
                .iter()
                .any(|id| id.as_ref().trim().eq_ignore_ascii_case(ALL_ENTITIES));
        if wants_all {
            for id in requested {
                let id = id.as_ref().trim();
                if !id.eq_ignore_ascii_case(ALL_ENTITIES) && self.get(kind, id).is_none() {
                    return Err(TallyError::UnknownEntity(id.to_string()));
                }
            }
            return Ok(self.of_kind(kind).collect());
        }

        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for id in requested {
            let id = id.as_ref().trim();
            let entity = self
                .get(kind, id)
                .ok_or_else(|| TallyError::UnknownEntity(id.to_string()))?;
            if seen.insert(entity.id.as_str()) {
                selected.push(entity);
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(vec![
            Entity::area("5"),
            Entity::area("6"),
            Entity::area("7"),
            Entity::camera("cam-1"),
        ])
    }

    fn ids(entities: &[&Entity]) -> Vec<String> {
        entities.iter().map(|e| e.id.clone()).collect()
    }

    #[test]
    fn test_empty_selects_all_of_kind() {
        let registry = registry();
        let empty: [&str; 0] = [];
        let selected = registry.select(EntityKind::Area, &empty).unwrap();
        assert_eq!(ids(&selected), vec!["5", "6", "7"]);
    }

    #[test]
    fn test_all_mixed_with_ids_dedupes() {
        let registry = registry();
        let all = registry.select(EntityKind::Area, &["all"]).unwrap();
        let mixed = registry.select(EntityKind::Area, &["5", "ALL"]).unwrap();
        assert_eq!(ids(&all), ids(&mixed));
    }

    #[test]
    fn test_duplicates_removed() {
        let registry = registry();
        let selected = registry.select(EntityKind::Area, &["6", "5", "6"]).unwrap();
        assert_eq!(ids(&selected), vec!["6", "5"]);
    }

    #[test]
    fn test_unknown_entity() {
        let registry = registry();
        let err = registry.select(EntityKind::Area, &["cam-1"]).unwrap_err();
        assert!(matches!(err, TallyError::UnknownEntity(id) if id == "cam-1"));
        assert!(registry.select(EntityKind::Area, &["ALL", "9"]).is_err());
    }
}
