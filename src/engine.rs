// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! High-level engine API
//!
//! [`MetricsEngine`] ties a configuration, a report store and the entity
//! registry together and exposes every aggregation and report by entity id.
//!
//! # Example
//!
//! ```rust
//! use tally::{Entity, EntityRegistry, FileStore, MetricConfig, MetricFamily, MetricsEngine};
//! use chrono::NaiveDate;
//!
//! let registry = EntityRegistry::new(vec![Entity::camera("1"), Entity::camera("2")]);
//! let store = FileStore::new("/var/lib/tally");
//! let engine = MetricsEngine::new(MetricConfig::default(), store, registry).unwrap();
//!
//! let date = NaiveDate::from_ymd_opt(2020, 9, 19).unwrap();
//! let report = engine
//!     .hourly_report(MetricFamily::SocialDistancing, &["ALL"], date)
//!     .unwrap();
//! assert_eq!(report.hours.len(), 24);
//! ```

use crate::config::MetricConfig;
use crate::daily::{self, DailyOutcome};
use crate::entity::{Entity, EntityKind, EntityRegistry};
use crate::error::{Result, TallyError};
use crate::family::MetricFamily;
use crate::heatmap::{self, HeatmapKind};
use crate::hourly::{self, HourlyOutcome};
use crate::live;
use crate::report::{DailyReport, HeatmapReport, HourlyReport, LiveReport, WeeklyReport};
use crate::store::ReportStore;
use crate::weekly::{self, WeeklyRange};
use chrono::{NaiveDate, NaiveDateTime};

/// Aggregation and reporting façade over one store.
pub struct MetricsEngine<S: ReportStore> {
    config: MetricConfig,
    store: S,
    registry: EntityRegistry,
}

impl<S: ReportStore> MetricsEngine<S> {
    /// Create an engine. The configuration is validated first.
    pub fn new(config: MetricConfig, store: S, registry: EntityRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            registry,
        })
    }

    pub fn config(&self) -> &MetricConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Register an entity after construction.
    pub fn add_entity(&mut self, entity: Entity) {
        self.registry.add(entity);
    }

    /// Look up the entity `id` of the kind `family` is computed for.
    pub fn entity(&self, family: MetricFamily, id: &str) -> Result<&Entity> {
        self.entity_of_kind(family.entity_kind(), id)
    }

    fn entity_of_kind(&self, kind: EntityKind, id: &str) -> Result<&Entity> {
        self.registry
            .get(kind, id)
            .ok_or_else(|| TallyError::UnknownEntity(id.to_string()))
    }

    /// Resolve a request's entity ids (`ALL`, duplicates, unknown ids).
    pub fn select<T: AsRef<str>>(&self, family: MetricFamily, ids: &[T]) -> Result<Vec<&Entity>> {
        self.registry.select(family.entity_kind(), ids)
    }

    /// Every entity `family` runs on.
    pub fn entities(&self, family: MetricFamily) -> impl Iterator<Item = &Entity> {
        self.registry.of_kind(family.entity_kind())
    }

    pub fn compute_hourly(
        &self,
        family: MetricFamily,
        entity_id: &str,
        now: NaiveDateTime,
    ) -> Result<HourlyOutcome> {
        let entity = self.entity(family, entity_id)?;
        hourly::compute_hourly(&self.store, &self.config, family, entity, now)
    }

    pub fn compute_daily(
        &self,
        family: MetricFamily,
        entity_id: &str,
        today: NaiveDate,
    ) -> Result<DailyOutcome> {
        let entity = self.entity(family, entity_id)?;
        daily::compute_daily(&self.store, &self.config, family, entity, today)
    }

    pub fn compute_live(&self, family: MetricFamily, entity_id: &str, now: NaiveDateTime) -> Result<bool> {
        let entity = self.entity(family, entity_id)?;
        live::compute_live(&self.store, &self.config, family, entity, now)
    }

    pub fn hourly_report<T: AsRef<str>>(
        &self,
        family: MetricFamily,
        ids: &[T],
        date: NaiveDate,
    ) -> Result<HourlyReport> {
        let entities = self.select(family, ids)?;
        hourly::hourly_report(&self.store, family, &entities, date)
    }

    pub fn daily_report<T: AsRef<str>>(
        &self,
        family: MetricFamily,
        ids: &[T],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<DailyReport> {
        let entities = self.select(family, ids)?;
        daily::daily_report(&self.store, family, &entities, from, to)
    }

    pub fn weekly_report<T: AsRef<str>>(
        &self,
        family: MetricFamily,
        ids: &[T],
        range: WeeklyRange,
        today: NaiveDate,
    ) -> Result<WeeklyReport> {
        let entities = self.select(family, ids)?;
        weekly::weekly_report(&self.store, family, &entities, range, today)
    }

    pub fn live_report<T: AsRef<str>>(&self, family: MetricFamily, ids: &[T]) -> Result<LiveReport> {
        let entities = self.select(family, ids)?;
        live::live_report(&self.store, &self.config, family, &entities)
    }

    /// Summed heatmap of one camera over `[from, to]`.
    pub fn heatmap(
        &self,
        camera_id: &str,
        kind: HeatmapKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HeatmapReport> {
        let camera = self.entity_of_kind(EntityKind::Camera, camera_id)?;
        heatmap::heatmap(&self.store, &self.config.heatmap, camera, kind, from, to)
    }
}
