//! In-memory store of the points discovered on a device.
//!
//! The enumerator and the notification dispatcher write; everything else
//! reads. One `RwLock` guards the whole map, so every query below works on a
//! single consistent view even while upserts are in flight.

use crate::point::supports_cov;
use bacwatch_core::{DataValue, ObjectId, ObjectType};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

/// A point known to exist on the target device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredPoint {
    object_id: ObjectId,
    name: Option<String>,
    description: Option<String>,
    present_value: Option<DataValue>,
    units: Option<String>,
    cov_supported: bool,
    last_updated: SystemTime,
}

impl DiscoveredPoint {
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            name: None,
            description: None,
            present_value: None,
            units: None,
            cov_supported: supports_cov(object_id.object_type()),
            last_updated: SystemTime::now(),
        }
    }

    /// A point carrying everything one enumeration pass read for it.
    pub fn with_properties(
        object_id: ObjectId,
        name: Option<String>,
        description: Option<String>,
        present_value: Option<DataValue>,
        units: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            present_value,
            units,
            ..Self::new(object_id)
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_id.object_type()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn present_value(&self) -> Option<&DataValue> {
        self.present_value.as_ref()
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn cov_supported(&self) -> bool {
        self.cov_supported
    }

    pub fn last_updated(&self) -> SystemTime {
        self.last_updated
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
        self.touch();
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
        self.touch();
    }

    pub fn set_present_value(&mut self, value: Option<DataValue>) {
        self.present_value = value;
        self.touch();
    }

    pub fn set_units(&mut self, units: Option<String>) {
        self.units = units;
        self.touch();
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.set_name(Some(name.into()));
        self
    }

    pub fn with_present_value(mut self, value: DataValue) -> Self {
        self.set_present_value(Some(value));
        self
    }

    /// Wall clocks can step backwards; the timestamp never does.
    fn touch(&mut self) {
        self.last_updated = SystemTime::now().max(self.last_updated);
    }
}

/// Point counts at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RepositoryStatistics {
    pub total: usize,
    pub cov_supported: usize,
    /// Count per object type, largest first.
    pub by_type: Vec<(ObjectType, usize)>,
}

impl RepositoryStatistics {
    pub fn count_for(&self, object_type: ObjectType) -> usize {
        self.by_type
            .iter()
            .find(|(t, _)| *t == object_type)
            .map_or(0, |(_, n)| *n)
    }
}

#[derive(Debug, Default)]
pub struct ObjectRepository {
    objects: RwLock<HashMap<ObjectId, DiscoveredPoint>>,
}

impl ObjectRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or wholly replaces the record for `point.object_id()`.
    ///
    /// `last_updated` is set to now regardless of whether anything visible
    /// changed, and never moves behind the previous record's timestamp.
    pub fn upsert(&self, mut point: DiscoveredPoint) {
        let mut objects = self.write();
        let now = SystemTime::now();
        point.last_updated = match objects.get(&point.object_id) {
            Some(existing) => now.max(existing.last_updated),
            None => now,
        };
        log::trace!("upsert {}", point.object_id);
        objects.insert(point.object_id, point);
    }

    /// Replaces the present value of a known point under a single write lock.
    ///
    /// Returns the new `last_updated`, or `None` when the point is unknown;
    /// unknown points are not created.
    pub fn update_present_value(&self, object_id: ObjectId, value: DataValue) -> Option<SystemTime> {
        let mut objects = self.write();
        let point = objects.get_mut(&object_id)?;
        point.set_present_value(Some(value));
        Some(point.last_updated)
    }

    pub fn get(&self, object_id: ObjectId) -> Option<DiscoveredPoint> {
        self.read().get(&object_id).cloned()
    }

    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.read().contains_key(&object_id)
    }

    pub fn list_by_type(&self, object_type: ObjectType) -> Vec<DiscoveredPoint> {
        self.collect(|p| p.object_type() == object_type)
    }

    /// Points whose name contains `fragment`, ignoring case. Unnamed points
    /// never match.
    pub fn list_by_name_containing(&self, fragment: &str) -> Vec<DiscoveredPoint> {
        let needle = fragment.to_lowercase();
        self.collect(|p| {
            p.name()
                .is_some_and(|name| name.to_lowercase().contains(&needle))
        })
    }

    pub fn list_cov_supported(&self) -> Vec<DiscoveredPoint> {
        self.collect(DiscoveredPoint::cov_supported)
    }

    /// Every point, ordered by object identifier.
    pub fn snapshot(&self) -> Vec<DiscoveredPoint> {
        self.collect(|_| true)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
        log::info!("repository cleared");
    }

    pub fn statistics(&self) -> RepositoryStatistics {
        let objects = self.read();
        let mut counts: HashMap<ObjectType, usize> = HashMap::new();
        let mut cov_supported = 0;
        for point in objects.values() {
            *counts.entry(point.object_type()).or_default() += 1;
            if point.cov_supported {
                cov_supported += 1;
            }
        }
        let total = objects.len();
        drop(objects);

        let mut by_type: Vec<_> = counts.into_iter().collect();
        by_type.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        RepositoryStatistics {
            total,
            cov_supported,
            by_type,
        }
    }

    pub fn log_statistics(&self) {
        let stats = self.statistics();
        log::info!("repository holds {} objects", stats.total);
        for (object_type, count) in &stats.by_type {
            log::info!("  {object_type}: {count}");
        }
        log::info!("COV supported objects: {}", stats.cov_supported);
    }

    fn collect(&self, keep: impl Fn(&DiscoveredPoint) -> bool) -> Vec<DiscoveredPoint> {
        let mut points: Vec<_> = self.read().values().filter(|p| keep(p)).cloned().collect();
        points.sort_by_key(DiscoveredPoint::object_id);
        points
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ObjectId, DiscoveredPoint>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ObjectId, DiscoveredPoint>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}
