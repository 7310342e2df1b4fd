//! Reads a device's object list and the descriptive properties of every
//! object into an [`ObjectRepository`].

use crate::discovery::DeviceHandle;
use crate::engine::{read_property, ProtocolEngine};
use crate::repository::{DiscoveredPoint, ObjectRepository};
use crate::ClientError;
use bacwatch_core::{engineering_units_name, DataValue, DeviceAddress, ObjectId, PropertyId};
use core::fmt;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Counts from one enumeration pass.
///
/// `succeeded + failed` is the number of points written to the repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnumerationReport {
    /// Entries in the device's object list.
    pub listed: usize,
    /// Points recorded with every property read answered.
    pub succeeded: usize,
    /// Points recorded with at least one property missing.
    pub failed: usize,
    /// Individual property reads that failed or timed out.
    pub property_failures: usize,
    /// The overall deadline cut the pass short.
    pub timed_out: bool,
}

impl EnumerationReport {
    pub fn recorded(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl fmt::Display for EnumerationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} listed, {} complete, {} partial, {} failed reads",
            self.listed, self.succeeded, self.failed, self.property_failures
        )?;
        if self.timed_out {
            f.write_str(", timed out")?;
        }
        Ok(())
    }
}

struct PointRead {
    point: DiscoveredPoint,
    failures: usize,
}

pub struct ObjectEnumerator<E: ProtocolEngine> {
    engine: Arc<E>,
    request_timeout: Duration,
    max_concurrent: usize,
}

impl<E: ProtocolEngine> ObjectEnumerator<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            request_timeout: Duration::from_secs(3),
            max_concurrent: 8,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Points read in parallel. Clamped to at least one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Populates `repository` with every object the device lists.
    ///
    /// Only the object-list read can fail the pass. Failed property reads
    /// leave that field empty and are counted; the point is still recorded.
    /// When `overall_timeout` fires, points still being read are dropped and
    /// the report is returned with `timed_out` set.
    pub async fn enumerate(
        &self,
        device: &DeviceHandle,
        repository: &ObjectRepository,
        overall_timeout: Duration,
    ) -> Result<EnumerationReport, ClientError> {
        let deadline = Instant::now() + overall_timeout;
        let device_id = device.device_id();

        // The list read shares the overall budget with the point reads.
        let list_wait = self
            .request_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let list = read_property(
            self.engine.as_ref(),
            device.address,
            device_id,
            PropertyId::ObjectList,
            list_wait,
        )
        .await?;
        let object_ids = list.object_ids().ok_or(ClientError::UnexpectedValue {
            object_id: device_id,
            property: PropertyId::ObjectList,
        })?;
        log::info!("{device} lists {} objects", object_ids.len());

        let mut report = EnumerationReport {
            listed: object_ids.len(),
            ..EnumerationReport::default()
        };
        let address = device.address;
        let mut reads = stream::iter(object_ids)
            .map(|object_id| self.read_point(address, object_id))
            .buffer_unordered(self.max_concurrent);

        loop {
            match timeout_at(deadline, reads.next()).await {
                Ok(Some(read)) => {
                    if read.failures == 0 {
                        report.succeeded += 1;
                    } else {
                        report.failed += 1;
                        report.property_failures += read.failures;
                    }
                    repository.upsert(read.point);
                }
                Ok(None) => break,
                Err(_) => {
                    report.timed_out = true;
                    log::warn!(
                        "enumeration of {device} hit its {overall_timeout:?} limit after {} of {} objects",
                        report.recorded(),
                        report.listed
                    );
                    break;
                }
            }
        }

        log::info!("enumeration of {device}: {report}");
        Ok(report)
    }

    async fn read_point(&self, address: DeviceAddress, object_id: ObjectId) -> PointRead {
        let (name, description, present_value, units) = tokio::join!(
            self.read(address, object_id, PropertyId::ObjectName),
            self.read(address, object_id, PropertyId::Description),
            self.read(address, object_id, PropertyId::PresentValue),
            self.read(address, object_id, PropertyId::Units),
        );

        let mut failures = 0;
        let point = DiscoveredPoint::with_properties(
            object_id,
            absorb(name, &mut failures).map(into_text),
            absorb(description, &mut failures).map(into_text),
            absorb(present_value, &mut failures),
            absorb(units, &mut failures).map(units_text),
        );
        PointRead { point, failures }
    }

    async fn read(
        &self,
        address: DeviceAddress,
        object_id: ObjectId,
        property: PropertyId,
    ) -> Result<DataValue, ClientError> {
        read_property(
            self.engine.as_ref(),
            address,
            object_id,
            property,
            self.request_timeout,
        )
        .await
        .map_err(|source| ClientError::PropertyRead {
            object_id,
            property,
            source: Box::new(source),
        })
    }
}

fn absorb(result: Result<DataValue, ClientError>, failures: &mut usize) -> Option<DataValue> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            *failures += 1;
            log::debug!("{err}");
            None
        }
    }
}

fn into_text(value: DataValue) -> String {
    match value {
        DataValue::CharacterString(s) => s,
        other => other.to_string(),
    }
}

/// Units as text: strings verbatim, enumerations by engineering-units name.
pub fn units_text(value: DataValue) -> String {
    match value {
        DataValue::CharacterString(s) => s,
        DataValue::Enumerated(code) | DataValue::Unsigned(code) => engineering_units_name(code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("units-{code}")),
        other => other.to_string(),
    }
}
