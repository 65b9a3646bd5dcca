// ABOUTME: Container stats: one engine metrics sample decoded into usage figures.
// ABOUTME: Anything but exactly one sample for the container is a shape error.

use super::error::{DecodeMetricsSnafu, RuntimeSnafu, ServiceError, UnexpectedShapeSnafu};
use super::{ContainerAttributes, ContainerStats, CpuUsage, MemoryUsage, RuntimeService};
use crate::runtime::{MetricsFilter, TaskMetrics};
use crate::store::Metadata;
use crate::types::ContainerId;
use serde::Deserialize;
use snafu::ResultExt;

/// Cgroup shaped metrics document reported by the engine.
#[derive(Debug, Deserialize)]
struct CgroupMetrics {
    #[serde(default)]
    cpu: Option<CpuMetrics>,
    #[serde(default)]
    memory: Option<MemoryMetrics>,
}

#[derive(Debug, Deserialize)]
struct CpuMetrics {
    usage: CpuUsageMetrics,
}

#[derive(Debug, Deserialize)]
struct CpuUsageMetrics {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct MemoryMetrics {
    usage: MemoryUsageMetrics,
    #[serde(default)]
    total_inactive_file: u64,
}

#[derive(Debug, Deserialize)]
struct MemoryUsageMetrics {
    usage: u64,
}

impl RuntimeService {
    /// Current resource usage of a container.
    pub async fn container_stats(&self, id: &ContainerId) -> Result<ContainerStats, ServiceError> {
        let container = self.container(id)?;
        let mut samples = self
            .engine
            .metrics(&MetricsFilter::id(id.as_str()))
            .await
            .context(RuntimeSnafu {
                id: id.as_str(),
                op: "fetch metrics of",
            })?;
        let count = samples.len();
        let sample = match samples.pop() {
            Some(sample) if count == 1 => sample,
            _ => {
                return UnexpectedShapeSnafu {
                    id: id.as_str(),
                    what: "metrics response",
                    detail: format!("expected 1 sample, got {count}"),
                }
                .fail();
            }
        };
        decode_stats(&container.metadata, sample)
    }
}

fn decode_stats(meta: &Metadata, sample: TaskMetrics) -> Result<ContainerStats, ServiceError> {
    let metrics: CgroupMetrics =
        serde_json::from_value(sample.data).context(DecodeMetricsSnafu {
            id: meta.id.as_str(),
        })?;
    let timestamp = sample.timestamp.timestamp_nanos_opt().unwrap_or_default();

    Ok(ContainerStats {
        attributes: ContainerAttributes {
            id: meta.id.clone(),
            metadata: meta.container.clone(),
            labels: meta.labels.clone(),
            annotations: meta.annotations.clone(),
        },
        cpu: metrics.cpu.map(|cpu| CpuUsage {
            timestamp,
            usage_core_nano_seconds: cpu.usage.total,
        }),
        memory: metrics.memory.map(|memory| MemoryUsage {
            timestamp,
            working_set_bytes: memory.usage.usage.saturating_sub(memory.total_inactive_file),
        }),
    })
}
