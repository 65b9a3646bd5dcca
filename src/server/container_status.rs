// ABOUTME: Read-only container views: status of one container and filtered listing.

use super::error::ServiceError;
use super::{ContainerFilter, ContainerStatusView, RuntimeService};
use crate::types::ContainerId;

impl RuntimeService {
    pub fn container_status(&self, id: &ContainerId) -> Result<ContainerStatusView, ServiceError> {
        let container = self.container(id)?;
        Ok(ContainerStatusView::of(&container))
    }

    /// Containers matching `filter`, oldest first.
    pub fn list_containers(&self, filter: &ContainerFilter) -> Vec<ContainerStatusView> {
        let mut views: Vec<_> = self
            .containers
            .list()
            .iter()
            .map(|c| ContainerStatusView::of(c))
            .filter(|view| filter.matches(view))
            .collect();
        views.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        views
    }
}
