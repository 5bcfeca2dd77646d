//! Role-tag lookup of existing instances

use crate::error::Result;
use crate::model::{LifecycleState, ManagedResource};
use crate::provider::ComputeProvider;
use std::sync::Arc;

/// Finds live instances by role tag. Read-only.
#[derive(Clone)]
pub struct ResourceLocator {
    provider: Arc<dyn ComputeProvider>,
}

impl ResourceLocator {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self { provider }
    }

    /// Every pending, running or stopped instance carrying `role`.
    pub async fn find_all(&self, role: &str) -> Result<Vec<ManagedResource>> {
        self.find_all_states(role, &LifecycleState::LIVE).await
    }

    /// Every instance carrying `role` whose state is in `states`.
    pub async fn find_all_states(
        &self,
        role: &str,
        states: &[LifecycleState],
    ) -> Result<Vec<ManagedResource>> {
        let mut found = self.provider.find_instances(role, states).await?;
        found.retain(|r| states.contains(&r.state));
        for resource in &mut found {
            resource.role = role.to_string();
        }
        Ok(found)
    }

    /// First live instance carrying `role`.
    ///
    /// More than one match means two runs raced or someone launched an
    /// instance by hand. The first match in provider order wins and every id
    /// is logged; teardown uses [`find_all_states`](Self::find_all_states) so
    /// duplicates can still be cleaned up.
    pub async fn find(&self, role: &str) -> Result<Option<ManagedResource>> {
        let mut found = self.find_all(role).await?;
        if found.len() > 1 {
            let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
            tracing::warn!(
                role,
                ids = ?ids,
                "multiple instances share a role tag; using the first"
            );
        }
        if found.is_empty() {
            tracing::debug!(role, "no live instance");
            return Ok(None);
        }
        let first = found.swap_remove(0);
        tracing::debug!(role, instance_id = %first.id, state = %first.state, "located instance");
        Ok(Some(first))
    }
}
