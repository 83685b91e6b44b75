//! Inventory reconciliation.
//!
//! One pass over a site: resolve scanned payloads, partition the site's tools
//! into found and missing, write `present`/`lost` per tool, then record the
//! inventory check. Status writes are independent and idempotent, so a failed
//! pass can simply be run again.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use tool_store::{
    InventoryCheck, InventoryCheckStorage, NewInventoryCheck, SiteId, Tool, ToolId, ToolStatus,
    UserId, UserStorage,
};
use tracing::{debug, info, warn};

use crate::{
    error::{InventoryError, InventoryResult},
    onboarding::display_name,
    qr::QrDecoder,
    registry::ToolRegistry,
    report::InventoryReport,
};

/// Found/missing split of the tools at one site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub found: Vec<Tool>,
    pub missing: Vec<Tool>,
}

impl Partition {
    /// Split `at_site` by membership in `found`, keeping site order
    pub fn split(at_site: Vec<Tool>, found: &[Tool]) -> Self {
        let found_ids: HashSet<ToolId> = found.iter().map(|t| t.id).collect();
        let (found, missing) = at_site
            .into_iter()
            .partition(|tool| found_ids.contains(&tool.id));
        Self { found, missing }
    }

    pub fn total(&self) -> usize {
        self.found.len() + self.missing.len()
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub check: InventoryCheck,
    pub report: InventoryReport,
    /// Photos whose decode produced no payloads or failed
    pub empty_photos: usize,
}

#[derive(Clone)]
pub struct InventoryReconciler {
    registry: ToolRegistry,
    users: Arc<dyn UserStorage>,
    checks: Arc<dyn InventoryCheckStorage>,
}

impl InventoryReconciler {
    pub fn new(
        registry: ToolRegistry,
        users: Arc<dyn UserStorage>,
        checks: Arc<dyn InventoryCheckStorage>,
    ) -> Self {
        Self {
            registry,
            users,
            checks,
        }
    }

    /// Decode every photo and reconcile on the combined payloads.
    /// Photos that decode to nothing, or fail to decode, contribute nothing.
    pub async fn reconcile_photos(
        &self,
        site: SiteId,
        user: UserId,
        photos: &[Vec<u8>],
        decoder: &dyn QrDecoder,
    ) -> InventoryResult<ReconcileOutcome> {
        let mut payloads = Vec::new();
        let mut empty_photos = 0;
        for (index, photo) in photos.iter().enumerate() {
            match decoder.decode(photo) {
                Ok(codes) if !codes.is_empty() => payloads.extend(codes),
                Ok(_) => {
                    debug!(photo = index, "Photo yielded no QR codes");
                    empty_photos += 1;
                }
                Err(e) => {
                    debug!(photo = index, error = %e, "Photo could not be decoded");
                    empty_photos += 1;
                }
            }
        }

        let mut outcome = self.reconcile(site, user, payloads).await?;
        outcome.empty_photos = empty_photos;
        Ok(outcome)
    }

    /// Reconcile `site` against already-decoded payloads
    pub async fn reconcile<I, S>(
        &self,
        site: SiteId,
        user: UserId,
        payloads: I,
    ) -> InventoryResult<ReconcileOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes = self.registry.resolver().resolve(payloads);
        let site = self.registry.get_site(site).await?;
        let performer = self
            .users
            .get_user(user)
            .await?
            .ok_or_else(|| InventoryError::not_found("User", user))?;

        let found = self.registry.find_tools_by_qr_codes(&codes, site.id).await?;
        let at_site = self.registry.list_tools_at_site(site.id).await?;
        let partition = Partition::split(at_site, &found);
        debug!(
            site_id = %site.id,
            codes = codes.len(),
            found = partition.found.len(),
            missing = partition.missing.len(),
            "Partitioned site inventory"
        );

        let (found, missing) = self.apply_statuses(partition).await?;
        // No audit row unless every name resolves.
        let found_summaries = self.registry.summarize_all(&found).await?;
        let missing_summaries = self.registry.summarize_all(&missing).await?;

        let check = self
            .checks
            .record_inventory_check(NewInventoryCheck {
                user_id: performer.id,
                site_id: site.id,
                performed_at: Utc::now(),
                tool_ids: found.iter().map(|t| t.id).collect(),
            })
            .await?;
        info!(
            check_id = %check.id,
            site_id = %site.id,
            user_id = %performer.id,
            found = found.len(),
            missing = missing.len(),
            "Inventory check recorded"
        );

        let report = InventoryReport {
            check_id: check.id,
            site_id: site.id,
            site_name: site.name,
            performed_by: display_name(&performer).to_string(),
            performed_at: check.performed_at,
            total: found.len() + missing.len(),
            found: found_summaries,
            missing: missing_summaries,
        };

        Ok(ReconcileOutcome {
            check,
            report,
            empty_photos: 0,
        })
    }

    /// Write `present` to found tools and `lost` to missing ones. Every write
    /// is attempted; any failure turns the pass into `PartialBatchFailure`.
    async fn apply_statuses(&self, partition: Partition) -> InventoryResult<(Vec<Tool>, Vec<Tool>)> {
        let mut applied = 0;
        let mut failed = 0;
        let mut first_error: Option<String> = None;
        let mut found = Vec::with_capacity(partition.found.len());
        let mut missing = Vec::with_capacity(partition.missing.len());

        let writes = partition
            .found
            .into_iter()
            .map(|t| (t, ToolStatus::Present))
            .chain(partition.missing.into_iter().map(|t| (t, ToolStatus::Lost)));

        for (tool, status) in writes {
            match self.registry.set_status(tool.id, status).await {
                Ok(updated) => {
                    applied += 1;
                    if status == ToolStatus::Present {
                        found.push(updated);
                    } else {
                        missing.push(updated);
                    }
                }
                Err(e) => {
                    warn!(tool_id = %tool.id, status = %status, error = %e, "Status update failed");
                    failed += 1;
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if failed > 0 {
            return Err(InventoryError::PartialBatchFailure {
                applied,
                failed,
                reason: first_error.unwrap_or_default(),
            });
        }
        Ok((found, missing))
    }

    /// Past checks for a site, newest first
    pub async fn history(&self, site: SiteId) -> InventoryResult<Vec<InventoryCheck>> {
        Ok(self.checks.list_inventory_checks(Some(site)).await?)
    }
}
