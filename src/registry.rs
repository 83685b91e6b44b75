//! Tool registry: the single write path for tool custody and status.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tool_store::{
    NewSite, NewTool, Site, SiteId, Tool, ToolId, ToolNameId, ToolStatus, ToolStorage, UserId,
};
use tracing::{debug, info};

use crate::{
    error::{InventoryError, InventoryResult},
    qr::QrResolver,
};

pub const UNKNOWN_TOOL_LABEL: &str = "Unknown tool";
pub const NO_NUMBER_LABEL: &str = "No number";

/// Display view of a tool with its name resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub id: ToolId,
    pub inventory_number: String,
    pub name: String,
    pub qr_code: String,
    pub status: ToolStatus,
}

impl ToolSummary {
    fn new(tool: &Tool, name: Option<&str>) -> Self {
        let inventory_number = if tool.inventory_number.trim().is_empty() {
            NO_NUMBER_LABEL.to_string()
        } else {
            tool.inventory_number.clone()
        };
        Self {
            id: tool.id,
            inventory_number,
            name: name.unwrap_or(UNKNOWN_TOOL_LABEL).to_string(),
            qr_code: tool.qr_code.clone(),
            status: tool.status,
        }
    }
}

#[derive(Clone)]
pub struct ToolRegistry {
    store: Arc<dyn ToolStorage>,
    resolver: QrResolver,
}

impl ToolRegistry {
    pub fn new(store: Arc<dyn ToolStorage>, resolver: QrResolver) -> Self {
        Self { store, resolver }
    }

    pub fn resolver(&self) -> QrResolver {
        self.resolver
    }

    // --- tools ---------------------------------------------------------------

    /// Register a new tool under `name`, creating the name reference if needed
    pub async fn register_tool(
        &self,
        inventory_number: &str,
        qr_code: &str,
        name: &str,
        site: Option<SiteId>,
    ) -> InventoryResult<Tool> {
        let qr_code = self.resolver.normalize(qr_code).ok_or_else(|| {
            InventoryError::InvalidInput("QR payload must not be empty".to_string())
        })?;
        let inventory_number = inventory_number.trim();
        if inventory_number.is_empty() {
            return Err(InventoryError::InvalidInput(
                "inventory number must not be empty".to_string(),
            ));
        }

        let tool_name = self.store.ensure_tool_name(name.trim()).await?;
        let tool = self
            .store
            .create_tool(NewTool {
                inventory_number: inventory_number.to_string(),
                qr_code,
                name_id: tool_name.id,
                site_id: site,
                status: ToolStatus::Present,
            })
            .await?;
        info!(
            tool_id = %tool.id,
            inventory_number = %tool.inventory_number,
            site_id = ?tool.site_id,
            "Registered tool"
        );
        Ok(tool)
    }

    pub async fn get_tool(&self, id: ToolId) -> InventoryResult<Tool> {
        self.store
            .get_tool(id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Tool", id))
    }

    /// Human name of a tool, or the default label when the reference is gone
    pub async fn tool_display_name(&self, tool: &Tool) -> InventoryResult<String> {
        Ok(self
            .store
            .get_tool_name(tool.name_id)
            .await?
            .map(|n| n.name)
            .unwrap_or_else(|| UNKNOWN_TOOL_LABEL.to_string()))
    }

    pub async fn summarize(&self, tool: &Tool) -> InventoryResult<ToolSummary> {
        let name = self.tool_display_name(tool).await?;
        Ok(ToolSummary::new(tool, Some(&name)))
    }

    /// Summaries for a batch of tools; each name reference is fetched once
    pub async fn summarize_all(&self, tools: &[Tool]) -> InventoryResult<Vec<ToolSummary>> {
        let mut names: HashMap<ToolNameId, Option<String>> = HashMap::new();
        let mut summaries = Vec::with_capacity(tools.len());
        for tool in tools {
            if !names.contains_key(&tool.name_id) {
                let name = self.store.get_tool_name(tool.name_id).await?.map(|n| n.name);
                names.insert(tool.name_id, name);
            }
            let name = names.get(&tool.name_id).and_then(|n| n.as_deref());
            summaries.push(ToolSummary::new(tool, name));
        }
        Ok(summaries)
    }

    /// All tools whose current site is `site`, in insertion order
    pub async fn list_tools_at_site(&self, site: SiteId) -> InventoryResult<Vec<Tool>> {
        Ok(self.store.list_tools_at_site(site).await?)
    }

    /// Tools at `site` carrying one of `codes`; unmatched codes are dropped
    pub async fn find_tools_by_qr_codes(
        &self,
        codes: &HashSet<String>,
        site: SiteId,
    ) -> InventoryResult<Vec<Tool>> {
        Ok(self.store.find_tools_by_qr_codes(codes, site).await?)
    }

    /// Idempotent status write
    pub async fn set_status(&self, id: ToolId, status: ToolStatus) -> InventoryResult<Tool> {
        let tool = self.store.set_tool_status(id, status).await?;
        debug!(tool_id = %id, status = %status, "Set tool status");
        Ok(tool)
    }

    /// Status write from a textual label; unknown labels are `NotFound`
    pub async fn set_status_label(&self, id: ToolId, label: &str) -> InventoryResult<Tool> {
        let status: ToolStatus = label.parse()?;
        self.set_status(id, status).await
    }

    pub async fn relocate(&self, id: ToolId, site: SiteId) -> InventoryResult<Tool> {
        let tool = self.store.relocate_tool(id, site).await?;
        info!(tool_id = %id, site_id = %site, "Relocated tool");
        Ok(tool)
    }

    // --- sites ---------------------------------------------------------------

    pub async fn create_site(&self, name: &str, location: Option<&str>) -> InventoryResult<Site> {
        let site = self
            .store
            .create_site(NewSite {
                name: name.trim().to_string(),
                location: location.map(str::to_string),
            })
            .await?;
        info!(site_id = %site.id, name = %site.name, "Created site");
        Ok(site)
    }

    pub async fn get_site(&self, id: SiteId) -> InventoryResult<Site> {
        self.store
            .get_site(id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Site", id))
    }

    pub async fn list_sites(&self) -> InventoryResult<Vec<Site>> {
        Ok(self.store.list_sites().await?)
    }

    /// Sites a worker at `own_site` can request tools from
    pub async fn donor_sites(&self, own_site: SiteId) -> InventoryResult<Vec<Site>> {
        Ok(self
            .store
            .list_sites()
            .await?
            .into_iter()
            .filter(|s| s.id != own_site)
            .collect())
    }

    pub async fn assign_foreman(&self, site: SiteId, foreman: UserId) -> InventoryResult<Site> {
        Ok(self.store.set_site_foreman(site, Some(foreman)).await?)
    }
}
