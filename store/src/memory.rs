//! In-memory storage implementation
//!
//! All tables live behind one `RwLock`, so every trait method, including the
//! compound `decide_transfer_request`, is atomic with respect to the others.
//! Ids come from one shared counter; `BTreeMap` keyed by id keeps
//! iteration in insertion order.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::core::*;

#[derive(Default)]
struct Tables {
    tool_names: BTreeMap<ToolNameId, ToolName>,
    sites: BTreeMap<SiteId, Site>,
    users: BTreeMap<UserId, User>,
    tools: BTreeMap<ToolId, Tool>,
    transfers: BTreeMap<TransferRequestId, TransferRequest>,
    checks: BTreeMap<InventoryCheckId, InventoryCheck>,
    last_id: i64,
}

impl Tables {
    // One sequence shared by all tables; ids only need to be unique per table.
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn tool_mut(&mut self, id: ToolId) -> StoreResult<&mut Tool> {
        self.tools
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Tool, id))
    }

    fn require_site(&self, id: SiteId) -> StoreResult<()> {
        if self.sites.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::not_found(EntityKind::Site, id))
        }
    }
}

/// Memory-backed store implementing every storage trait
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolStorage for MemoryStore {
    async fn ensure_tool_name(&self, name: &str) -> StoreResult<ToolName> {
        let mut tables = self.inner.write();
        if let Some(existing) = tables.tool_names.values().find(|n| n.name == name) {
            return Ok(existing.clone());
        }
        let id = ToolNameId(tables.next_id());
        let tool_name = ToolName {
            id,
            name: name.to_string(),
        };
        tables.tool_names.insert(id, tool_name.clone());
        Ok(tool_name)
    }

    async fn get_tool_name(&self, id: ToolNameId) -> StoreResult<Option<ToolName>> {
        Ok(self.inner.read().tool_names.get(&id).cloned())
    }

    async fn create_site(&self, input: NewSite) -> StoreResult<Site> {
        let mut tables = self.inner.write();
        if tables.sites.values().any(|s| s.name == input.name) {
            return Err(StoreError::duplicate(EntityKind::Site, &input.name));
        }
        let id = SiteId(tables.next_id());
        let site = Site {
            id,
            name: input.name,
            location: input.location,
            foreman_id: None,
        };
        tables.sites.insert(id, site.clone());
        Ok(site)
    }

    async fn get_site(&self, id: SiteId) -> StoreResult<Option<Site>> {
        Ok(self.inner.read().sites.get(&id).cloned())
    }

    async fn list_sites(&self) -> StoreResult<Vec<Site>> {
        Ok(self.inner.read().sites.values().cloned().collect())
    }

    async fn set_site_foreman(&self, id: SiteId, foreman: Option<UserId>) -> StoreResult<Site> {
        let mut tables = self.inner.write();
        if let Some(user_id) = foreman {
            if !tables.users.contains_key(&user_id) {
                return Err(StoreError::not_found(EntityKind::User, user_id));
            }
        }
        let site = tables
            .sites
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Site, id))?;
        site.foreman_id = foreman;
        Ok(site.clone())
    }

    async fn create_tool(&self, input: NewTool) -> StoreResult<Tool> {
        let mut tables = self.inner.write();
        if !tables.tool_names.contains_key(&input.name_id) {
            return Err(StoreError::not_found(EntityKind::ToolName, input.name_id));
        }
        if let Some(site_id) = input.site_id {
            tables.require_site(site_id)?;
        }
        for tool in tables.tools.values() {
            if tool.inventory_number == input.inventory_number {
                return Err(StoreError::duplicate(
                    EntityKind::Tool,
                    format!("inventory number {}", input.inventory_number),
                ));
            }
            if tool.qr_code == input.qr_code {
                return Err(StoreError::duplicate(
                    EntityKind::Tool,
                    format!("QR payload {}", input.qr_code),
                ));
            }
        }

        let id = ToolId(tables.next_id());
        let tool = Tool {
            id,
            inventory_number: input.inventory_number,
            qr_code: input.qr_code,
            name_id: input.name_id,
            site_id: input.site_id,
            status: input.status,
            created_at: Utc::now(),
        };
        tables.tools.insert(id, tool.clone());
        Ok(tool)
    }

    async fn get_tool(&self, id: ToolId) -> StoreResult<Option<Tool>> {
        Ok(self.inner.read().tools.get(&id).cloned())
    }

    async fn list_tools_at_site(&self, site: SiteId) -> StoreResult<Vec<Tool>> {
        Ok(self
            .inner
            .read()
            .tools
            .values()
            .filter(|t| t.site_id == Some(site))
            .cloned()
            .collect())
    }

    async fn find_tools_by_qr_codes(
        &self,
        codes: &HashSet<String>,
        site: SiteId,
    ) -> StoreResult<Vec<Tool>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .inner
            .read()
            .tools
            .values()
            .filter(|t| t.site_id == Some(site) && codes.contains(&t.qr_code))
            .cloned()
            .collect())
    }

    async fn set_tool_status(&self, id: ToolId, status: ToolStatus) -> StoreResult<Tool> {
        let mut tables = self.inner.write();
        let tool = tables.tool_mut(id)?;
        tool.status = status;
        Ok(tool.clone())
    }

    async fn relocate_tool(&self, id: ToolId, site: SiteId) -> StoreResult<Tool> {
        let mut tables = self.inner.write();
        tables.require_site(site)?;
        let tool = tables.tool_mut(id)?;
        tool.site_id = Some(site);
        Ok(tool.clone())
    }
}

#[async_trait]
impl UserStorage for MemoryStore {
    async fn create_user(&self, input: NewUser) -> StoreResult<User> {
        let mut tables = self.inner.write();
        if tables.users.values().any(|u| u.handle == input.handle) {
            return Err(StoreError::duplicate(EntityKind::User, &input.handle));
        }
        if let Some(site_id) = input.site_id {
            tables.require_site(site_id)?;
        }
        let id = UserId(tables.next_id());
        let user = User {
            id,
            handle: input.handle,
            chat_id: input.chat_id,
            name: input.name,
            role: input.role,
            site_id: input.site_id,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn get_user_by_handle(&self, handle: &str) -> StoreResult<Option<User>> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.handle == handle)
            .cloned())
    }

    async fn update_user(&self, id: UserId, updates: &[UserUpdate]) -> StoreResult<User> {
        let mut tables = self.inner.write();
        for update in updates {
            if let UserUpdate::Site(Some(site_id)) = update {
                tables.require_site(*site_id)?;
            }
        }
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(EntityKind::User, id))?;
        for update in updates {
            update.apply(user);
        }
        Ok(user.clone())
    }

    async fn list_users_at_site(
        &self,
        site: SiteId,
        role: Option<Role>,
    ) -> StoreResult<Vec<User>> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .filter(|u| u.site_id == Some(site) && role.is_none_or(|r| u.role == r))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransferStorage for MemoryStore {
    async fn create_transfer_request(
        &self,
        input: NewTransferRequest,
    ) -> StoreResult<TransferRequest> {
        let mut tables = self.inner.write();
        if !tables.tools.contains_key(&input.tool_id) {
            return Err(StoreError::not_found(EntityKind::Tool, input.tool_id));
        }
        if !tables.users.contains_key(&input.requester_id) {
            return Err(StoreError::not_found(EntityKind::User, input.requester_id));
        }
        tables.require_site(input.from_site_id)?;
        tables.require_site(input.to_site_id)?;

        let id = TransferRequestId(tables.next_id());
        let request = TransferRequest {
            id,
            tool_id: input.tool_id,
            from_site_id: input.from_site_id,
            to_site_id: input.to_site_id,
            requester_id: input.requester_id,
            approver_id: None,
            status: TransferStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
        };
        tables.transfers.insert(id, request.clone());
        Ok(request)
    }

    async fn get_transfer_request(
        &self,
        id: TransferRequestId,
    ) -> StoreResult<Option<TransferRequest>> {
        Ok(self.inner.read().transfers.get(&id).cloned())
    }

    async fn list_transfer_requests(
        &self,
        filter: &TransferFilter,
    ) -> StoreResult<Vec<TransferRequest>> {
        Ok(self
            .inner
            .read()
            .transfers
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn decide_transfer_request(
        &self,
        id: TransferRequestId,
        approver: UserId,
        decision: TransferDecision,
        decided_at: DateTime<Utc>,
    ) -> StoreResult<TransferRequest> {
        // Single write guard for the whole check-then-transition sequence.
        let mut tables = self.inner.write();

        let request = tables
            .transfers
            .get(&id)
            .ok_or_else(|| StoreError::not_found(EntityKind::TransferRequest, id))?;
        if request.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                id,
                status: request.status,
            });
        }
        let (tool_id, from_site_id, to_site_id) =
            (request.tool_id, request.from_site_id, request.to_site_id);

        if decision == TransferDecision::Approve {
            tables.require_site(to_site_id)?;
            let tool = tables.tool_mut(tool_id)?;
            if tool.site_id != Some(from_site_id) {
                return Err(StoreError::Conflict(format!(
                    "tool {tool_id} is no longer at site {from_site_id}"
                )));
            }
            tool.site_id = Some(to_site_id);
            debug!(request_id = %id, tool_id = %tool_id, to_site_id = %to_site_id, "Relocated tool");
        }

        let request = tables
            .transfers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(EntityKind::TransferRequest, id))?;
        request.status = decision.target_status();
        request.approver_id = Some(approver);
        request.decided_at = Some(decided_at);
        Ok(request.clone())
    }
}

#[async_trait]
impl InventoryCheckStorage for MemoryStore {
    async fn record_inventory_check(
        &self,
        input: NewInventoryCheck,
    ) -> StoreResult<InventoryCheck> {
        let mut tables = self.inner.write();
        tables.require_site(input.site_id)?;
        if !tables.users.contains_key(&input.user_id) {
            return Err(StoreError::not_found(EntityKind::User, input.user_id));
        }
        let id = InventoryCheckId(tables.next_id());
        let check = InventoryCheck {
            id,
            user_id: input.user_id,
            site_id: input.site_id,
            performed_at: input.performed_at,
            tool_ids: input.tool_ids,
        };
        tables.checks.insert(id, check.clone());
        Ok(check)
    }

    async fn get_inventory_check(
        &self,
        id: InventoryCheckId,
    ) -> StoreResult<Option<InventoryCheck>> {
        Ok(self.inner.read().checks.get(&id).cloned())
    }

    async fn list_inventory_checks(
        &self,
        site: Option<SiteId>,
    ) -> StoreResult<Vec<InventoryCheck>> {
        Ok(self
            .inner
            .read()
            .checks
            .values()
            .rev()
            .filter(|c| site.is_none_or(|s| c.site_id == s))
            .cloned()
            .collect())
    }
}
