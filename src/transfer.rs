//! Transfer request engine.
//!
//! A request moves `pending -> completed` (approve) or `pending -> rejected`
//! (reject) exactly once. Approval relocates the tool in the same atomic store
//! operation that records the decision.

use std::sync::Arc;

use chrono::Utc;
use tool_store::{
    NewTransferRequest, SiteId, ToolId, TransferDecision, TransferFilter, TransferRequest,
    TransferRequestId, TransferStatus, TransferStorage, User, UserId, UserStorage,
};
use tracing::{info, warn};

use crate::{
    error::{InventoryError, InventoryResult},
    notify::{DeliveryStatus, Notification, NotificationGateway},
    onboarding::display_name,
    registry::ToolRegistry,
};

/// Request state after an operation, plus how the affected user was told
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub request: TransferRequest,
    pub delivery: DeliveryStatus,
}

#[derive(Clone)]
pub struct TransferEngine {
    registry: ToolRegistry,
    users: Arc<dyn UserStorage>,
    transfers: Arc<dyn TransferStorage>,
    gateway: NotificationGateway,
}

impl TransferEngine {
    pub fn new(
        registry: ToolRegistry,
        users: Arc<dyn UserStorage>,
        transfers: Arc<dyn TransferStorage>,
        gateway: NotificationGateway,
    ) -> Self {
        Self {
            registry,
            users,
            transfers,
            gateway,
        }
    }

    /// Open a pending request to move `tool_id` from `from_site` to `to_site`.
    ///
    /// The tool, requester and both sites must exist, the sites must differ and
    /// the tool must currently be at `from_site`. The source site's foreman is
    /// notified.
    pub async fn create(
        &self,
        tool_id: ToolId,
        requester_id: UserId,
        from_site: SiteId,
        to_site: SiteId,
    ) -> InventoryResult<TransferOutcome> {
        if from_site == to_site {
            return Err(InventoryError::InvalidTransfer(format!(
                "source and destination are both site {from_site}"
            )));
        }
        let tool = self.registry.get_tool(tool_id).await?;
        let requester = self.get_user(requester_id).await?;
        let source = self.registry.get_site(from_site).await?;
        let destination = self.registry.get_site(to_site).await?;
        if tool.site_id != Some(from_site) {
            return Err(InventoryError::InvalidTransfer(format!(
                "tool {tool_id} is not at site {from_site}"
            )));
        }

        let request = self
            .transfers
            .create_transfer_request(NewTransferRequest {
                tool_id,
                from_site_id: from_site,
                to_site_id: to_site,
                requester_id,
            })
            .await?;
        info!(
            request_id = %request.id,
            tool_id = %tool_id,
            from_site_id = %from_site,
            to_site_id = %to_site,
            requester_id = %requester_id,
            "Transfer request created"
        );

        let delivery = match source.foreman_id {
            Some(foreman_id) => match self.users.get_user(foreman_id).await {
                Ok(Some(foreman)) => {
                    let summary = self.registry.summarize(&tool).await;
                    match summary {
                        Ok(summary) => {
                            self.gateway
                                .notify_user(
                                    &foreman,
                                    &Notification::TransferRequested {
                                        request_id: request.id.0,
                                        requester: display_name(&requester).to_string(),
                                        tool_name: summary.name,
                                        inventory_number: summary.inventory_number,
                                        destination: destination.name,
                                    },
                                )
                                .await
                        }
                        Err(e) => DeliveryStatus::Failed(e.to_string()),
                    }
                }
                Ok(None) => DeliveryStatus::NoRecipient,
                Err(e) => DeliveryStatus::Failed(e.to_string()),
            },
            None => DeliveryStatus::NoRecipient,
        };

        Ok(TransferOutcome { request, delivery })
    }

    /// Complete a pending request and relocate its tool atomically.
    ///
    /// Fails with `NotFound`, `AlreadyTerminal`, or `Conflict` when the tool
    /// has left the source site; on failure nothing changes.
    pub async fn approve(
        &self,
        request_id: TransferRequestId,
        approver_id: UserId,
    ) -> InventoryResult<TransferOutcome> {
        self.decide(request_id, approver_id, TransferDecision::Approve)
            .await
    }

    /// Reject a pending request; the tool stays where it is
    pub async fn reject(
        &self,
        request_id: TransferRequestId,
        approver_id: UserId,
    ) -> InventoryResult<TransferOutcome> {
        self.decide(request_id, approver_id, TransferDecision::Reject)
            .await
    }

    async fn decide(
        &self,
        request_id: TransferRequestId,
        approver_id: UserId,
        decision: TransferDecision,
    ) -> InventoryResult<TransferOutcome> {
        self.get_user(approver_id).await?;

        let request = self
            .transfers
            .decide_transfer_request(request_id, approver_id, decision, Utc::now())
            .await?;
        info!(
            request_id = %request.id,
            approver_id = %approver_id,
            status = %request.status,
            "Transfer request decided"
        );

        let delivery = self.notify_requester(&request).await;
        Ok(TransferOutcome { request, delivery })
    }

    /// Tell the requester how their request ended. Lookup failures are
    /// reported as a failed delivery; the decision itself already stands.
    async fn notify_requester(&self, request: &TransferRequest) -> DeliveryStatus {
        match self.decision_notice(request).await {
            Ok((requester, notice)) => self.gateway.notify_user(&requester, &notice).await,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Could not build decision notice");
                DeliveryStatus::Failed(e.to_string())
            }
        }
    }

    async fn decision_notice(
        &self,
        request: &TransferRequest,
    ) -> InventoryResult<(User, Notification)> {
        let requester = self.get_user(request.requester_id).await?;
        let tool = self.registry.get_tool(request.tool_id).await?;
        let summary = self.registry.summarize(&tool).await?;

        let notice = match request.status {
            TransferStatus::Completed => {
                let destination = self.registry.get_site(request.to_site_id).await?;
                Notification::TransferApproved {
                    tool_name: summary.name,
                    inventory_number: summary.inventory_number,
                    destination: destination.name,
                }
            }
            _ => Notification::TransferRejected {
                tool_name: summary.name,
                inventory_number: summary.inventory_number,
            },
        };
        Ok((requester, notice))
    }

    pub async fn get(&self, request_id: TransferRequestId) -> InventoryResult<TransferRequest> {
        self.transfers
            .get_transfer_request(request_id)
            .await?
            .ok_or_else(|| InventoryError::not_found("Transfer request", request_id))
    }

    /// Pending requests taking tools out of `site`, oldest first
    pub async fn pending_for_site(&self, site: SiteId) -> InventoryResult<Vec<TransferRequest>> {
        Ok(self
            .transfers
            .list_transfer_requests(&TransferFilter {
                from_site_id: Some(site),
                status: Some(TransferStatus::Pending),
                ..Default::default()
            })
            .await?)
    }

    pub async fn requests_by(&self, requester: UserId) -> InventoryResult<Vec<TransferRequest>> {
        Ok(self
            .transfers
            .list_transfer_requests(&TransferFilter {
                requester_id: Some(requester),
                ..Default::default()
            })
            .await?)
    }

    async fn get_user(&self, id: UserId) -> InventoryResult<User> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| InventoryError::not_found("User", id))
    }
}
