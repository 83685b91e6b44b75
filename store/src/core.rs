// core.rs
//
// Core types for the tool store.
// Contains all entity types, IDs, status enums, the error type, and the storage
// traits implemented by every backend.
//
// Structure:
// 1. Identifiers
// 2. Closed status sets
// 3. Entities
// 4. Errors
// 5. Storage traits

use std::{
    collections::HashSet,
    fmt::{Display, Formatter},
    str::FromStr,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PART 1: Identifiers
// ============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a tool
    ToolId
);
entity_id!(
    /// Identifier of a tool name reference
    ToolNameId
);
entity_id!(
    /// Identifier of a construction site ("object")
    SiteId
);
entity_id!(
    /// Identifier of a user
    UserId
);
entity_id!(
    /// Identifier of a transfer request
    TransferRequestId
);
entity_id!(
    /// Identifier of an inventory check
    InventoryCheckId
);

// ============================================================================
// PART 2: Closed status sets
// ============================================================================

/// Error returned when a textual label does not name a member of a closed set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} label: {label}")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub label: String,
}

/// Recorded status of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Present,
    Lost,
    Decommissioned,
}

impl ToolStatus {
    pub const ALL: [ToolStatus; 3] = [
        ToolStatus::Present,
        ToolStatus::Lost,
        ToolStatus::Decommissioned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Present => "present",
            ToolStatus::Lost => "lost",
            ToolStatus::Decommissioned => "decommissioned",
        }
    }
}

impl FromStr for ToolStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownLabel {
                kind: "tool status",
                label: s.to_string(),
            })
    }
}

impl Display for ToolStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a transfer request. Both non-pending states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Completed,
    Rejected,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Completed => "completed",
            TransferStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

impl FromStr for TransferStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(TransferStatus::Pending),
            "completed" => Ok(TransferStatus::Completed),
            "rejected" => Ok(TransferStatus::Rejected),
            other => Err(UnknownLabel {
                kind: "transfer status",
                label: other.to_string(),
            }),
        }
    }
}

impl Display for TransferStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approver's verdict on a pending transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDecision {
    Approve,
    Reject,
}

impl TransferDecision {
    /// Terminal status a request reaches under this decision
    pub fn target_status(&self) -> TransferStatus {
        match self {
            TransferDecision::Approve => TransferStatus::Completed,
            TransferDecision::Reject => TransferStatus::Rejected,
        }
    }
}

/// Role of a user on the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Registration submitted but not yet confirmed by a foreman
    #[default]
    Pending,
    Foreman,
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Pending => "pending",
            Role::Foreman => "foreman",
            Role::Worker => "worker",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(Role::Pending),
            "foreman" => Ok(Role::Foreman),
            "worker" => Ok(Role::Worker),
            other => Err(UnknownLabel {
                kind: "role",
                label: other.to_string(),
            }),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PART 3: Entities
// ============================================================================

/// Human name shared by tools of the same kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolName {
    pub id: ToolNameId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreman_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewSite {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A tracked physical tool.
///
/// `inventory_number` and `qr_code` are unique across the store and never
/// change after creation. `site_id` is the single current custodian, or `None`
/// while the tool is unassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub id: ToolId,
    pub inventory_number: String,
    pub qr_code: String,
    pub name_id: ToolNameId,
    pub site_id: Option<SiteId>,
    pub status: ToolStatus,
    pub created_at: DateTime<Utc>,
}

/// Input payload for registering a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTool {
    pub inventory_number: String,
    pub qr_code: String,
    pub name_id: ToolNameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<SiteId>,
    #[serde(default = "default_tool_status")]
    pub status: ToolStatus,
}

fn default_tool_status() -> ToolStatus {
    ToolStatus::Present
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Chat handle including the leading `@`
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<SiteId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewUser {
    pub handle: String,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub site_id: Option<SiteId>,
}

/// Single-field user mutation. Only these fields are writable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserUpdate {
    Name(Option<String>),
    ChatId(Option<i64>),
    Role(Role),
    Site(Option<SiteId>),
}

impl UserUpdate {
    pub fn apply(&self, user: &mut User) {
        match self {
            UserUpdate::Name(name) => user.name = name.clone(),
            UserUpdate::ChatId(chat_id) => user.chat_id = *chat_id,
            UserUpdate::Role(role) => user.role = *role,
            UserUpdate::Site(site_id) => user.site_id = *site_id,
        }
    }
}

/// Request to move a tool's custody from one site to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: TransferRequestId,
    pub tool_id: ToolId,
    pub from_site_id: SiteId,
    pub to_site_id: SiteId,
    pub requester_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<UserId>,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransferRequest {
    pub tool_id: ToolId,
    pub from_site_id: SiteId,
    pub to_site_id: SiteId,
    pub requester_id: UserId,
}

/// Filter for listing transfer requests; `None` fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferFilter {
    #[serde(default)]
    pub from_site_id: Option<SiteId>,
    #[serde(default)]
    pub requester_id: Option<UserId>,
    #[serde(default)]
    pub status: Option<TransferStatus>,
}

impl TransferFilter {
    pub fn matches(&self, request: &TransferRequest) -> bool {
        self.from_site_id.is_none_or(|s| request.from_site_id == s)
            && self.requester_id.is_none_or(|u| request.requester_id == u)
            && self.status.is_none_or(|s| request.status == s)
    }
}

/// Append-only audit record of one completed reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCheck {
    pub id: InventoryCheckId,
    pub user_id: UserId,
    pub site_id: SiteId,
    pub performed_at: DateTime<Utc>,
    /// Tools observed during the pass
    pub tool_ids: Vec<ToolId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInventoryCheck {
    pub user_id: UserId,
    pub site_id: SiteId,
    pub performed_at: DateTime<Utc>,
    pub tool_ids: Vec<ToolId>,
}

// ============================================================================
// PART 4: Errors
// ============================================================================

/// Entity kinds referenced in store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Tool,
    ToolName,
    Site,
    User,
    TransferRequest,
    InventoryCheck,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::Tool => "Tool",
            EntityKind::ToolName => "Tool name",
            EntityKind::Site => "Site",
            EntityKind::User => "User",
            EntityKind::TransferRequest => "Transfer request",
            EntityKind::InventoryCheck => "Inventory check",
        })
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: EntityKind, key: String },

    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: EntityKind, key: String },

    #[error("Transfer request {id} is already {status}")]
    AlreadyTerminal {
        id: TransferRequestId,
        status: TransferStatus,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl StoreError {
    pub fn not_found(entity: EntityKind, key: impl Display) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn duplicate(entity: EntityKind, key: impl Display) -> Self {
        StoreError::Duplicate {
            entity,
            key: key.to_string(),
        }
    }
}

// ============================================================================
// PART 5: Storage traits
// ============================================================================

/// Tools, tool names and sites.
///
/// Every method reads the current state of the store; nothing is cached
/// between calls.
#[async_trait]
pub trait ToolStorage: Send + Sync + 'static {
    /// Return the name reference for `name`, creating it if needed
    async fn ensure_tool_name(&self, name: &str) -> StoreResult<ToolName>;

    async fn get_tool_name(&self, id: ToolNameId) -> StoreResult<Option<ToolName>>;

    async fn create_site(&self, input: NewSite) -> StoreResult<Site>;

    async fn get_site(&self, id: SiteId) -> StoreResult<Option<Site>>;

    /// All sites ordered by id
    async fn list_sites(&self) -> StoreResult<Vec<Site>>;

    async fn set_site_foreman(&self, id: SiteId, foreman: Option<UserId>) -> StoreResult<Site>;

    /// Register a tool. Fails with `Duplicate` if the inventory number or QR
    /// payload is already taken.
    async fn create_tool(&self, input: NewTool) -> StoreResult<Tool>;

    async fn get_tool(&self, id: ToolId) -> StoreResult<Option<Tool>>;

    /// Tools whose current site is `site`, in insertion order
    async fn list_tools_at_site(&self, site: SiteId) -> StoreResult<Vec<Tool>>;

    /// Tools at `site` whose QR payload is one of `codes`. Unknown codes and
    /// codes belonging to other sites are ignored.
    async fn find_tools_by_qr_codes(
        &self,
        codes: &HashSet<String>,
        site: SiteId,
    ) -> StoreResult<Vec<Tool>>;

    /// Overwrite a tool's status. Writing the current value is a successful no-op.
    async fn set_tool_status(&self, id: ToolId, status: ToolStatus) -> StoreResult<Tool>;

    /// Overwrite a tool's current site
    async fn relocate_tool(&self, id: ToolId, site: SiteId) -> StoreResult<Tool>;
}

#[async_trait]
pub trait UserStorage: Send + Sync + 'static {
    /// Fails with `Duplicate` if the handle is taken
    async fn create_user(&self, input: NewUser) -> StoreResult<User>;

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn get_user_by_handle(&self, handle: &str) -> StoreResult<Option<User>>;

    /// Apply every update in order as one write
    async fn update_user(&self, id: UserId, updates: &[UserUpdate]) -> StoreResult<User>;

    /// Users assigned to `site`, optionally restricted to one role
    async fn list_users_at_site(&self, site: SiteId, role: Option<Role>)
        -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait TransferStorage: Send + Sync + 'static {
    async fn create_transfer_request(
        &self,
        input: NewTransferRequest,
    ) -> StoreResult<TransferRequest>;

    async fn get_transfer_request(
        &self,
        id: TransferRequestId,
    ) -> StoreResult<Option<TransferRequest>>;

    /// Requests matching `filter`, oldest first
    async fn list_transfer_requests(
        &self,
        filter: &TransferFilter,
    ) -> StoreResult<Vec<TransferRequest>>;

    /// Move a pending request to its terminal state as one atomic unit.
    ///
    /// On `Approve` the referenced tool is relocated to the destination site in
    /// the same unit of work; the tool must still be at the source site.
    /// Errors leave both the request and the tool untouched:
    /// - `NotFound` if the request (or, on approval, its tool) does not exist
    /// - `AlreadyTerminal` if the request already left `pending`
    /// - `Conflict` if the tool has moved away from the source site
    async fn decide_transfer_request(
        &self,
        id: TransferRequestId,
        approver: UserId,
        decision: TransferDecision,
        decided_at: DateTime<Utc>,
    ) -> StoreResult<TransferRequest>;
}

#[async_trait]
pub trait InventoryCheckStorage: Send + Sync + 'static {
    async fn record_inventory_check(&self, input: NewInventoryCheck)
        -> StoreResult<InventoryCheck>;

    async fn get_inventory_check(&self, id: InventoryCheckId)
        -> StoreResult<Option<InventoryCheck>>;

    /// Checks newest first, optionally restricted to one site
    async fn list_inventory_checks(&self, site: Option<SiteId>)
        -> StoreResult<Vec<InventoryCheck>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_status_parses_labels_case_insensitively() {
        assert_eq!("present".parse::<ToolStatus>().unwrap(), ToolStatus::Present);
        assert_eq!(" LOST ".parse::<ToolStatus>().unwrap(), ToolStatus::Lost);
        assert_eq!(
            "Decommissioned".parse::<ToolStatus>().unwrap(),
            ToolStatus::Decommissioned
        );
    }

    #[test]
    fn tool_status_rejects_unknown_label() {
        let err = "in_repair".parse::<ToolStatus>().unwrap_err();
        assert_eq!(err.kind, "tool status");
        assert_eq!(err.label, "in_repair");
    }

    #[test]
    fn transfer_status_terminality() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Rejected.is_terminal());
    }

    #[test]
    fn decision_targets() {
        assert_eq!(
            TransferDecision::Approve.target_status(),
            TransferStatus::Completed
        );
        assert_eq!(
            TransferDecision::Reject.target_status(),
            TransferStatus::Rejected
        );
    }

    #[test]
    fn role_round_trips_through_label() {
        for role in [Role::Pending, Role::Foreman, Role::Worker] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn user_update_touches_only_its_field() {
        let mut user = User {
            id: UserId(1),
            handle: "@ivan".to_string(),
            chat_id: None,
            name: None,
            role: Role::Pending,
            site_id: None,
        };

        UserUpdate::Name(Some("Ivan".to_string())).apply(&mut user);
        UserUpdate::Site(Some(SiteId(4))).apply(&mut user);

        assert_eq!(user.name.as_deref(), Some("Ivan"));
        assert_eq!(user.site_id, Some(SiteId(4)));
        assert_eq!(user.role, Role::Pending);
        assert_eq!(user.handle, "@ivan");
    }

    #[test]
    fn transfer_filter_matches_all_fields() {
        let request = TransferRequest {
            id: TransferRequestId(1),
            tool_id: ToolId(1),
            from_site_id: SiteId(1),
            to_site_id: SiteId(2),
            requester_id: UserId(7),
            approver_id: None,
            status: TransferStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
        };

        assert!(TransferFilter::default().matches(&request));
        assert!(TransferFilter {
            from_site_id: Some(SiteId(1)),
            status: Some(TransferStatus::Pending),
            ..Default::default()
        }
        .matches(&request));
        assert!(!TransferFilter {
            requester_id: Some(UserId(8)),
            ..Default::default()
        }
        .matches(&request));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ToolId(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(format!("{}", SiteId(3)), "3");
    }

    #[test]
    fn new_tool_defaults_to_present() {
        let tool: NewTool =
            serde_json::from_str(r#"{"inventory_number":"INV-1","qr_code":"qr-1","name_id":1}"#)
                .unwrap();
        assert_eq!(tool.status, ToolStatus::Present);
        assert_eq!(tool.site_id, None);
    }
}
