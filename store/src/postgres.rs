//! Postgres storage implementation using PostgresStore helper
//!
//! Structure:
//! 1. PostgresStore helper, schema and error mapping
//! 2. Row decoding
//! 3. ToolStorage
//! 4. UserStorage
//! 5. TransferStorage
//! 6. InventoryCheckStorage

use std::{collections::HashSet, fmt::Display};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::{error::SqlState, NoTls, Row};
use tracing::{debug, info};

use crate::{config::PostgresConfig, core::*};

// ============================================================================
// PART 1: PostgresStore helper, schema and error mapping
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tool_names (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS sites (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    location TEXT,
    foreman_id BIGINT
);

CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    handle TEXT NOT NULL UNIQUE,
    chat_id BIGINT,
    name TEXT,
    role TEXT NOT NULL DEFAULT 'pending',
    site_id BIGINT REFERENCES sites(id)
);

CREATE TABLE IF NOT EXISTS tools (
    id BIGSERIAL PRIMARY KEY,
    inventory_number TEXT NOT NULL UNIQUE,
    qr_code TEXT NOT NULL UNIQUE,
    name_id BIGINT NOT NULL REFERENCES tool_names(id),
    site_id BIGINT REFERENCES sites(id),
    status TEXT NOT NULL DEFAULT 'present',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS tools_site_id_idx ON tools (site_id);

CREATE TABLE IF NOT EXISTS transfer_requests (
    id BIGSERIAL PRIMARY KEY,
    tool_id BIGINT NOT NULL REFERENCES tools(id),
    from_site_id BIGINT NOT NULL REFERENCES sites(id),
    to_site_id BIGINT NOT NULL REFERENCES sites(id),
    requester_id BIGINT NOT NULL REFERENCES users(id),
    approver_id BIGINT REFERENCES users(id),
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    decided_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS transfer_requests_from_site_idx
    ON transfer_requests (from_site_id, status);

CREATE TABLE IF NOT EXISTS inventory_checks (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES users(id),
    site_id BIGINT NOT NULL REFERENCES sites(id),
    performed_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS inventory_check_tools (
    check_id BIGINT NOT NULL REFERENCES inventory_checks(id),
    tool_id BIGINT NOT NULL REFERENCES tools(id),
    position BIGINT NOT NULL,
    PRIMARY KEY (check_id, tool_id)
);
"#;

const TOOL_COLUMNS: &str = "id, inventory_number, qr_code, name_id, site_id, status, created_at";
const USER_COLUMNS: &str = "id, handle, chat_id, name, role, site_id";
const TRANSFER_COLUMNS: &str =
    "id, tool_id, from_site_id, to_site_id, requester_id, approver_id, status, created_at, decided_at";

// Checks joined with their ordered tool links; callers append WHERE/GROUP BY/ORDER BY.
const CHECK_SELECT: &str = "SELECT c.id, c.user_id, c.site_id, c.performed_at, \
     COALESCE(array_agg(t.tool_id ORDER BY t.position) FILTER (WHERE t.tool_id IS NOT NULL), '{}') AS tool_ids \
     FROM inventory_checks c LEFT JOIN inventory_check_tools t ON t.check_id = c.id";

/// Postgres-backed store implementing every storage trait
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(config: PostgresConfig) -> Result<Self, String> {
        let mut cfg = Config::new();
        cfg.url = Some(config.db_url);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.pool_max));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| e.to_string())?;
        Ok(Self { pool })
    }

    /// Create every table and index if missing
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await.map_err(storage_err)?;
        info!("Postgres schema is up to date");
        Ok(())
    }

    async fn client(&self) -> StoreResult<Object> {
        self.pool.get().await.map_err(storage_err)
    }
}

fn storage_err(e: impl Display) -> StoreError {
    StoreError::StorageError(e.to_string())
}

/// Map a driver error onto the store taxonomy. `entity`/`key` describe the
/// row being written and are used for unique-key violations.
fn map_db_error(err: tokio_postgres::Error, entity: EntityKind, key: impl Display) -> StoreError {
    if let Some(db) = err.as_db_error() {
        if *db.code() == SqlState::UNIQUE_VIOLATION {
            return StoreError::duplicate(entity, key);
        }
        if *db.code() == SqlState::FOREIGN_KEY_VIOLATION {
            let referenced = db
                .constraint()
                .map(referenced_entity)
                .unwrap_or(EntityKind::Site);
            let missing_key = db
                .detail()
                .and_then(foreign_key_value)
                .unwrap_or("unknown");
            return StoreError::not_found(referenced, missing_key);
        }
    }
    storage_err(err)
}

// Default constraint names look like `tools_site_id_fkey`.
fn referenced_entity(constraint: &str) -> EntityKind {
    if constraint.contains("site_id") {
        EntityKind::Site
    } else if constraint.contains("name_id") {
        EntityKind::ToolName
    } else if constraint.contains("tool_id") {
        EntityKind::Tool
    } else if constraint.contains("check_id") {
        EntityKind::InventoryCheck
    } else {
        EntityKind::User
    }
}

// Extracts `5` from `Key (site_id)=(5) is not present in table "sites".`
fn foreign_key_value(detail: &str) -> Option<&str> {
    detail
        .split_once(")=(")
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(value, _)| value)
}

// ============================================================================
// PART 2: Row decoding
// ============================================================================

fn parse_label<T>(raw: String) -> StoreResult<T>
where
    T: std::str::FromStr<Err = UnknownLabel>,
{
    raw.parse::<T>().map_err(storage_err)
}

fn tool_name_from_row(row: &Row) -> StoreResult<ToolName> {
    Ok(ToolName {
        id: ToolNameId(row.try_get("id").map_err(storage_err)?),
        name: row.try_get("name").map_err(storage_err)?,
    })
}

fn site_from_row(row: &Row) -> StoreResult<Site> {
    Ok(Site {
        id: SiteId(row.try_get("id").map_err(storage_err)?),
        name: row.try_get("name").map_err(storage_err)?,
        location: row.try_get("location").map_err(storage_err)?,
        foreman_id: row
            .try_get::<_, Option<i64>>("foreman_id")
            .map_err(storage_err)?
            .map(UserId),
    })
}

fn tool_from_row(row: &Row) -> StoreResult<Tool> {
    Ok(Tool {
        id: ToolId(row.try_get("id").map_err(storage_err)?),
        inventory_number: row.try_get("inventory_number").map_err(storage_err)?,
        qr_code: row.try_get("qr_code").map_err(storage_err)?,
        name_id: ToolNameId(row.try_get("name_id").map_err(storage_err)?),
        site_id: row
            .try_get::<_, Option<i64>>("site_id")
            .map_err(storage_err)?
            .map(SiteId),
        status: parse_label(row.try_get("status").map_err(storage_err)?)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

fn user_from_row(row: &Row) -> StoreResult<User> {
    Ok(User {
        id: UserId(row.try_get("id").map_err(storage_err)?),
        handle: row.try_get("handle").map_err(storage_err)?,
        chat_id: row.try_get("chat_id").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        role: parse_label(row.try_get("role").map_err(storage_err)?)?,
        site_id: row
            .try_get::<_, Option<i64>>("site_id")
            .map_err(storage_err)?
            .map(SiteId),
    })
}

fn transfer_from_row(row: &Row) -> StoreResult<TransferRequest> {
    Ok(TransferRequest {
        id: TransferRequestId(row.try_get("id").map_err(storage_err)?),
        tool_id: ToolId(row.try_get("tool_id").map_err(storage_err)?),
        from_site_id: SiteId(row.try_get("from_site_id").map_err(storage_err)?),
        to_site_id: SiteId(row.try_get("to_site_id").map_err(storage_err)?),
        requester_id: UserId(row.try_get("requester_id").map_err(storage_err)?),
        approver_id: row
            .try_get::<_, Option<i64>>("approver_id")
            .map_err(storage_err)?
            .map(UserId),
        status: parse_label(row.try_get("status").map_err(storage_err)?)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        decided_at: row.try_get("decided_at").map_err(storage_err)?,
    })
}

fn check_from_row(row: &Row) -> StoreResult<InventoryCheck> {
    let tool_ids: Vec<i64> = row.try_get("tool_ids").map_err(storage_err)?;
    Ok(InventoryCheck {
        id: InventoryCheckId(row.try_get("id").map_err(storage_err)?),
        user_id: UserId(row.try_get("user_id").map_err(storage_err)?),
        site_id: SiteId(row.try_get("site_id").map_err(storage_err)?),
        performed_at: row.try_get("performed_at").map_err(storage_err)?,
        tool_ids: tool_ids.into_iter().map(ToolId).collect(),
    })
}

// ============================================================================
// PART 3: ToolStorage
// ============================================================================

#[async_trait]
impl ToolStorage for PostgresStore {
    async fn ensure_tool_name(&self, name: &str) -> StoreResult<ToolName> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO tool_names (name) VALUES ($1) \
                 ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
                 RETURNING id, name",
                &[&name],
            )
            .await
            .map_err(|e| map_db_error(e, EntityKind::ToolName, name))?;
        tool_name_from_row(&row)
    }

    async fn get_tool_name(&self, id: ToolNameId) -> StoreResult<Option<ToolName>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT id, name FROM tool_names WHERE id = $1", &[&id.0])
            .await
            .map_err(storage_err)?;
        row.as_ref().map(tool_name_from_row).transpose()
    }

    async fn create_site(&self, input: NewSite) -> StoreResult<Site> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO sites (name, location) VALUES ($1, $2) \
                 RETURNING id, name, location, foreman_id",
                &[&input.name, &input.location],
            )
            .await
            .map_err(|e| map_db_error(e, EntityKind::Site, &input.name))?;
        site_from_row(&row)
    }

    async fn get_site(&self, id: SiteId) -> StoreResult<Option<Site>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT id, name, location, foreman_id FROM sites WHERE id = $1",
                &[&id.0],
            )
            .await
            .map_err(storage_err)?;
        row.as_ref().map(site_from_row).transpose()
    }

    async fn list_sites(&self) -> StoreResult<Vec<Site>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, name, location, foreman_id FROM sites ORDER BY id",
                &[],
            )
            .await
            .map_err(storage_err)?;
        rows.iter().map(site_from_row).collect()
    }

    async fn set_site_foreman(&self, id: SiteId, foreman: Option<UserId>) -> StoreResult<Site> {
        let client = self.client().await?;
        if let Some(user_id) = foreman {
            let exists = client
                .query_opt("SELECT 1 FROM users WHERE id = $1", &[&user_id.0])
                .await
                .map_err(storage_err)?;
            if exists.is_none() {
                return Err(StoreError::not_found(EntityKind::User, user_id));
            }
        }
        let foreman_id = foreman.map(|u| u.0);
        let row = client
            .query_opt(
                "UPDATE sites SET foreman_id = $2 WHERE id = $1 \
                 RETURNING id, name, location, foreman_id",
                &[&id.0, &foreman_id],
            )
            .await
            .map_err(storage_err)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Site, id))?;
        site_from_row(&row)
    }

    async fn create_tool(&self, input: NewTool) -> StoreResult<Tool> {
        let client = self.client().await?;
        let site_id = input.site_id.map(|s| s.0);
        let sql = format!(
            "INSERT INTO tools (inventory_number, qr_code, name_id, site_id, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {TOOL_COLUMNS}"
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &input.inventory_number,
                    &input.qr_code,
                    &input.name_id.0,
                    &site_id,
                    &input.status.as_str(),
                ],
            )
            .await
            .map_err(|e| {
                map_db_error(
                    e,
                    EntityKind::Tool,
                    format!(
                        "inventory number {} / QR payload {}",
                        input.inventory_number, input.qr_code
                    ),
                )
            })?;
        tool_from_row(&row)
    }

    async fn get_tool(&self, id: ToolId) -> StoreResult<Option<Tool>> {
        let client = self.client().await?;
        let sql = format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = $1");
        let row = client
            .query_opt(&sql, &[&id.0])
            .await
            .map_err(storage_err)?;
        row.as_ref().map(tool_from_row).transpose()
    }

    async fn list_tools_at_site(&self, site: SiteId) -> StoreResult<Vec<Tool>> {
        let client = self.client().await?;
        let sql = format!("SELECT {TOOL_COLUMNS} FROM tools WHERE site_id = $1 ORDER BY id");
        let rows = client
            .query(&sql, &[&site.0])
            .await
            .map_err(storage_err)?;
        rows.iter().map(tool_from_row).collect()
    }

    async fn find_tools_by_qr_codes(
        &self,
        codes: &HashSet<String>,
        site: SiteId,
    ) -> StoreResult<Vec<Tool>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
        let client = self.client().await?;
        let sql = format!(
            "SELECT {TOOL_COLUMNS} FROM tools WHERE site_id = $1 AND qr_code = ANY($2) ORDER BY id"
        );
        let rows = client
            .query(&sql, &[&site.0, &codes])
            .await
            .map_err(storage_err)?;
        rows.iter().map(tool_from_row).collect()
    }

    async fn set_tool_status(&self, id: ToolId, status: ToolStatus) -> StoreResult<Tool> {
        let client = self.client().await?;
        let sql = format!("UPDATE tools SET status = $2 WHERE id = $1 RETURNING {TOOL_COLUMNS}");
        let row = client
            .query_opt(&sql, &[&id.0, &status.as_str()])
            .await
            .map_err(storage_err)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Tool, id))?;
        tool_from_row(&row)
    }

    async fn relocate_tool(&self, id: ToolId, site: SiteId) -> StoreResult<Tool> {
        let client = self.client().await?;
        let sql = format!("UPDATE tools SET site_id = $2 WHERE id = $1 RETURNING {TOOL_COLUMNS}");
        let row = client
            .query_opt(&sql, &[&id.0, &site.0])
            .await
            .map_err(|e| map_db_error(e, EntityKind::Tool, id))?
            .ok_or_else(|| StoreError::not_found(EntityKind::Tool, id))?;
        tool_from_row(&row)
    }
}

// ============================================================================
// PART 4: UserStorage
// ============================================================================

#[async_trait]
impl UserStorage for PostgresStore {
    async fn create_user(&self, input: NewUser) -> StoreResult<User> {
        let client = self.client().await?;
        let site_id = input.site_id.map(|s| s.0);
        let sql = format!(
            "INSERT INTO users (handle, chat_id, name, role, site_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &input.handle,
                    &input.chat_id,
                    &input.name,
                    &input.role.as_str(),
                    &site_id,
                ],
            )
            .await
            .map_err(|e| map_db_error(e, EntityKind::User, &input.handle))?;
        user_from_row(&row)
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let client = self.client().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = client
            .query_opt(&sql, &[&id.0])
            .await
            .map_err(storage_err)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_user_by_handle(&self, handle: &str) -> StoreResult<Option<User>> {
        let client = self.client().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE handle = $1");
        let row = client
            .query_opt(&sql, &[&handle])
            .await
            .map_err(storage_err)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_user(&self, id: UserId, updates: &[UserUpdate]) -> StoreResult<User> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(storage_err)?;

        let select = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
        let row = tx
            .query_opt(&select, &[&id.0])
            .await
            .map_err(storage_err)?
            .ok_or_else(|| StoreError::not_found(EntityKind::User, id))?;
        let mut user = user_from_row(&row)?;
        for update in updates {
            update.apply(&mut user);
        }

        let site_id = user.site_id.map(|s| s.0);
        let update = format!(
            "UPDATE users SET chat_id = $2, name = $3, role = $4, site_id = $5 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = tx
            .query_one(
                &update,
                &[&id.0, &user.chat_id, &user.name, &user.role.as_str(), &site_id],
            )
            .await
            .map_err(|e| map_db_error(e, EntityKind::User, id))?;
        let user = user_from_row(&row)?;
        tx.commit().await.map_err(storage_err)?;
        Ok(user)
    }

    async fn list_users_at_site(
        &self,
        site: SiteId,
        role: Option<Role>,
    ) -> StoreResult<Vec<User>> {
        let client = self.client().await?;
        let role = role.map(|r| r.as_str());
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE site_id = $1 AND ($2::TEXT IS NULL OR role = $2) ORDER BY id"
        );
        let rows = client
            .query(&sql, &[&site.0, &role])
            .await
            .map_err(storage_err)?;
        rows.iter().map(user_from_row).collect()
    }
}

// ============================================================================
// PART 5: TransferStorage
// ============================================================================

#[async_trait]
impl TransferStorage for PostgresStore {
    async fn create_transfer_request(
        &self,
        input: NewTransferRequest,
    ) -> StoreResult<TransferRequest> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO transfer_requests (tool_id, from_site_id, to_site_id, requester_id, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {TRANSFER_COLUMNS}"
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &input.tool_id.0,
                    &input.from_site_id.0,
                    &input.to_site_id.0,
                    &input.requester_id.0,
                    &TransferStatus::Pending.as_str(),
                ],
            )
            .await
            .map_err(|e| map_db_error(e, EntityKind::TransferRequest, input.tool_id))?;
        transfer_from_row(&row)
    }

    async fn get_transfer_request(
        &self,
        id: TransferRequestId,
    ) -> StoreResult<Option<TransferRequest>> {
        let client = self.client().await?;
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfer_requests WHERE id = $1");
        let row = client
            .query_opt(&sql, &[&id.0])
            .await
            .map_err(storage_err)?;
        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn list_transfer_requests(
        &self,
        filter: &TransferFilter,
    ) -> StoreResult<Vec<TransferRequest>> {
        let client = self.client().await?;
        let from_site_id = filter.from_site_id.map(|s| s.0);
        let requester_id = filter.requester_id.map(|u| u.0);
        let status = filter.status.map(|s| s.as_str());
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfer_requests \
             WHERE ($1::BIGINT IS NULL OR from_site_id = $1) \
               AND ($2::BIGINT IS NULL OR requester_id = $2) \
               AND ($3::TEXT IS NULL OR status = $3) \
             ORDER BY id"
        );
        let rows = client
            .query(&sql, &[&from_site_id, &requester_id, &status])
            .await
            .map_err(storage_err)?;
        rows.iter().map(transfer_from_row).collect()
    }

    async fn decide_transfer_request(
        &self,
        id: TransferRequestId,
        approver: UserId,
        decision: TransferDecision,
        decided_at: DateTime<Utc>,
    ) -> StoreResult<TransferRequest> {
        let mut client = self.client().await?;
        // Rolled back on drop unless committed.
        let tx = client.transaction().await.map_err(storage_err)?;

        let select = format!("SELECT {TRANSFER_COLUMNS} FROM transfer_requests WHERE id = $1 FOR UPDATE");
        let row = tx
            .query_opt(&select, &[&id.0])
            .await
            .map_err(storage_err)?
            .ok_or_else(|| StoreError::not_found(EntityKind::TransferRequest, id))?;
        let request = transfer_from_row(&row)?;
        if request.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                id,
                status: request.status,
            });
        }

        if decision == TransferDecision::Approve {
            let tool_row = tx
                .query_opt(
                    "SELECT site_id FROM tools WHERE id = $1 FOR UPDATE",
                    &[&request.tool_id.0],
                )
                .await
                .map_err(storage_err)?
                .ok_or_else(|| StoreError::not_found(EntityKind::Tool, request.tool_id))?;
            let current: Option<i64> = tool_row.try_get("site_id").map_err(storage_err)?;
            if current != Some(request.from_site_id.0) {
                return Err(StoreError::Conflict(format!(
                    "tool {} is no longer at site {}",
                    request.tool_id, request.from_site_id
                )));
            }
            tx.execute(
                "UPDATE tools SET site_id = $2 WHERE id = $1",
                &[&request.tool_id.0, &request.to_site_id.0],
            )
            .await
            .map_err(|e| map_db_error(e, EntityKind::Tool, request.tool_id))?;
            debug!(
                request_id = %id,
                tool_id = %request.tool_id,
                to_site_id = %request.to_site_id,
                "Relocated tool"
            );
        }

        let update = format!(
            "UPDATE transfer_requests SET status = $2, approver_id = $3, decided_at = $4 \
             WHERE id = $1 RETURNING {TRANSFER_COLUMNS}"
        );
        let row = tx
            .query_one(
                &update,
                &[
                    &id.0,
                    &decision.target_status().as_str(),
                    &approver.0,
                    &decided_at,
                ],
            )
            .await
            .map_err(|e| map_db_error(e, EntityKind::TransferRequest, id))?;
        let decided = transfer_from_row(&row)?;
        tx.commit().await.map_err(storage_err)?;
        Ok(decided)
    }
}

// ============================================================================
// PART 6: InventoryCheckStorage
// ============================================================================

#[async_trait]
impl InventoryCheckStorage for PostgresStore {
    async fn record_inventory_check(
        &self,
        input: NewInventoryCheck,
    ) -> StoreResult<InventoryCheck> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(storage_err)?;

        let row = tx
            .query_one(
                "INSERT INTO inventory_checks (user_id, site_id, performed_at) \
                 VALUES ($1, $2, $3) RETURNING id",
                &[&input.user_id.0, &input.site_id.0, &input.performed_at],
            )
            .await
            .map_err(|e| map_db_error(e, EntityKind::InventoryCheck, input.site_id))?;
        let check_id: i64 = row.try_get("id").map_err(storage_err)?;

        let tool_ids: Vec<i64> = input.tool_ids.iter().map(|t| t.0).collect();
        if !tool_ids.is_empty() {
            tx.execute(
                "INSERT INTO inventory_check_tools (check_id, tool_id, position) \
                 SELECT $1, t.tool_id, t.position \
                 FROM unnest($2::BIGINT[]) WITH ORDINALITY AS t(tool_id, position) \
                 ON CONFLICT DO NOTHING",
                &[&check_id, &tool_ids],
            )
            .await
            .map_err(|e| map_db_error(e, EntityKind::InventoryCheck, check_id))?;
        }
        tx.commit().await.map_err(storage_err)?;

        Ok(InventoryCheck {
            id: InventoryCheckId(check_id),
            user_id: input.user_id,
            site_id: input.site_id,
            performed_at: input.performed_at,
            tool_ids: input.tool_ids,
        })
    }

    async fn get_inventory_check(
        &self,
        id: InventoryCheckId,
    ) -> StoreResult<Option<InventoryCheck>> {
        let client = self.client().await?;
        let sql = format!("{CHECK_SELECT} WHERE c.id = $1 GROUP BY c.id");
        let row = client
            .query_opt(&sql, &[&id.0])
            .await
            .map_err(storage_err)?;
        row.as_ref().map(check_from_row).transpose()
    }

    async fn list_inventory_checks(
        &self,
        site: Option<SiteId>,
    ) -> StoreResult<Vec<InventoryCheck>> {
        let client = self.client().await?;
        let site_id = site.map(|s| s.0);
        let sql = format!(
            "{CHECK_SELECT} WHERE ($1::BIGINT IS NULL OR c.site_id = $1) \
             GROUP BY c.id ORDER BY c.id DESC"
        );
        let rows = client
            .query(&sql, &[&site_id])
            .await
            .map_err(storage_err)?;
        rows.iter().map(check_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_foreign_key_value_from_detail() {
        assert_eq!(
            foreign_key_value(r#"Key (site_id)=(5) is not present in table "sites"."#),
            Some("5")
        );
        assert_eq!(foreign_key_value("something else"), None);
    }

    #[test]
    fn maps_constraint_names_to_entities() {
        assert_eq!(referenced_entity("tools_site_id_fkey"), EntityKind::Site);
        assert_eq!(
            referenced_entity("transfer_requests_to_site_id_fkey"),
            EntityKind::Site
        );
        assert_eq!(referenced_entity("tools_name_id_fkey"), EntityKind::ToolName);
        assert_eq!(
            referenced_entity("transfer_requests_tool_id_fkey"),
            EntityKind::Tool
        );
        assert_eq!(
            referenced_entity("transfer_requests_requester_id_fkey"),
            EntityKind::User
        );
        assert_eq!(
            referenced_entity("inventory_check_tools_check_id_fkey"),
            EntityKind::InventoryCheck
        );
    }

    #[test]
    fn pool_builds_from_valid_config() {
        let store = PostgresStore::new(PostgresConfig {
            db_url: "postgres://postgres@localhost:5432/tools".to_string(),
            pool_max: 2,
        });
        assert!(store.is_ok());
    }
}
