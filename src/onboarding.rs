//! User registration and foreman confirmation.

use std::sync::Arc;

use tool_store::{NewUser, Role, SiteId, User, UserId, UserStorage, UserUpdate};
use tracing::{info, warn};

use crate::{
    error::{InventoryError, InventoryResult},
    notify::{DeliveryStatus, Notification, NotificationGateway},
    registry::ToolRegistry,
    session::CompletedRegistration,
};

pub const NO_NAME_LABEL: &str = "No name";

/// User state after a confirmation step, plus how the user was told
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub user: User,
    pub delivery: DeliveryStatus,
}

/// Handles always carry a leading `@`
pub fn normalize_handle(handle: &str) -> String {
    let trimmed = handle.trim().trim_start_matches('@');
    format!("@{trimmed}")
}

/// Display name of a user, or the default label
pub fn display_name(user: &User) -> &str {
    user.name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(NO_NAME_LABEL)
}

#[derive(Clone)]
pub struct UserOnboarding {
    users: Arc<dyn UserStorage>,
    registry: ToolRegistry,
    gateway: NotificationGateway,
}

impl UserOnboarding {
    pub fn new(
        users: Arc<dyn UserStorage>,
        registry: ToolRegistry,
        gateway: NotificationGateway,
    ) -> Self {
        Self {
            users,
            registry,
            gateway,
        }
    }

    pub async fn get_user(&self, id: UserId) -> InventoryResult<User> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| InventoryError::not_found("User", id))
    }

    pub async fn find_by_handle(&self, handle: &str) -> InventoryResult<Option<User>> {
        Ok(self.users.get_user_by_handle(&normalize_handle(handle)).await?)
    }

    /// Create a user directly with a role and optional site
    pub async fn enroll(
        &self,
        handle: &str,
        name: Option<&str>,
        role: Role,
        site: Option<SiteId>,
    ) -> InventoryResult<User> {
        let user = self
            .users
            .create_user(NewUser {
                handle: normalize_handle(handle),
                chat_id: None,
                name: name.map(str::to_string),
                role,
                site_id: site,
            })
            .await?;
        if role == Role::Foreman {
            if let Some(site_id) = site {
                self.registry.assign_foreman(site_id, user.id).await?;
            }
        }
        info!(user_id = %user.id, handle = %user.handle, role = %role, "Enrolled user");
        Ok(user)
    }

    /// First contact: returns the existing user or creates a pending one.
    /// A newly seen chat id is remembered for later notifications.
    pub async fn register(&self, handle: &str, chat_id: Option<i64>) -> InventoryResult<User> {
        let handle = normalize_handle(handle);
        if let Some(existing) = self.users.get_user_by_handle(&handle).await? {
            if chat_id.is_some() && existing.chat_id != chat_id {
                return Ok(self
                    .users
                    .update_user(existing.id, &[UserUpdate::ChatId(chat_id)])
                    .await?);
            }
            return Ok(existing);
        }

        let user = self
            .users
            .create_user(NewUser {
                handle,
                chat_id,
                ..Default::default()
            })
            .await?;
        info!(user_id = %user.id, handle = %user.handle, "Registered pending user");
        Ok(user)
    }

    /// Record the name and requested site collected by the dialog. The role
    /// stays `pending`; the site's foreman, if any, is told about it.
    pub async fn submit_registration(
        &self,
        registration: &CompletedRegistration,
    ) -> InventoryResult<RegistrationOutcome> {
        let site = self.registry.get_site(registration.site_id).await?;
        let handle = normalize_handle(&registration.handle);
        let user = self
            .users
            .get_user_by_handle(&handle)
            .await?
            .ok_or_else(|| InventoryError::not_found("User", &handle))?;

        let user = self
            .users
            .update_user(
                user.id,
                &[
                    UserUpdate::Name(Some(registration.name.clone())),
                    UserUpdate::Site(Some(site.id)),
                    UserUpdate::Role(Role::Pending),
                ],
            )
            .await?;
        info!(user_id = %user.id, site_id = %site.id, "Registration submitted");

        let delivery = match site.foreman_id {
            Some(foreman_id) => match self.users.get_user(foreman_id).await {
                Ok(Some(foreman)) => {
                    self.gateway
                        .notify_user(
                            &foreman,
                            &Notification::RegistrationSubmitted {
                                handle: user.handle.clone(),
                                name: display_name(&user).to_string(),
                            },
                        )
                        .await
                }
                Ok(None) => DeliveryStatus::NoRecipient,
                Err(e) => {
                    warn!(foreman_id = %foreman_id, error = %e, "Could not look up site foreman");
                    DeliveryStatus::Failed(e.to_string())
                }
            },
            None => DeliveryStatus::NoRecipient,
        };
        Ok(RegistrationOutcome { user, delivery })
    }

    /// Promote a pending user to worker at the foreman's site
    pub async fn approve_registration(
        &self,
        user_id: UserId,
        foreman_id: UserId,
    ) -> InventoryResult<RegistrationOutcome> {
        let foreman = self.get_user(foreman_id).await?;
        let site_id = foreman.site_id.ok_or_else(|| {
            InventoryError::InvalidInput(format!("foreman {} has no site", foreman.handle))
        })?;
        let site = self.registry.get_site(site_id).await?;

        let user = self
            .users
            .update_user(
                user_id,
                &[UserUpdate::Role(Role::Worker), UserUpdate::Site(Some(site_id))],
            )
            .await?;
        info!(user_id = %user.id, site_id = %site_id, approver = %foreman_id, "Registration approved");

        let delivery = self
            .gateway
            .notify_user(
                &user,
                &Notification::RegistrationApproved { site: site.name },
            )
            .await;
        Ok(RegistrationOutcome { user, delivery })
    }

    /// Return a user to `pending` with no site
    pub async fn reject_registration(&self, user_id: UserId) -> InventoryResult<RegistrationOutcome> {
        let user = self
            .users
            .update_user(
                user_id,
                &[UserUpdate::Role(Role::Pending), UserUpdate::Site(None)],
            )
            .await?;
        info!(user_id = %user.id, "Registration rejected");

        let delivery = self
            .gateway
            .notify_user(&user, &Notification::RegistrationRejected)
            .await;
        Ok(RegistrationOutcome { user, delivery })
    }

    pub async fn pending_registrations(&self, site: SiteId) -> InventoryResult<Vec<User>> {
        Ok(self
            .users
            .list_users_at_site(site, Some(Role::Pending))
            .await?)
    }

    pub async fn workers_at_site(&self, site: SiteId) -> InventoryResult<Vec<User>> {
        Ok(self
            .users
            .list_users_at_site(site, Some(Role::Worker))
            .await?)
    }
}
