use bson::doc;
use mongodb::Database;
use rocket::futures::TryStreamExt;

use crate::data::group::db::GroupDbExt;
use crate::data::user::User;
use crate::data::filter;
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::store::{Store, Transaction};

use super::{
    validate_message, visibility_filter, BroadcastData, GroupMessage, Notification,
    NotificationKind, NotificationStatus, NOTIFICATION_COLLECTION_NAME,
};

pub trait NotificationDbExt {
    async fn list_for_user(
        &self,
        user: &str,
        role: Role,
        page: PageState,
    ) -> Result<Vec<Notification>, Problem>;
    async fn unread_count(&self, user: &str, role: Role) -> Result<u64, Problem>;
    async fn mark_all_read(&self, user: &str, role: Role) -> Result<u64, Problem>;
    async fn set_status(
        &self,
        id: &str,
        user: &str,
        role: Role,
        status: NotificationStatus,
    ) -> Result<(), Problem>;
}

impl NotificationDbExt for Database {
    async fn list_for_user(
        &self,
        user: &str,
        role: Role,
        page: PageState,
    ) -> Result<Vec<Notification>, Problem> {
        let notifications = self
            .collection::<Notification>(NOTIFICATION_COLLECTION_NAME)
            .find(
                visibility_filter(user, role),
                page.find_options(doc! { "created_at": -1 }),
            )
            .await?
            .try_collect()
            .await?;

        Ok(notifications)
    }

    async fn unread_count(&self, user: &str, role: Role) -> Result<u64, Problem> {
        let mut query = visibility_filter(user, role);
        query.insert("status", NotificationStatus::Unread);

        Ok(self
            .collection::<Notification>(NOTIFICATION_COLLECTION_NAME)
            .count_documents(query, None)
            .await?)
    }

    async fn mark_all_read(&self, user: &str, role: Role) -> Result<u64, Problem> {
        let mut query = visibility_filter(user, role);
        query.insert("status", NotificationStatus::Unread);

        let result = self
            .collection::<Notification>(NOTIFICATION_COLLECTION_NAME)
            .update_many(
                query,
                doc! { "$set": { "status": NotificationStatus::Read } },
                None,
            )
            .await?;

        tracing::debug!("Marked {} notifications read for {}", result.modified_count, user);
        Ok(result.modified_count)
    }

    async fn set_status(
        &self,
        id: &str,
        user: &str,
        role: Role,
        status: NotificationStatus,
    ) -> Result<(), Problem> {
        let mut query = visibility_filter(user, role);
        query.insert("_id", id);

        let result = self
            .collection::<Notification>(NOTIFICATION_COLLECTION_NAME)
            .update_one(query, doc! { "$set": { "status": status } }, None)
            .await?;
        if result.matched_count == 0 {
            return Err(problems::not_found("Notification", id));
        }
        Ok(())
    }
}

/// Stores a notification as part of a workflow; it's delivered live after commit.
pub(crate) async fn insert_in(
    tx: &mut Transaction<'_>,
    notification: Notification,
) -> Result<(), Problem> {
    let notifications = tx.collection::<Notification>(NOTIFICATION_COLLECTION_NAME);
    notifications
        .insert_one_with_session(&notification, None, tx.session())
        .await?;
    tx.announce(notification);
    Ok(())
}

pub(crate) async fn set_status_in(
    tx: &mut Transaction<'_>,
    id: &str,
    status: NotificationStatus,
) -> Result<(), Problem> {
    let notifications = tx.collection::<Notification>(NOTIFICATION_COLLECTION_NAME);
    notifications
        .update_one_with_session(
            filter::by_id(id),
            doc! { "$set": { "status": status } },
            None,
            tx.session(),
        )
        .await?;
    Ok(())
}

pub trait NotificationFanOutExt {
    async fn broadcast(&self, sender: &User, data: &BroadcastData) -> Result<Notification, Problem>;
    async fn notify_group(
        &self,
        sender: &User,
        group: &str,
        data: &GroupMessage,
    ) -> Result<Vec<Notification>, Problem>;
}

impl NotificationFanOutExt for Store {
    async fn broadcast(&self, sender: &User, data: &BroadcastData) -> Result<Notification, Problem> {
        if !sender.role.is_admin() {
            return Err(problems::forbidden("Only admins can broadcast notifications."));
        }
        validate_message(&data.title, &data.message)?;

        let notification = Notification::broadcast(
            sender,
            data.target,
            data.title.trim(),
            data.message.trim(),
        );
        self.collection::<Notification>(NOTIFICATION_COLLECTION_NAME)
            .insert_one(&notification, None)
            .await?;

        tracing::info!(
            "Broadcast {} to {}",
            notification.id,
            data.target.as_str()
        );
        self.publish(vec![notification.clone()]);
        Ok(notification)
    }

    async fn notify_group(
        &self,
        sender: &User,
        group: &str,
        data: &GroupMessage,
    ) -> Result<Vec<Notification>, Problem> {
        validate_message(&data.title, &data.message)?;

        let group = self.require_group(group).await?;
        if !group.is_advised_by(&sender.id) && !sender.role.is_admin() {
            return Err(problems::forbidden(
                "Only the group's advisor can message its members.",
            ));
        }

        let notifications: Vec<Notification> = group
            .member_ids
            .iter()
            .map(|member| {
                Notification::to_user(
                    NotificationKind::General,
                    sender,
                    member,
                    data.title.trim(),
                    data.message.trim(),
                )
            })
            .collect();

        if notifications.is_empty() {
            return Ok(notifications);
        }

        self.collection::<Notification>(NOTIFICATION_COLLECTION_NAME)
            .insert_many(&notifications, None)
            .await?;

        tracing::info!(
            "Notified {} members of group {}",
            notifications.len(),
            group.id
        );
        self.publish(notifications.clone());
        Ok(notifications)
    }
}
