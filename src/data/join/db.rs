use bson::{doc, Document};
use mongodb::options::FindOptions;
use mongodb::Database;
use rocket::futures::TryStreamExt;

use crate::data::chat::db::ensure_room_in;
use crate::data::chat::ChatKind;
use crate::data::{filter, is_duplicate_key};
use crate::data::group::db::{
    find_group_in, insert_group_in, require_group_in, save_group_in, set_joined_in, GroupDbExt,
};
use crate::data::group::{self, Admission, Group};
use crate::data::notification::db::{insert_in, set_status_in};
use crate::data::notification::{Notification, NotificationKind, NotificationStatus};
use crate::data::user::db::UserDbExt;
use crate::data::user::User;
use crate::resp::problem::{problems, Problem};
use crate::store::{Store, Transaction};
use crate::util;

use super::{
    check_join, check_partner, decide_answer, problem, Answer, JoinOutcome, JoinRequest,
    JoinStatus, JOIN_REQUEST_COLLECTION_NAME,
};

pub trait JoinDbExt {
    async fn list_incoming(&self, user: &str) -> Result<Vec<JoinRequest>, Problem>;
    async fn list_outgoing(&self, user: &str) -> Result<Vec<JoinRequest>, Problem>;
}

impl JoinDbExt for Database {
    async fn list_incoming(&self, user: &str) -> Result<Vec<JoinRequest>, Problem> {
        let requests = self
            .collection::<JoinRequest>(JOIN_REQUEST_COLLECTION_NAME)
            .find(
                doc! { "receiver.id": user, "status": JoinStatus::Pending },
                FindOptions::builder().sort(doc! { "created_at": -1 }).build(),
            )
            .await?
            .try_collect()
            .await?;

        Ok(requests)
    }

    async fn list_outgoing(&self, user: &str) -> Result<Vec<JoinRequest>, Problem> {
        let requests = self
            .collection::<JoinRequest>(JOIN_REQUEST_COLLECTION_NAME)
            .find(
                doc! { "sender.id": user },
                FindOptions::builder().sort(doc! { "created_at": -1 }).build(),
            )
            .await?
            .try_collect()
            .await?;

        Ok(requests)
    }
}

pub trait JoinWorkflowExt {
    async fn request_join(
        &self,
        sender: &User,
        group: &str,
        max_members: usize,
    ) -> Result<JoinRequest, Problem>;

    async fn request_partner(&self, sender: &User, receiver: &str) -> Result<JoinRequest, Problem>;

    async fn respond_join(
        &self,
        request: &str,
        responder: &User,
        accept: bool,
        max_members: usize,
    ) -> Result<JoinOutcome, Problem>;
}

impl JoinWorkflowExt for Store {
    async fn request_join(
        &self,
        sender: &User,
        group: &str,
        max_members: usize,
    ) -> Result<JoinRequest, Problem> {
        let group = self.require_group(group).await?;
        let receiver = check_join(sender, &group, max_members)?.clone();

        let notification = Notification::to_user(
            NotificationKind::GroupJoinRequest,
            sender,
            &receiver.id,
            "Group join request",
            format!("{} wants to join your group.", sender.name),
        );
        let request = JoinRequest::new(
            sender.member_ref(),
            receiver,
            Some(group.id.clone()),
            notification.id.clone(),
        );
        let pending = doc! {
            "sender.id": sender.id.as_str(),
            "group_id": group.id.as_str(),
            "status": JoinStatus::Pending,
        };

        let mut tx = self.begin().await?;
        let result = send_request_in(&mut tx, pending, request, notification).await;
        let request = tx.finish(result).await?;

        tracing::info!(
            "User {} asked to join group {} via {}",
            sender.id,
            group.id,
            request.receiver.id
        );
        Ok(request)
    }

    async fn request_partner(&self, sender: &User, receiver: &str) -> Result<JoinRequest, Problem> {
        let receiver = self.require_user(receiver).await?;
        check_partner(sender, &receiver)?;

        let notification = Notification::to_user(
            NotificationKind::GroupRequest,
            sender,
            &receiver.id,
            "Group request",
            format!("{} wants to form a group with you.", sender.name),
        );
        let request = JoinRequest::new(
            sender.member_ref(),
            receiver.member_ref(),
            None,
            notification.id.clone(),
        );
        let pending = doc! {
            "sender.id": sender.id.as_str(),
            "receiver.id": receiver.id.as_str(),
            "group_id": null,
            "status": JoinStatus::Pending,
        };

        let mut tx = self.begin().await?;
        let result = send_request_in(&mut tx, pending, request, notification).await;
        let request = tx.finish(result).await?;

        tracing::info!("User {} asked {} to form a group", sender.id, receiver.id);
        Ok(request)
    }

    async fn respond_join(
        &self,
        request: &str,
        responder: &User,
        accept: bool,
        max_members: usize,
    ) -> Result<JoinOutcome, Problem> {
        let mut tx = self.begin().await?;
        let result = respond_in(&mut tx, request, responder, accept, max_members).await;
        tx.finish(result).await
    }
}

async fn send_request_in(
    tx: &mut Transaction<'_>,
    pending: Document,
    request: JoinRequest,
    notification: Notification,
) -> Result<JoinRequest, Problem> {
    let requests = tx.collection::<JoinRequest>(JOIN_REQUEST_COLLECTION_NAME);
    if requests
        .find_one_with_session(pending, None, tx.session())
        .await?
        .is_some()
    {
        return Err(problem::duplicate());
    }

    // the unique pending key settles requests that raced past the lookup
    match requests
        .insert_one_with_session(&request, None, tx.session())
        .await
    {
        Ok(_) => {}
        Err(e) if is_duplicate_key(&e) => return Err(problem::duplicate()),
        Err(e) => return Err(e.into()),
    }
    insert_in(tx, notification).await?;
    Ok(request)
}

async fn respond_in(
    tx: &mut Transaction<'_>,
    id: &str,
    responder: &User,
    accept: bool,
    max_members: usize,
) -> Result<JoinOutcome, Problem> {
    let requests = tx.collection::<JoinRequest>(JOIN_REQUEST_COLLECTION_NAME);
    let mut request = requests
        .find_one_with_session(filter::by_id(id), None, tx.session())
        .await?
        .ok_or_else(|| problem::not_found(id))?;

    if request.receiver.id != responder.id {
        return Err(problem::not_receiver());
    }

    let answer = decide_answer(request.status, accept)?;
    if answer == Answer::AlreadyAccepted {
        tracing::debug!("Join request {} was already accepted", id);
        let group = find_group_in(tx, doc! { "member_ids": request.sender.id.as_str() }).await?;
        return Ok(JoinOutcome { request, group });
    }

    if answer == Answer::Decline {
        resolve_in(tx, &mut request, JoinStatus::Declined).await?;
        set_status_in(tx, &request.notification_id, NotificationStatus::Declined).await?;
        insert_in(
            tx,
            Notification::to_user(
                NotificationKind::General,
                responder,
                &request.sender.id,
                "Group request declined",
                format!("{} declined your group request.", responder.name),
            ),
        )
        .await?;

        tracing::info!("Join request {} declined", id);
        return Ok(JoinOutcome {
            request,
            group: None,
        });
    }

    let group = admit_sender_in(tx, &request, responder, max_members).await?;

    let both = vec![request.sender.id.clone(), responder.id.clone()];
    set_joined_in(tx, &both, true).await?;

    resolve_in(tx, &mut request, JoinStatus::Accepted).await?;
    set_status_in(tx, &request.notification_id, NotificationStatus::Accepted).await?;
    ensure_room_in(tx, ChatKind::Group, &group.id, &group.member_ids).await?;

    insert_in(
        tx,
        Notification::to_user(
            NotificationKind::General,
            responder,
            &request.sender.id,
            "Group request accepted",
            format!("{} accepted your group request.", responder.name),
        ),
    )
    .await?;

    tracing::info!(
        "Join request {} accepted, group {} has {} members",
        id,
        group.id,
        group.member_ids.len()
    );
    Ok(JoinOutcome {
        request,
        group: Some(group),
    })
}

/// Finds or creates the group the request points at and admits the sender into it.
async fn admit_sender_in(
    tx: &mut Transaction<'_>,
    request: &JoinRequest,
    responder: &User,
    max_members: usize,
) -> Result<Group, Problem> {
    let sender_group = find_group_in(tx, doc! { "member_ids": request.sender.id.as_str() }).await?;

    let target = match &request.group_id {
        Some(group) => Some(require_group_in(tx, group).await?),
        None => find_group_in(tx, doc! { "member_ids": responder.id.as_str() }).await?,
    };

    if let Some(existing) = &sender_group {
        let same = target.as_ref().map(|it| it.id == existing.id).unwrap_or(false);
        if !same {
            return Err(group::problem::already_grouped(&request.sender.id));
        }
    }

    match target {
        Some(mut group) => {
            if request.group_id.is_some() && !group.has_member(&responder.id) {
                // membership moved on since the request was routed
                return Err(problem::not_receiver());
            }
            if group.admit(request.sender.clone(), max_members)? == Admission::Added {
                save_group_in(tx, &mut group).await?;
            }
            Ok(group)
        }
        None => {
            let mut group = Group::new(vec![responder.member_ref()]);
            group.admit(request.sender.clone(), max_members)?;
            insert_group_in(tx, &group).await?;
            tracing::info!("Created group {} for {} and {}", group.id, responder.id, request.sender.id);
            Ok(group)
        }
    }
}

async fn resolve_in(
    tx: &mut Transaction<'_>,
    request: &mut JoinRequest,
    status: JoinStatus,
) -> Result<(), Problem> {
    let resolved_at = util::now();
    let requests = tx.collection::<JoinRequest>(JOIN_REQUEST_COLLECTION_NAME);
    let result = requests
        .update_one_with_session(
            doc! { "_id": request.id.as_str(), "status": JoinStatus::Pending },
            doc! {
                "$set": { "status": status, "resolved_at": resolved_at.timestamp_millis() },
                "$unset": { "pending_key": "" },
            },
            None,
            tx.session(),
        )
        .await?;

    if result.matched_count == 0 {
        return Err(problems::concurrent_update());
    }

    request.status = status;
    request.resolved_at = Some(resolved_at);
    request.pending_key = None;
    Ok(())
}

/// Declines every pending request matching `query`, along with its notification.
pub(crate) async fn decline_pending_in(
    tx: &mut Transaction<'_>,
    query: Document,
) -> Result<u64, Problem> {
    let mut pending = query;
    pending.insert("status", JoinStatus::Pending);

    let requests = tx.collection::<JoinRequest>(JOIN_REQUEST_COLLECTION_NAME);
    let found: Vec<JoinRequest> = requests
        .find_with_session(pending.clone(), None, tx.session())
        .await?
        .stream(tx.session())
        .try_collect()
        .await?;
    if found.is_empty() {
        return Ok(0);
    }

    requests
        .update_many_with_session(
            pending,
            doc! {
                "$set": {
                    "status": JoinStatus::Declined,
                    "resolved_at": util::now().timestamp_millis(),
                },
                "$unset": { "pending_key": "" },
            },
            None,
            tx.session(),
        )
        .await?;
    for request in &found {
        set_status_in(tx, &request.notification_id, NotificationStatus::Declined).await?;
    }

    tracing::info!("Declined {} pending join requests", found.len());
    Ok(found.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::notification::NOTIFICATION_COLLECTION_NAME;
    use crate::data::user::db::UserSignupData;
    use crate::role::Role;
    use crate::store::{drop_test_store, test_store};

    async fn student(store: &Store, name: &str) -> User {
        let signup = UserSignupData {
            name: name.to_string(),
            email: format!("{}@uni.edu", name.to_lowercase()),
            password: "long enough".to_string(),
            role: None,
        };
        store.create_user(signup, Role::Student, 4).await.unwrap()
    }

    #[rocket::async_test]
    async fn accepting_partner_request_joins_both_once() {
        let Some(store) = test_store().await else { return };
        let sender = student(&store, "Sara").await;
        let receiver = student(&store, "Rami").await;

        let request = store.request_partner(&sender, &receiver.id).await.unwrap();
        let outcome = store.respond_join(&request.id, &receiver, true, 3).await.unwrap();

        let group = outcome.group.expect("group formed");
        assert_eq!(group.member_ids.len(), 2);
        assert!(store.require_user(&sender.id).await.unwrap().is_joined);
        assert!(store.require_user(&receiver.id).await.unwrap().is_joined);

        let notification = store
            .collection::<Notification>(NOTIFICATION_COLLECTION_NAME)
            .find_one(filter::by_id(&request.notification_id), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.status, NotificationStatus::Accepted);

        let again = store.respond_join(&request.id, &receiver, true, 3).await.unwrap();
        let regrouped = again.group.expect("still grouped");
        assert_eq!(regrouped.id, group.id);
        assert_eq!(store.require_group(&group.id).await.unwrap().member_ids.len(), 2);

        drop_test_store(store).await;
    }

    #[rocket::async_test]
    async fn second_pending_request_conflicts() {
        let Some(store) = test_store().await else { return };
        let sender = student(&store, "Sara").await;
        let receiver = student(&store, "Rami").await;

        let (first, second) = rocket::tokio::join!(
            store.request_partner(&sender, &receiver.id),
            store.request_partner(&sender, &receiver.id),
        );
        assert_eq!([&first, &second].iter().filter(|it| it.is_ok()).count(), 1);
        assert_eq!(store.list_incoming(&receiver.id).await.unwrap().len(), 1);

        drop_test_store(store).await;
    }
}
