use bson::{doc, Document};
use mongodb::options::FindOptions;
use mongodb::Database;
use rocket::futures::TryStreamExt;

use crate::data::chat::db::ensure_room_in;
use crate::data::chat::ChatKind;
use crate::data::filter;
use crate::data::group::db::{require_group_in, save_group_in, GroupDbExt};
use crate::data::notification::db::insert_in;
use crate::data::notification::{Notification, NotificationKind};
use crate::data::user::db::UserDbExt;
use crate::data::user::User;
use crate::resp::problem::{problems, Problem};
use crate::store::{Store, Transaction};
use crate::util;

use super::{
    check_request, problem, AdvisorOutcome, AdvisorRequest, AdvisorRequestDetails, AdvisorStatus,
    ADVISOR_REQUEST_COLLECTION_NAME,
};

pub trait AdvisorDbExt {
    async fn list_for_advisor(&self, advisor: &str) -> Result<Vec<AdvisorRequestDetails>, Problem>;
}

impl AdvisorDbExt for Database {
    async fn list_for_advisor(&self, advisor: &str) -> Result<Vec<AdvisorRequestDetails>, Problem> {
        let requests: Vec<AdvisorRequest> = self
            .collection::<AdvisorRequest>(ADVISOR_REQUEST_COLLECTION_NAME)
            .find(
                doc! { "advisor.id": advisor, "status": AdvisorStatus::Pending },
                FindOptions::builder().sort(doc! { "created_at": -1 }).build(),
            )
            .await?
            .try_collect()
            .await?;

        let mut details = Vec::with_capacity(requests.len());
        for request in requests {
            let group = self.get_group(&request.group_id).await?;
            if group.is_none() {
                tracing::warn!(
                    "Advisor request {} points at missing group {}",
                    request.id,
                    request.group_id
                );
            }
            details.push(AdvisorRequestDetails { request, group });
        }
        Ok(details)
    }
}

pub trait AdvisorWorkflowExt {
    async fn request_advisor(
        &self,
        requester: &User,
        group: &str,
        advisor: &str,
    ) -> Result<AdvisorRequest, Problem>;

    async fn respond_advisor(
        &self,
        request: &str,
        advisor: &User,
        approve: bool,
    ) -> Result<AdvisorOutcome, Problem>;
}

impl AdvisorWorkflowExt for Store {
    async fn request_advisor(
        &self,
        requester: &User,
        group: &str,
        advisor: &str,
    ) -> Result<AdvisorRequest, Problem> {
        let advisor = self.require_user(advisor).await?;

        let mut tx = self.begin().await?;
        let result = request_in(&mut tx, requester, group, &advisor).await;
        tx.finish(result).await
    }

    async fn respond_advisor(
        &self,
        request: &str,
        advisor: &User,
        approve: bool,
    ) -> Result<AdvisorOutcome, Problem> {
        let mut tx = self.begin().await?;
        let result = respond_in(&mut tx, request, advisor, approve).await;
        tx.finish(result).await
    }
}

async fn request_in(
    tx: &mut Transaction<'_>,
    requester: &User,
    group: &str,
    advisor: &User,
) -> Result<AdvisorRequest, Problem> {
    let mut group = require_group_in(tx, group).await?;
    check_request(&group, &requester.id, advisor)?;

    group.request_advisor()?;
    save_group_in(tx, &mut group).await?;

    let request = AdvisorRequest::new(&group, advisor.member_ref(), &requester.id);
    let requests = tx.collection::<AdvisorRequest>(ADVISOR_REQUEST_COLLECTION_NAME);
    requests
        .insert_one_with_session(&request, None, tx.session())
        .await?;

    insert_in(
        tx,
        Notification::to_user(
            NotificationKind::AdvisorRequest,
            requester,
            &advisor.id,
            "Advisor request",
            format!(
                "Group {} asks you to advise their project: {}",
                group.display_name(),
                group.final_idea.as_deref().unwrap_or_default()
            ),
        ),
    )
    .await?;

    tracing::info!("Group {} requested advisor {}", group.id, advisor.id);
    Ok(request)
}

async fn respond_in(
    tx: &mut Transaction<'_>,
    id: &str,
    advisor: &User,
    approve: bool,
) -> Result<AdvisorOutcome, Problem> {
    let requests = tx.collection::<AdvisorRequest>(ADVISOR_REQUEST_COLLECTION_NAME);
    let mut request = requests
        .find_one_with_session(filter::by_id(id), None, tx.session())
        .await?
        .ok_or_else(|| problem::not_found(id))?;

    if request.advisor.id != advisor.id {
        return Err(problem::not_addressed());
    }
    if request.status != AdvisorStatus::Pending {
        return Err(problems::conflict(
            "Request already answered.",
            format!("The request was already {}.", request.status.as_str()),
        ));
    }

    let mut group = require_group_in(tx, &request.group_id).await?;
    let (status, title, message) = if approve {
        group.assign_advisor(advisor.member_ref())?;
        (
            AdvisorStatus::Approved,
            "Advisor request approved",
            format!("{} is now advising your group.", advisor.name),
        )
    } else {
        group.advisor_declined()?;
        (
            AdvisorStatus::Rejected,
            "Advisor request rejected",
            format!("{} declined to advise your group.", advisor.name),
        )
    };
    save_group_in(tx, &mut group).await?;

    let resolved_at = util::now();
    let result = requests
        .update_one_with_session(
            doc! { "_id": id, "status": AdvisorStatus::Pending },
            doc! { "$set": { "status": status, "resolved_at": resolved_at.timestamp_millis() } },
            None,
            tx.session(),
        )
        .await?;
    if result.matched_count == 0 {
        return Err(problems::concurrent_update());
    }
    request.status = status;
    request.resolved_at = Some(resolved_at);

    if approve {
        let mut members = group.member_ids.clone();
        members.push(advisor.id.clone());
        ensure_room_in(tx, ChatKind::AdvisorGroup, &group.id, &members).await?;
    }

    for member in group.member_ids.clone() {
        insert_in(
            tx,
            Notification::to_user(
                NotificationKind::AdvisorResponse,
                advisor,
                member,
                title,
                &message,
            ),
        )
        .await?;
    }

    tracing::info!(
        "Advisor {} {} group {}",
        advisor.id,
        status.as_str(),
        group.id
    );
    Ok(AdvisorOutcome { request, group })
}

/// Rejects every pending request matching `query` and returns them.
pub(crate) async fn reject_pending_in(
    tx: &mut Transaction<'_>,
    query: Document,
) -> Result<Vec<AdvisorRequest>, Problem> {
    let mut pending = query;
    pending.insert("status", AdvisorStatus::Pending);

    let requests = tx.collection::<AdvisorRequest>(ADVISOR_REQUEST_COLLECTION_NAME);
    let found: Vec<AdvisorRequest> = requests
        .find_with_session(pending.clone(), None, tx.session())
        .await?
        .stream(tx.session())
        .try_collect()
        .await?;

    if !found.is_empty() {
        requests
            .update_many_with_session(
                pending,
                doc! { "$set": {
                    "status": AdvisorStatus::Rejected,
                    "resolved_at": util::now().timestamp_millis(),
                } },
                None,
                tx.session(),
            )
            .await?;
        tracing::info!("Rejected {} pending advisor requests", found.len());
    }
    Ok(found)
}
