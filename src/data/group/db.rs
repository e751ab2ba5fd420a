use bson::{doc, Document};
use mongodb::Database;
use rocket::futures::TryStreamExt;
use utoipa::ToSchema;

use crate::data::chat::{self, ChatKind};
use crate::data::{advisor, join};
use crate::data::filter;
use crate::data::semester::db::SemesterDbExt;
use crate::data::semester::validate_semester_name;
use crate::data::user::USER_COLLECTION_NAME;
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::store::{Store, Transaction};
use crate::util;

use super::{problem, Group, GroupStatus, Ideas, TaskUpload, GROUP_COLLECTION_NAME};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RenameGroup {
    pub name: String,
}

/// Slot numbers (1-5) an admin selected; the lowest one becomes the final idea.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IdeaSelection {
    pub ideas: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProgressUpload {
    pub semester: String,
    pub task: String,
    pub file_url: String,
}

pub trait GroupDbExt {
    async fn get_group(&self, id: &str) -> Result<Option<Group>, Problem>;
    async fn require_group(&self, id: &str) -> Result<Group, Problem>;
    async fn group_of_member(&self, user: &str) -> Result<Option<Group>, Problem>;

    async fn list_groups(&self, page: PageState) -> Result<Vec<Group>, Problem>;
    async fn all_groups(&self) -> Result<Vec<Group>, Problem>;
    async fn list_open_groups(&self, max_members: usize) -> Result<Vec<Group>, Problem>;
    async fn pending_ideas(&self) -> Result<Vec<Group>, Problem>;
    async fn advised_groups(&self, advisor: &str) -> Result<Vec<Group>, Problem>;

    async fn save_group(&self, group: &mut Group) -> Result<(), Problem>;

    async fn rename_group(&self, id: &str, user: &str, name: &str) -> Result<Group, Problem>;
    async fn save_ideas(&self, id: &str, user: &str, ideas: Ideas) -> Result<Group, Problem>;
    async fn approve_idea(&self, id: &str, selected: &[u8]) -> Result<Group, Problem>;
    async fn record_progress(
        &self,
        id: &str,
        user: &str,
        upload: &ProgressUpload,
    ) -> Result<Group, Problem>;
}

impl GroupDbExt for Database {
    async fn get_group(&self, id: &str) -> Result<Option<Group>, Problem> {
        self.collection::<Group>(GROUP_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn require_group(&self, id: &str) -> Result<Group, Problem> {
        self.get_group(id)
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn group_of_member(&self, user: &str) -> Result<Option<Group>, Problem> {
        self.collection::<Group>(GROUP_COLLECTION_NAME)
            .find_one(doc! { "member_ids": user }, None)
            .await
            .map_err(Problem::from)
    }

    async fn list_groups(&self, page: PageState) -> Result<Vec<Group>, Problem> {
        let groups = self
            .collection::<Group>(GROUP_COLLECTION_NAME)
            .find(doc! {}, page.find_options(doc! { "created_at": -1 }))
            .await?
            .try_collect()
            .await?;

        Ok(groups)
    }

    async fn all_groups(&self) -> Result<Vec<Group>, Problem> {
        let groups = self
            .collection::<Group>(GROUP_COLLECTION_NAME)
            .find(doc! {}, None)
            .await?
            .try_collect()
            .await?;

        Ok(groups)
    }

    async fn list_open_groups(&self, max_members: usize) -> Result<Vec<Group>, Problem> {
        let groups = self
            .collection::<Group>(GROUP_COLLECTION_NAME)
            .find(open_filter(max_members), None)
            .await?
            .try_collect()
            .await?;

        Ok(groups)
    }

    async fn pending_ideas(&self) -> Result<Vec<Group>, Problem> {
        let groups = self
            .collection::<Group>(GROUP_COLLECTION_NAME)
            .find(doc! { "status": GroupStatus::IdeasSubmitted }, None)
            .await?
            .try_collect()
            .await?;

        Ok(groups)
    }

    async fn advised_groups(&self, advisor: &str) -> Result<Vec<Group>, Problem> {
        let groups = self
            .collection::<Group>(GROUP_COLLECTION_NAME)
            .find(doc! { "advisor.id": advisor }, None)
            .await?
            .try_collect()
            .await?;

        Ok(groups)
    }

    async fn save_group(&self, group: &mut Group) -> Result<(), Problem> {
        let read_at = group.revision;
        group.revision += 1;

        let result = self
            .collection::<Group>(GROUP_COLLECTION_NAME)
            .replace_one(filter::by_revision(&group.id, read_at), &*group, None)
            .await?;

        if result.matched_count == 0 {
            group.revision = read_at;
            tracing::warn!("Group {} changed since revision {}", group.id, read_at);
            return Err(problems::concurrent_update());
        }
        Ok(())
    }

    async fn rename_group(&self, id: &str, user: &str, name: &str) -> Result<Group, Problem> {
        let mut group = self.require_group(id).await?;
        group.require_member(user)?;
        group.rename(name)?;
        self.save_group(&mut group).await?;
        Ok(group)
    }

    async fn save_ideas(&self, id: &str, user: &str, ideas: Ideas) -> Result<Group, Problem> {
        let mut group = self.require_group(id).await?;
        group.require_member(user)?;
        group.submit_ideas(ideas)?;
        self.save_group(&mut group).await?;

        tracing::info!(
            "Group {} saved {} ideas, status: {}",
            group.id,
            group.ideas.filled(),
            group.status.as_str()
        );
        Ok(group)
    }

    async fn approve_idea(&self, id: &str, selected: &[u8]) -> Result<Group, Problem> {
        let mut group = self.require_group(id).await?;
        group.approve_idea(selected)?;
        self.save_group(&mut group).await?;

        tracing::info!("Final idea approved for group {}", group.id);
        Ok(group)
    }

    async fn record_progress(
        &self,
        id: &str,
        user: &str,
        upload: &ProgressUpload,
    ) -> Result<Group, Problem> {
        validate_semester_name(&upload.semester)?;
        if util::is_blank(&upload.file_url) {
            return Err(problems::bad_request(
                "Bad upload.",
                "An uploaded file URL is required.",
            ));
        }

        let semester = self.require_semester(&upload.semester).await?;
        if !semester.has_task(&upload.task) {
            return Err(problems::not_found("Task", &upload.task));
        }

        let group = self.require_group(id).await?;
        group.require_member(user)?;

        let entry = TaskUpload {
            file_url: upload.file_url.trim().to_string(),
            uploaded_at: util::now(),
        };
        let update = upload_update(&semester.semester, &upload.task, &entry)?;

        let updated = self
            .collection::<Group>(GROUP_COLLECTION_NAME)
            .find_one_and_update(
                doc! { "_id": id, "member_ids": user },
                update,
                mongodb::options::FindOneAndUpdateOptions::builder()
                    .return_document(mongodb::options::ReturnDocument::After)
                    .build(),
            )
            .await?
            .ok_or_else(problem::not_member)?;

        Ok(updated)
    }
}

/// Sets one deliverable and bumps the revision, so saves of an older snapshot can't drop it.
pub fn upload_update(semester: &str, task: &str, entry: &TaskUpload) -> Result<Document, Problem> {
    let mut set = Document::new();
    set.insert(format!("progress.{}.{}", semester, task), bson::to_bson(entry)?);

    Ok(doc! {
        "$set": set,
        "$inc": { "revision": 1_i64 },
    })
}

/// Groups that still have a free seat.
pub fn open_filter(max_members: usize) -> Document {
    let mut query = Document::new();
    query.insert(
        format!("member_ids.{}", max_members.max(1) - 1),
        doc! { "$exists": false },
    );
    query
}

pub(crate) async fn find_group_in(
    tx: &mut Transaction<'_>,
    query: Document,
) -> Result<Option<Group>, Problem> {
    let groups = tx.collection::<Group>(GROUP_COLLECTION_NAME);
    Ok(groups.find_one_with_session(query, None, tx.session()).await?)
}

pub(crate) async fn require_group_in(tx: &mut Transaction<'_>, id: &str) -> Result<Group, Problem> {
    find_group_in(tx, filter::by_id(id))
        .await?
        .ok_or_else(|| problem::not_found(id))
}

pub(crate) async fn insert_group_in(tx: &mut Transaction<'_>, group: &Group) -> Result<(), Problem> {
    let groups = tx.collection::<Group>(GROUP_COLLECTION_NAME);
    groups
        .insert_one_with_session(group, None, tx.session())
        .await?;
    Ok(())
}

/// Revision-guarded replace inside a workflow.
pub(crate) async fn save_group_in(tx: &mut Transaction<'_>, group: &mut Group) -> Result<(), Problem> {
    let read_at = group.revision;
    group.revision += 1;

    let groups = tx.collection::<Group>(GROUP_COLLECTION_NAME);
    let result = groups
        .replace_one_with_session(
            filter::by_revision(&group.id, read_at),
            &*group,
            None,
            tx.session(),
        )
        .await?;

    if result.matched_count == 0 {
        group.revision = read_at;
        return Err(problems::concurrent_update());
    }
    Ok(())
}

pub(crate) async fn set_joined_in(
    tx: &mut Transaction<'_>,
    users: &[String],
    joined: bool,
) -> Result<(), Problem> {
    let collection = tx.collection::<Document>(USER_COLLECTION_NAME);
    collection
        .update_many_with_session(
            filter::by_ids(users),
            doc! { "$set": { "is_joined": joined } },
            None,
            tx.session(),
        )
        .await?;
    Ok(())
}

/// Admin moderation; each runs as a single workflow.
pub trait GroupModerationExt {
    async fn remove_member(&self, group: &str, user: &str) -> Result<Option<Group>, Problem>;
    async fn delete_group(&self, group: &str) -> Result<Group, Problem>;
}

impl GroupModerationExt for Store {
    async fn remove_member(&self, group: &str, user: &str) -> Result<Option<Group>, Problem> {
        let mut tx = self.begin().await?;
        let result = remove_member_in(&mut tx, group, user).await;
        tx.finish(result).await
    }

    async fn delete_group(&self, group: &str) -> Result<Group, Problem> {
        let mut tx = self.begin().await?;
        let result = delete_group_in(&mut tx, group).await;
        tx.finish(result).await
    }
}

pub(crate) async fn remove_member_in(
    tx: &mut Transaction<'_>,
    id: &str,
    user: &str,
) -> Result<Option<Group>, Problem> {
    let mut group = require_group_in(tx, id).await?;
    if !group.remove_member(user) {
        return Err(problems::not_found("Group member", user));
    }

    set_joined_in(tx, &[user.to_string()], false).await?;
    chat::db::leave_group_rooms_in(tx, id, user).await?;

    if group.member_ids.is_empty() {
        tracing::info!("Removed last member {}, deleting group {}", user, id);
        dissolve_in(tx, &group).await?;
        return Ok(None);
    }

    save_group_in(tx, &mut group).await?;
    tracing::info!("Removed member {} from group {}", user, id);
    Ok(Some(group))
}

async fn delete_group_in(tx: &mut Transaction<'_>, id: &str) -> Result<Group, Problem> {
    let group = require_group_in(tx, id).await?;

    set_joined_in(tx, &group.member_ids, false).await?;
    dissolve_in(tx, &group).await?;

    tracing::info!("Deleted group {} ({} members)", id, group.member_ids.len());
    Ok(group)
}

/// Deletes the group along with its rooms and the requests still waiting on it.
async fn dissolve_in(tx: &mut Transaction<'_>, group: &Group) -> Result<(), Problem> {
    let groups = tx.collection::<Group>(GROUP_COLLECTION_NAME);
    let result = groups
        .delete_one_with_session(
            filter::by_revision(&group.id, group.revision),
            None,
            tx.session(),
        )
        .await?;
    if result.deleted_count == 0 {
        return Err(problems::concurrent_update());
    }

    chat::db::close_group_rooms_in(tx, &group.id).await?;
    advisor::db::reject_pending_in(tx, doc! { "group_id": group.id.as_str() }).await?;
    join::db::decline_pending_in(tx, doc! { "group_id": group.id.as_str() }).await?;
    Ok(())
}

/// Takes a departing advisor off every group they advise or were asked to advise.
pub(crate) async fn release_advisor_in(tx: &mut Transaction<'_>, advisor: &str) -> Result<(), Problem> {
    let asked = advisor::db::reject_pending_in(tx, doc! { "advisor.id": advisor }).await?;
    for request in asked {
        if let Some(mut group) = find_group_in(tx, filter::by_id(&request.group_id)).await? {
            if group.advisor_declined().is_ok() {
                save_group_in(tx, &mut group).await?;
            }
        }
    }

    let groups = tx.collection::<Group>(GROUP_COLLECTION_NAME);
    let advised: Vec<Group> = groups
        .find_with_session(doc! { "advisor.id": advisor }, None, tx.session())
        .await?
        .stream(tx.session())
        .try_collect()
        .await?;
    for mut group in advised {
        group.advisor_left();
        save_group_in(tx, &mut group).await?;

        let rooms = tx.collection::<Document>(&ChatKind::AdvisorGroup.rooms_collection());
        rooms
            .update_one_with_session(
                filter::by_id(&group.id),
                doc! { "$pull": { "members": advisor } },
                None,
                tx.session(),
            )
            .await?;
        tracing::info!("Advisor {} left group {}", advisor, group.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_filter_checks_last_seat() {
        let query = open_filter(3);
        let seat = query.get_document("member_ids.2").unwrap();
        assert_eq!(seat.get_bool("$exists").unwrap(), false);
    }

    #[test]
    fn open_filter_handles_zero_capacity() {
        assert!(open_filter(0).contains_key("member_ids.0"));
    }

    #[test]
    fn upload_update_bumps_revision() {
        let entry = TaskUpload {
            file_url: "https://files.example/report.pdf".to_string(),
            uploaded_at: util::now(),
        };
        let update = upload_update("fall-2024", "task2", &entry).unwrap();

        let set = update.get_document("$set").unwrap();
        let stored = set.get_document("progress.fall-2024.task2").unwrap();
        assert_eq!(stored.get_str("file_url").unwrap(), "https://files.example/report.pdf");
        assert_eq!(
            update.get_document("$inc").unwrap().get_i64("revision").unwrap(),
            1
        );
    }

    #[test]
    fn idea_selection_parses_slot_numbers() {
        let selection: IdeaSelection = serde_json::from_str(r#"{"ideas":[3,1]}"#).unwrap();
        assert_eq!(selection.ideas, vec![3, 1]);
    }
}
