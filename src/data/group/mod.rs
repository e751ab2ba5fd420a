use std::collections::HashMap;

use chrono::{DateTime, Utc};
use utoipa::ToSchema;

use crate::data::user::MemberRef;
use crate::resp::problem::Problem;
use crate::util;

pub mod db;

pub static GROUP_COLLECTION_NAME: &str = "groups";

/// Number of idea slots a group fills before an admin can pick the final idea.
pub const IDEA_SLOTS: u8 = 5;

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use rocket::http::Status;

    #[inline]
    pub fn not_found(id: &str) -> Problem {
        problems::not_found("Group", id)
    }

    #[inline]
    pub fn group_full(id: &str, max: usize) -> Problem {
        Problem::new_untyped(Status::Conflict, "Group is full.")
            .insert_str("id", id)
            .insert("max_members", max)
            .to_owned()
    }

    #[inline]
    pub fn already_member(user: &str) -> Problem {
        problems::conflict(
            "Already a member.",
            format!("User {} is already a member of this group.", user),
        )
    }

    #[inline]
    pub fn already_grouped(user: &str) -> Problem {
        problems::conflict(
            "Already in a group.",
            format!("User {} already belongs to a group.", user),
        )
    }

    #[inline]
    pub fn not_member() -> Problem {
        problems::forbidden("Only members of the group can do this.")
    }

    #[inline]
    pub fn bad_state(detail: impl ToString) -> Problem {
        problems::conflict("Group isn't in the right state.", detail)
    }

    #[inline]
    pub fn bad_selection(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad idea selection.")
            .detail(detail)
            .to_owned()
    }
}

/// Explicit lifecycle of a group, only moved forward by workflow operations.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    #[default]
    Searching,
    IdeasSubmitted,
    IdeaApproved,
    AdvisorRequested,
    AdvisorAssigned,
}

impl GroupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Searching => "searching",
            GroupStatus::IdeasSubmitted => "ideas_submitted",
            GroupStatus::IdeaApproved => "idea_approved",
            GroupStatus::AdvisorRequested => "advisor_requested",
            GroupStatus::AdvisorAssigned => "advisor_assigned",
        }
    }

    /// Status text shown to admins.
    pub fn label(self) -> &'static str {
        match self {
            GroupStatus::Searching => "Group just created",
            GroupStatus::IdeasSubmitted => "Need final idea approval",
            GroupStatus::IdeaApproved => "Need advisor",
            GroupStatus::AdvisorRequested => "Waiting for advisor",
            GroupStatus::AdvisorAssigned => "Under work",
        }
    }

    /// Position on the student progress tracker.
    pub fn step(self) -> u8 {
        match self {
            GroupStatus::Searching => 0,
            GroupStatus::IdeasSubmitted => 1,
            GroupStatus::IdeaApproved => 2,
            GroupStatus::AdvisorRequested => 3,
            GroupStatus::AdvisorAssigned => 4,
        }
    }
}

impl From<GroupStatus> for bson::Bson {
    fn from(status: GroupStatus) -> Self {
        bson::Bson::String(status.as_str().to_string())
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Ideas {
    #[serde(default)]
    pub idea1: String,
    #[serde(default)]
    pub idea2: String,
    #[serde(default)]
    pub idea3: String,
    #[serde(default)]
    pub idea4: String,
    #[serde(default)]
    pub idea5: String,
}

impl Ideas {
    /// Idea text by its 1-based slot number.
    pub fn slot(&self, number: u8) -> Option<&str> {
        match number {
            1 => Some(&self.idea1),
            2 => Some(&self.idea2),
            3 => Some(&self.idea3),
            4 => Some(&self.idea4),
            5 => Some(&self.idea5),
            _ => None,
        }
    }

    pub fn slots(&self) -> impl Iterator<Item = &str> {
        (1..=IDEA_SLOTS).filter_map(move |it| self.slot(it))
    }

    pub fn filled(&self) -> usize {
        self.slots().filter(|it| !util::is_blank(it)).count()
    }

    pub fn is_complete(&self) -> bool {
        self.filled() == IDEA_SLOTS as usize
    }

    fn trimmed(self) -> Ideas {
        Ideas {
            idea1: self.idea1.trim().to_string(),
            idea2: self.idea2.trim().to_string(),
            idea3: self.idea3.trim().to_string(),
            idea4: self.idea4.trim().to_string(),
            idea5: self.idea5.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskUpload {
    pub file_url: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schema(value_type = i64)]
    pub uploaded_at: DateTime<Utc>,
}

/// Result of admitting a user into a group.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Admission {
    Added,
    AlreadyMember,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Group {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,

    /// Display snapshots, in joining order.
    #[serde(default)]
    pub members: Vec<MemberRef>,
    /// Membership itself; the snapshots above follow it.
    #[serde(default)]
    pub member_ids: Vec<String>,

    #[serde(default)]
    pub ideas: Ideas,
    #[serde(default)]
    pub final_idea: Option<String>,
    #[serde(default)]
    pub advisor: Option<MemberRef>,
    #[serde(default)]
    pub status: GroupStatus,

    /// semester -> task key -> upload
    #[serde(default)]
    pub progress: HashMap<String, HashMap<String, TaskUpload>>,

    /// Bumped on every whole-document save.
    #[serde(default)]
    pub revision: i64,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(founders: Vec<MemberRef>) -> Group {
        Group {
            id: util::new_id(),
            name: None,
            member_ids: founders.iter().map(|it| it.id.clone()).collect(),
            members: founders,
            ideas: Ideas::default(),
            final_idea: None,
            advisor: None,
            status: GroupStatus::Searching,
            progress: HashMap::new(),
            revision: 0,
            created_at: util::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn has_member(&self, user: &str) -> bool {
        self.member_ids.iter().any(|it| it == user)
    }

    pub fn is_full(&self, max_members: usize) -> bool {
        self.member_ids.len() >= max_members
    }

    /// Member a join request is routed to.
    pub fn first_member(&self) -> Option<&MemberRef> {
        self.members.first()
    }

    pub fn require_member(&self, user: &str) -> Result<(), Problem> {
        if self.has_member(user) {
            Ok(())
        } else {
            Err(problem::not_member())
        }
    }

    pub fn admit(&mut self, member: MemberRef, max_members: usize) -> Result<Admission, Problem> {
        if self.has_member(&member.id) {
            return Ok(Admission::AlreadyMember);
        }
        if self.is_full(max_members) {
            return Err(problem::group_full(&self.id, max_members));
        }

        self.member_ids.push(member.id.clone());
        self.members.push(member);
        Ok(Admission::Added)
    }

    /// Removes a member; returns whether anything changed.
    pub fn remove_member(&mut self, user: &str) -> bool {
        let before = self.member_ids.len();
        self.member_ids.retain(|it| it != user);
        self.members.retain(|it| it.id != user);
        before != self.member_ids.len()
    }

    pub fn rename(&mut self, name: &str) -> Result<(), Problem> {
        let name = name.trim();
        if name.is_empty() || name.len() > 64 {
            return Err(crate::resp::problem::problems::bad_request(
                "Bad group name.",
                "Group name must be between 1 and 64 characters (bytes) long.",
            ));
        }
        self.name = Some(name.to_string());
        Ok(())
    }

    /// Replaces every idea slot. Locked once a final idea is approved.
    pub fn submit_ideas(&mut self, ideas: Ideas) -> Result<(), Problem> {
        match self.status {
            GroupStatus::Searching | GroupStatus::IdeasSubmitted => {}
            _ => {
                return Err(problem::bad_state(
                    "Ideas can't change after a final idea was approved.",
                ))
            }
        }

        self.ideas = ideas.trimmed();
        self.status = if self.ideas.is_complete() {
            GroupStatus::IdeasSubmitted
        } else {
            GroupStatus::Searching
        };
        Ok(())
    }

    /// Picks the lowest selected slot as the final idea.
    pub fn approve_idea(&mut self, selected: &[u8]) -> Result<&str, Problem> {
        match self.status {
            GroupStatus::IdeasSubmitted | GroupStatus::IdeaApproved => {}
            GroupStatus::Searching => {
                return Err(problem::bad_state(format!(
                    "All {} ideas must be submitted before approval.",
                    IDEA_SLOTS
                )))
            }
            _ => {
                return Err(problem::bad_state(
                    "The final idea can't change once an advisor was requested.",
                ))
            }
        }

        let chosen = selected
            .iter()
            .copied()
            .min()
            .ok_or_else(|| problem::bad_selection("Select at least one idea to approve."))?;

        if let Some(bad) = selected.iter().find(|it| !(1..=IDEA_SLOTS).contains(*it)) {
            return Err(problem::bad_selection(format!(
                "Idea {} doesn't exist; slots are numbered 1 to {}.",
                bad, IDEA_SLOTS
            )));
        }

        let text = self.ideas.slot(chosen).unwrap_or_default();
        if util::is_blank(text) {
            return Err(problem::bad_selection(format!("Idea {} is empty.", chosen)));
        }

        self.final_idea = Some(text.to_string());
        self.status = GroupStatus::IdeaApproved;
        Ok(self.final_idea.as_deref().unwrap_or_default())
    }

    pub fn can_request_advisor(&self) -> bool {
        self.status == GroupStatus::IdeaApproved && self.advisor.is_none()
    }

    pub fn request_advisor(&mut self) -> Result<(), Problem> {
        if !self.can_request_advisor() {
            return Err(problem::bad_state(match self.status {
                GroupStatus::Searching | GroupStatus::IdeasSubmitted => {
                    "Need final idea approval before selecting an advisor."
                }
                GroupStatus::AdvisorRequested => "An advisor request is already pending.",
                _ => "The group already has an advisor.",
            }));
        }
        self.status = GroupStatus::AdvisorRequested;
        Ok(())
    }

    pub fn assign_advisor(&mut self, advisor: MemberRef) -> Result<(), Problem> {
        if self.status != GroupStatus::AdvisorRequested {
            return Err(problem::bad_state("No advisor request is pending."));
        }
        self.advisor = Some(advisor);
        self.status = GroupStatus::AdvisorAssigned;
        Ok(())
    }

    pub fn advisor_declined(&mut self) -> Result<(), Problem> {
        if self.status != GroupStatus::AdvisorRequested {
            return Err(problem::bad_state("No advisor request is pending."));
        }
        self.status = GroupStatus::IdeaApproved;
        Ok(())
    }

    /// The assigned advisor is gone; the group looks for a new one.
    pub fn advisor_left(&mut self) {
        self.advisor = None;
        if self.status == GroupStatus::AdvisorAssigned {
            self.status = GroupStatus::IdeaApproved;
        }
    }

    pub fn is_advised_by(&self, user: &str) -> bool {
        self.advisor.as_ref().map(|it| it.id == user).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;

    fn member(id: &str) -> MemberRef {
        MemberRef {
            id: id.to_string(),
            name: format!("Student {}", id),
            image: String::new(),
        }
    }

    fn ideas(count: usize) -> Ideas {
        let text = |n: usize| {
            if n <= count {
                format!("idea number {}", n)
            } else {
                String::new()
            }
        };
        Ideas {
            idea1: text(1),
            idea2: text(2),
            idea3: text(3),
            idea4: text(4),
            idea5: text(5),
        }
    }

    fn approved_group() -> Group {
        let mut group = Group::new(vec![member("a"), member("b")]);
        group.submit_ideas(ideas(5)).unwrap();
        group.approve_idea(&[2]).unwrap();
        group
    }

    #[test]
    fn full_group_rejects_new_members() {
        let mut group = Group::new(vec![member("a"), member("b")]);
        assert_eq!(group.admit(member("c"), 3).unwrap(), Admission::Added);
        assert!(group.is_full(3));

        let err = group.admit(member("d"), 3).unwrap_err();
        assert_eq!(err.status, Status::Conflict);
        assert_eq!(group.member_ids.len(), 3);
    }

    #[test]
    fn admitting_twice_does_not_duplicate() {
        let mut group = Group::new(vec![member("a")]);
        group.admit(member("b"), 3).unwrap();

        assert_eq!(group.admit(member("b"), 3).unwrap(), Admission::AlreadyMember);
        assert_eq!(group.member_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(group.members.len(), 2);
    }

    #[test]
    fn membership_ignores_snapshot_fields() {
        let mut group = Group::new(vec![member("a")]);
        let mut renamed = member("a");
        renamed.name = "Renamed".to_string();
        renamed.image = "https://img/new.png".to_string();

        assert_eq!(group.admit(renamed, 3).unwrap(), Admission::AlreadyMember);
    }

    #[test]
    fn incomplete_ideas_keep_group_searching() {
        let mut group = Group::new(vec![member("a")]);
        group.submit_ideas(ideas(4)).unwrap();

        assert_eq!(group.status, GroupStatus::Searching);
        assert_eq!(group.status.label(), "Group just created");
        assert!(!group.can_request_advisor());
        assert!(group.request_advisor().is_err());
    }

    #[test]
    fn complete_ideas_need_final_idea_approval() {
        let mut group = Group::new(vec![member("a")]);
        group.submit_ideas(ideas(5)).unwrap();

        assert_eq!(group.status, GroupStatus::IdeasSubmitted);
        assert_eq!(group.status.label(), "Need final idea approval");
        assert!(!group.can_request_advisor());
    }

    #[test]
    fn blank_ideas_do_not_count() {
        let mut all = ideas(5);
        all.idea3 = "   ".to_string();
        assert_eq!(all.filled(), 4);
        assert!(!all.is_complete());
    }

    #[test]
    fn approval_picks_lowest_selected_idea() {
        let mut group = Group::new(vec![member("a")]);
        group.submit_ideas(ideas(5)).unwrap();

        let chosen = group.approve_idea(&[4, 2, 5]).unwrap().to_string();
        assert_eq!(chosen, "idea number 2");
        assert_eq!(group.final_idea.as_deref(), Some("idea number 2"));
        assert_eq!(group.status, GroupStatus::IdeaApproved);
        assert!(group.can_request_advisor());
    }

    #[test]
    fn approval_requires_a_selection() {
        let mut group = Group::new(vec![member("a")]);
        group.submit_ideas(ideas(5)).unwrap();

        assert_eq!(
            group.approve_idea(&[]).unwrap_err().title,
            "Bad idea selection."
        );
        assert_eq!(
            group.approve_idea(&[0, 3]).unwrap_err().status,
            Status::BadRequest
        );
        assert!(group.final_idea.is_none());
    }

    #[test]
    fn approval_requires_submitted_ideas() {
        let mut group = Group::new(vec![member("a")]);
        group.submit_ideas(ideas(2)).unwrap();

        assert_eq!(
            group.approve_idea(&[1]).unwrap_err().status,
            Status::Conflict
        );
    }

    #[test]
    fn ideas_lock_after_approval() {
        let mut group = approved_group();
        assert!(group.submit_ideas(ideas(5)).is_err());
    }

    #[test]
    fn advisor_lifecycle() {
        let mut group = approved_group();

        group.request_advisor().unwrap();
        assert_eq!(group.status, GroupStatus::AdvisorRequested);
        assert!(group.request_advisor().is_err());

        group.advisor_declined().unwrap();
        assert_eq!(group.status, GroupStatus::IdeaApproved);

        group.request_advisor().unwrap();
        group.assign_advisor(member("adv")).unwrap();
        assert_eq!(group.status, GroupStatus::AdvisorAssigned);
        assert_eq!(group.status.step(), 4);
        assert!(group.is_advised_by("adv"));
        assert!(!group.can_request_advisor());
    }

    #[test]
    fn assigning_without_request_fails() {
        let mut group = approved_group();
        assert!(group.assign_advisor(member("adv")).is_err());
        assert!(group.advisor.is_none());
    }

    #[test]
    fn removing_members_keeps_lists_in_sync() {
        let mut group = Group::new(vec![member("a"), member("b")]);

        assert!(group.remove_member("a"));
        assert!(!group.remove_member("a"));
        assert_eq!(group.member_ids, vec!["b".to_string()]);
        assert_eq!(group.members.len(), 1);
        assert_eq!(group.first_member().map(|it| it.id.as_str()), Some("b"));
    }

    #[test]
    fn rename_rejects_blank_names() {
        let mut group = Group::new(vec![member("a")]);
        assert!(group.rename("   ").is_err());
        group.rename(" Team Rocket ").unwrap();
        assert_eq!(group.display_name(), "Team Rocket");
    }

    #[test]
    fn departing_advisor_reopens_advisor_search() {
        let mut group = approved_group();
        group.request_advisor().unwrap();
        group.assign_advisor(member("adv")).unwrap();

        group.advisor_left();
        assert!(group.advisor.is_none());
        assert_eq!(group.status, GroupStatus::IdeaApproved);
        assert!(group.can_request_advisor());
    }

}
