use chrono::{DateTime, Utc};
use utoipa::ToSchema;

use crate::data::group::{Group, TaskUpload};
use crate::resp::problem::{problems, Problem};
use crate::util;

pub mod db;

pub static SEMESTER_COLLECTION_NAME: &str = "semesterTasks";

const MAX_SEMESTER_NAME: usize = 32;

/// Semester names end up in document paths, so they're kept to a safe alphabet.
pub fn validate_semester_name(name: &str) -> Result<(), Problem> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SEMESTER_NAME
        && name
            .chars()
            .all(|it| it.is_ascii_alphanumeric() || it == '-' || it == '_');

    if valid {
        Ok(())
    } else {
        Err(problems::bad_request(
            "Bad semester name.",
            format!(
                "Semester names use letters, digits, '-' and '_' and are at most {} characters long.",
                MAX_SEMESTER_NAME
            ),
        ))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskDef {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SemesterTasks {
    #[serde(rename = "_id")]
    pub id: String,
    pub semester: String,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
    /// Next unused task number.
    #[serde(default = "first_key")]
    pub next_key: u32,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
}

fn first_key() -> u32 {
    1
}

/// Admin input: ordered task names for a semester.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SemesterDefinition {
    pub semester: String,
    pub tasks: Vec<String>,
}

impl SemesterDefinition {
    pub fn validate(&self) -> Result<(), Problem> {
        validate_semester_name(&self.semester)?;
        if self.tasks.is_empty() {
            return Err(problems::bad_request(
                "Bad task list.",
                "A semester needs at least one task.",
            ));
        }
        if let Some(position) = self.tasks.iter().position(|it| util::is_blank(it)) {
            return Err(problems::bad_request(
                "Bad task list.",
                format!("Task {} has no name.", position + 1),
            ));
        }
        Ok(())
    }
}

impl SemesterTasks {
    pub fn define(definition: &SemesterDefinition) -> SemesterTasks {
        let mut semester = SemesterTasks {
            id: util::new_id(),
            semester: definition.semester.clone(),
            tasks: vec![],
            next_key: first_key(),
            created_at: util::now(),
        };
        semester.redefine(&definition.tasks);
        semester
    }

    /// Renames tasks positionally and appends keys for new ones.
    ///
    /// Keys of dropped tasks are retired rather than handed out again, so old uploads never
    /// attach to a different task.
    pub fn redefine(&mut self, names: &[String]) {
        let mut tasks = Vec::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            let key = match self.tasks.get(position) {
                Some(existing) => existing.key.clone(),
                None => {
                    let key = format!("task{}", self.next_key);
                    self.next_key += 1;
                    key
                }
            };
            tasks.push(TaskDef {
                key,
                name: name.trim().to_string(),
            });
        }
        self.tasks = tasks;
    }

    pub fn has_task(&self, key: &str) -> bool {
        self.tasks.iter().any(|it| it.key == key)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TaskStatus {
    pub key: String,
    pub name: String,
    pub upload: Option<TaskUpload>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupProgress {
    pub group_id: String,
    pub group_name: Option<String>,
    pub tasks: Vec<TaskStatus>,
    pub completed: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProgressReport {
    pub semester: String,
    pub groups: Vec<GroupProgress>,
}

pub fn progress_report(semester: &SemesterTasks, groups: &[Group]) -> ProgressReport {
    let groups = groups
        .iter()
        .map(|group| {
            let uploads = group.progress.get(&semester.semester);
            let tasks: Vec<TaskStatus> = semester
                .tasks
                .iter()
                .map(|task| TaskStatus {
                    key: task.key.clone(),
                    name: task.name.clone(),
                    upload: uploads.and_then(|it| it.get(&task.key)).cloned(),
                })
                .collect();

            GroupProgress {
                group_id: group.id.clone(),
                group_name: group.name.clone(),
                completed: tasks.iter().filter(|it| it.upload.is_some()).count(),
                tasks,
            }
        })
        .collect();

    ProgressReport {
        semester: semester.semester.clone(),
        groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::user::MemberRef;
    use std::collections::HashMap;

    fn definition(semester: &str, tasks: &[&str]) -> SemesterDefinition {
        SemesterDefinition {
            semester: semester.to_string(),
            tasks: tasks.iter().map(|it| it.to_string()).collect(),
        }
    }

    fn names(tasks: &[&str]) -> Vec<String> {
        tasks.iter().map(|it| it.to_string()).collect()
    }

    #[test]
    fn keys_are_numbered_from_one() {
        let semester = SemesterTasks::define(&definition("fall-2024", &["Proposal", "Report"]));
        let keys: Vec<&str> = semester.tasks.iter().map(|it| it.key.as_str()).collect();

        assert_eq!(keys, vec!["task1", "task2"]);
        assert!(semester.has_task("task2"));
        assert!(!semester.has_task("task3"));
    }

    #[test]
    fn renaming_keeps_keys() {
        let mut semester = SemesterTasks::define(&definition("s1", &["Proposal", "Report"]));
        semester.redefine(&names(&["Project proposal", "Final report", "Demo"]));

        assert_eq!(semester.tasks[0].key, "task1");
        assert_eq!(semester.tasks[0].name, "Project proposal");
        assert_eq!(semester.tasks[2].key, "task3");
    }

    #[test]
    fn dropped_keys_are_not_reused() {
        let mut semester = SemesterTasks::define(&definition("s1", &["A", "B", "C"]));
        semester.redefine(&names(&["A"]));
        semester.redefine(&names(&["A", "D"]));

        assert_eq!(semester.tasks[1].key, "task4");
        assert_eq!(semester.next_key, 5);
    }

    #[test]
    fn semester_names_are_path_safe() {
        assert!(validate_semester_name("fall_2024-1").is_ok());
        assert!(validate_semester_name("").is_err());
        assert!(validate_semester_name("fall.2024").is_err());
        assert!(validate_semester_name("$set").is_err());
    }

    #[test]
    fn definition_rejects_blank_tasks() {
        assert!(definition("s1", &[]).validate().is_err());
        assert!(definition("s1", &["A", " "]).validate().is_err());
        assert!(definition("s1", &["A"]).validate().is_ok());
    }

    #[test]
    fn report_lists_missing_uploads() {
        let semester = SemesterTasks::define(&definition("s1", &["Proposal", "Report"]));

        let mut group = Group::new(vec![MemberRef {
            id: "a".to_string(),
            name: "A".to_string(),
            image: String::new(),
        }]);
        let mut uploads = HashMap::new();
        uploads.insert(
            "task1".to_string(),
            TaskUpload {
                file_url: "https://files/proposal.pdf".to_string(),
                uploaded_at: util::now(),
            },
        );
        group.progress.insert("s1".to_string(), uploads);

        let report = progress_report(&semester, &[group]);
        let progress = &report.groups[0];

        assert_eq!(progress.completed, 1);
        assert!(progress.tasks[0].upload.is_some());
        assert!(progress.tasks[1].upload.is_none());
    }
}
