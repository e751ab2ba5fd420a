use bson::doc;
use mongodb::Database;
use rocket::futures::TryStreamExt;

use crate::data::filter;
use crate::resp::problem::{problems, Problem};

use super::{SemesterDefinition, SemesterTasks, SEMESTER_COLLECTION_NAME};

pub trait SemesterDbExt {
    async fn define_tasks(&self, definition: &SemesterDefinition) -> Result<SemesterTasks, Problem>;
    async fn list_semesters(&self) -> Result<Vec<SemesterTasks>, Problem>;
    async fn get_semester(&self, semester: &str) -> Result<Option<SemesterTasks>, Problem>;
    async fn require_semester(&self, semester: &str) -> Result<SemesterTasks, Problem>;
}

impl SemesterDbExt for Database {
    async fn define_tasks(&self, definition: &SemesterDefinition) -> Result<SemesterTasks, Problem> {
        definition.validate()?;

        let collection = self.collection::<SemesterTasks>(SEMESTER_COLLECTION_NAME);
        let semester = match self.get_semester(&definition.semester).await? {
            Some(mut existing) => {
                existing.redefine(&definition.tasks);
                collection
                    .replace_one(filter::by_id(&existing.id), &existing, None)
                    .await?;
                tracing::info!(
                    "Redefined semester {} with {} tasks",
                    existing.semester,
                    existing.tasks.len()
                );
                existing
            }
            None => {
                let created = SemesterTasks::define(definition);
                collection.insert_one(&created, None).await?;
                tracing::info!(
                    "Defined semester {} with {} tasks",
                    created.semester,
                    created.tasks.len()
                );
                created
            }
        };

        Ok(semester)
    }

    async fn list_semesters(&self) -> Result<Vec<SemesterTasks>, Problem> {
        let semesters = self
            .collection::<SemesterTasks>(SEMESTER_COLLECTION_NAME)
            .find(
                doc! {},
                mongodb::options::FindOptions::builder()
                    .sort(doc! { "created_at": 1 })
                    .build(),
            )
            .await?
            .try_collect()
            .await?;

        Ok(semesters)
    }

    async fn get_semester(&self, semester: &str) -> Result<Option<SemesterTasks>, Problem> {
        self.collection::<SemesterTasks>(SEMESTER_COLLECTION_NAME)
            .find_one(doc! { "semester": semester }, None)
            .await
            .map_err(Problem::from)
    }

    async fn require_semester(&self, semester: &str) -> Result<SemesterTasks, Problem> {
        self.get_semester(semester)
            .await?
            .ok_or_else(|| problems::not_found("Semester", semester))
    }
}
