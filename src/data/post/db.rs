use bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument, UpdateModifications};
use mongodb::Database;
use rocket::futures::TryStreamExt;

use crate::data::filter;
use crate::data::user::User;
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};

use super::{LikeState, Post, PostCreate, POST_COLLECTION_NAME};

pub trait PostDbExt {
    /// `None` when the post had nothing to store.
    async fn create_post(&self, author: &User, create: PostCreate) -> Result<Option<Post>, Problem>;
    async fn list_posts(&self, page: PageState) -> Result<Vec<Post>, Problem>;
    async fn posts_by_user(&self, user: &str) -> Result<Vec<Post>, Problem>;
    async fn delete_post(&self, id: &str, caller: &User) -> Result<Post, Problem>;
    async fn toggle_like(&self, id: &str, user: &str) -> Result<LikeState, Problem>;
}

impl PostDbExt for Database {
    async fn create_post(&self, author: &User, create: PostCreate) -> Result<Option<Post>, Problem> {
        if create.is_empty() {
            tracing::debug!("Skipping empty post from {}", author.id);
            return Ok(None);
        }

        let post = create.into_post(author);
        self.collection::<Post>(POST_COLLECTION_NAME)
            .insert_one(&post, None)
            .await?;
        Ok(Some(post))
    }

    async fn list_posts(&self, page: PageState) -> Result<Vec<Post>, Problem> {
        let posts = self
            .collection::<Post>(POST_COLLECTION_NAME)
            .find(doc! {}, page.find_options(doc! { "created_at": -1 }))
            .await?
            .try_collect()
            .await?;

        Ok(posts)
    }

    async fn posts_by_user(&self, user: &str) -> Result<Vec<Post>, Problem> {
        let posts = self
            .collection::<Post>(POST_COLLECTION_NAME)
            .find(
                doc! { "author.id": user },
                FindOptions::builder().sort(doc! { "created_at": -1 }).build(),
            )
            .await?
            .try_collect()
            .await?;

        Ok(posts)
    }

    async fn delete_post(&self, id: &str, caller: &User) -> Result<Post, Problem> {
        let posts = self.collection::<Post>(POST_COLLECTION_NAME);
        let post = posts
            .find_one(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problems::not_found("Post", id))?;

        if post.author.id != caller.id && !caller.role.is_admin() {
            return Err(problems::forbidden("Only the author or an admin can delete a post."));
        }

        posts.delete_one(filter::by_id(id), None).await?;
        tracing::info!("Post {} deleted by {}", id, caller.id);
        Ok(post)
    }

    async fn toggle_like(&self, id: &str, user: &str) -> Result<LikeState, Problem> {
        // single pipeline update, so concurrent toggles can't lose a like
        let toggle = vec![doc! {
            "$set": {
                "likes": {
                    "$cond": [
                        { "$in": [user, { "$ifNull": ["$likes", []] }] },
                        { "$setDifference": [{ "$ifNull": ["$likes", []] }, [user]] },
                        { "$concatArrays": [{ "$ifNull": ["$likes", []] }, [user]] },
                    ]
                }
            }
        }];

        let post = self
            .collection::<Post>(POST_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                UpdateModifications::Pipeline(toggle),
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await?
            .ok_or_else(|| problems::not_found("Post", id))?;

        Ok(LikeState {
            liked: post.likes.iter().any(|it| it == user),
            likes: post.likes.len(),
        })
    }
}
