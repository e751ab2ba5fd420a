use chrono::{DateTime, Utc};
use utoipa::ToSchema;

use crate::data::user::{MemberRef, User};
use crate::util;

pub mod db;

pub static POST_COLLECTION_NAME: &str = "posts";

/// Media already uploaded to the media host; only the URL is kept.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Media {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Post {
    #[serde(rename = "_id")]
    pub id: String,
    pub author: MemberRef,
    pub email: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media: Vec<Media>,
    /// Ids of users who liked the post.
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PostCreate {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Vec<Media>,
}

impl PostCreate {
    pub fn media(&self) -> impl Iterator<Item = &Media> {
        self.media.iter().filter(|it| !util::is_blank(&it.url))
    }

    /// Nothing worth storing: no text and no media.
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map(util::is_blank).unwrap_or(true) && self.media().next().is_none()
    }

    pub fn into_post(self, author: &User) -> Post {
        let media = self.media().cloned().collect();
        Post {
            id: util::new_id(),
            author: author.member_ref(),
            email: author.email.clone(),
            text: self.text.unwrap_or_default().trim().to_string(),
            media,
            likes: vec![],
            created_at: util::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LikeState {
    pub liked: bool,
    pub likes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[test]
    fn blank_post_is_empty() {
        assert!(PostCreate::default().is_empty());
        assert!(PostCreate {
            text: Some("   ".to_string()),
            media: vec![Media {
                url: " ".to_string(),
                content_type: None
            }],
        }
        .is_empty());
    }

    #[test]
    fn media_alone_is_a_post() {
        let create = PostCreate {
            text: None,
            media: vec![Media {
                url: "https://media/cat.png".to_string(),
                content_type: Some("image/png".to_string()),
            }],
        };
        assert!(!create.is_empty());
    }

    #[test]
    fn post_keeps_author_snapshot() {
        let author = User::new("Mona", "mona@uni.edu", Role::Student);
        let post = PostCreate {
            text: Some(" first post ".to_string()),
            media: vec![],
        }
        .into_post(&author);

        assert_eq!(post.text, "first post");
        assert_eq!(post.author.id, author.id);
        assert_eq!(post.email, "mona@uni.edu");
        assert!(post.likes.is_empty());
    }
}
