use bson::doc;
use mongodb::error::{Error, ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};

pub mod advisor;
pub mod chat;
pub mod filter;
pub mod group;
pub mod join;
pub mod notification;
pub mod post;
pub mod semester;
pub mod user;

/// Unique indexes backing the "only one" rules that can't be checked before writing.
pub async fn ensure_indexes(db: &Database) -> Result<(), Error> {
    db.collection::<bson::Document>(user::USER_COLLECTION_NAME)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await?;

    db.collection::<bson::Document>(join::JOIN_REQUEST_COLLECTION_NAME)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "pending_key": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "pending_key": { "$exists": true } })
                        .build(),
                )
                .build(),
            None,
        )
        .await?;

    tracing::debug!("Indexes are in place.");
    Ok(())
}

pub fn is_duplicate_key(e: &Error) -> bool {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == 11000,
        ErrorKind::Command(command) => command.code == 11000,
        _ => false,
    }
}
