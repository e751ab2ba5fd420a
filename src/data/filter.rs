use bson::{doc, Document};

#[inline]
pub fn by_id(id: &str) -> Document {
    doc! { "_id": id }
}

#[inline]
pub fn by_ids(ids: &[String]) -> Document {
    doc! { "_id": { "$in": ids.to_vec() } }
}

/// Matches the document only while it still has the revision it was read at.
#[inline]
pub fn by_revision(id: &str, revision: i64) -> Document {
    doc! { "_id": id, "revision": revision }
}

#[inline]
pub fn by_email(email: &str) -> Document {
    doc! { "email": email.trim().to_lowercase() }
}
