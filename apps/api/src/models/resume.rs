use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The slice of a `resumes` row the renderer needs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResumeSourceRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub latex_source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResumeTemplateRow {
    pub id: Uuid,
    /// NULL for templates shared with every account.
    pub owner_id: Option<Uuid>,
    pub name: String,
    pub preamble: String,
}
