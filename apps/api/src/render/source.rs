//! Resume/template lookup. Jobs store ids only; content is resolved here at
//! submission (to validate) and again when a worker claims the job.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::resume::{ResumeSourceRow, ResumeTemplateRow};

/// Everything the renderer needs, fully loaded.
#[derive(Debug, Clone)]
pub struct RenderableInput {
    pub resume_id: Uuid,
    pub template_id: Uuid,
    pub template_name: String,
    pub preamble: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("{kind} {id} is not accessible to {owner_id}")]
    Forbidden {
        kind: &'static str,
        id: Uuid,
        owner_id: Uuid,
    },

    #[error("resume {0} has no renderable content")]
    NotRenderable(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ResumeSource: Send + Sync {
    async fn resolve(
        &self,
        resume_id: Uuid,
        template_id: Uuid,
        owner_id: Uuid,
    ) -> Result<RenderableInput, SourceError>;
}

pub struct PgResumeSource {
    pool: PgPool,
}

impl PgResumeSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResumeSource for PgResumeSource {
    async fn resolve(
        &self,
        resume_id: Uuid,
        template_id: Uuid,
        owner_id: Uuid,
    ) -> Result<RenderableInput, SourceError> {
        let resume: ResumeSourceRow =
            sqlx::query_as("SELECT id, user_id, latex_source FROM resumes WHERE id = $1")
                .bind(resume_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(SourceError::NotFound {
                    kind: "resume",
                    id: resume_id,
                })?;

        let template: ResumeTemplateRow = sqlx::query_as(
            "SELECT id, owner_id, name, preamble FROM resume_templates WHERE id = $1",
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SourceError::NotFound {
            kind: "template",
            id: template_id,
        })?;

        assemble(resume, template, owner_id)
    }
}

/// Applies the access rules shared by every backend.
pub(crate) fn assemble(
    resume: ResumeSourceRow,
    template: ResumeTemplateRow,
    owner_id: Uuid,
) -> Result<RenderableInput, SourceError> {
    if resume.user_id != owner_id {
        return Err(SourceError::Forbidden {
            kind: "resume",
            id: resume.id,
            owner_id,
        });
    }
    if template.owner_id.is_some_and(|id| id != owner_id) {
        return Err(SourceError::Forbidden {
            kind: "template",
            id: template.id,
            owner_id,
        });
    }

    let body = resume
        .latex_source
        .filter(|s| !s.trim().is_empty())
        .ok_or(SourceError::NotRenderable(resume.id))?;

    Ok(RenderableInput {
        resume_id: resume.id,
        template_id: template.id,
        template_name: template.name,
        preamble: template.preamble,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resume(owner: Uuid, latex: Option<&str>) -> ResumeSourceRow {
        ResumeSourceRow {
            id: Uuid::new_v4(),
            user_id: owner,
            latex_source: latex.map(str::to_string),
        }
    }

    fn template(owner: Option<Uuid>) -> ResumeTemplateRow {
        ResumeTemplateRow {
            id: Uuid::new_v4(),
            owner_id: owner,
            name: "classic".to_string(),
            preamble: "\\documentclass{article}".to_string(),
        }
    }

    #[test]
    fn test_owner_with_shared_template_resolves() {
        let owner = Uuid::new_v4();
        let input = assemble(resume(owner, Some("Hello")), template(None), owner).unwrap();
        assert_eq!(input.body, "Hello");
        assert_eq!(input.template_name, "classic");
    }

    #[test]
    fn test_foreign_resume_is_forbidden() {
        let input = assemble(
            resume(Uuid::new_v4(), Some("Hello")),
            template(None),
            Uuid::new_v4(),
        );
        assert!(matches!(input, Err(SourceError::Forbidden { kind: "resume", .. })));
    }

    #[test]
    fn test_private_template_of_other_account_is_forbidden() {
        let owner = Uuid::new_v4();
        let input = assemble(
            resume(owner, Some("Hello")),
            template(Some(Uuid::new_v4())),
            owner,
        );
        assert!(matches!(input, Err(SourceError::Forbidden { kind: "template", .. })));
    }

    #[test]
    fn test_resume_without_latex_is_not_renderable() {
        let owner = Uuid::new_v4();
        assert!(matches!(
            assemble(resume(owner, None), template(Some(owner)), owner),
            Err(SourceError::NotRenderable(_))
        ));
        assert!(matches!(
            assemble(resume(owner, Some("   ")), template(None), owner),
            Err(SourceError::NotRenderable(_))
        ));
    }
}
