// db/jobdb.rs
use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::jobmodel::{Job, JobStatus, Proposal};

#[async_trait]
pub trait JobExt {
    async fn get_job_by_id(&self, job_id: Uuid) -> Result<Option<Job>, Error>;
    async fn get_proposal_by_id(&self, proposal_id: Uuid) -> Result<Option<Proposal>, Error>;
    async fn update_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<Job, Error>;
}

#[async_trait]
impl JobExt for DBClient {
    async fn get_job_by_id(&self, job_id: Uuid) -> Result<Option<Job>, Error> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT id, client_id, organization_id, title, status, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_proposal_by_id(&self, proposal_id: Uuid) -> Result<Option<Proposal>, Error> {
        sqlx::query_as::<_, Proposal>(
            r#"
            SELECT id, job_id, freelancer_id, amount, status, created_at
            FROM proposals
            WHERE id = $1
            "#,
        )
        .bind(proposal_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<Job, Error> {
        sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, client_id, organization_id, title, status, created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
    }
}
