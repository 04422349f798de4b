use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{CampaignStore, ContactStore, PageStore};
use crate::errors::AppError;
use crate::models::campaign::{
    Campaign, CampaignRow, CampaignStatus, LoopRecipient, LoopStatus, PendingRecipient,
    RecipientJoinRow,
};
use crate::models::contact::{Confidence, Contact, ContactRow, ContactUpsert};
use crate::models::page::{Page, SyncBacklog};

const CAMPAIGN_COLUMNS: &str = "id, page_id, name, status, message, is_loop, loop_status, \
    ai_prompt, total_recipients, sent_count, last_run_at, created_at, updated_at";

const CONTACT_COLUMNS: &str = "id, page_id, psid, name, profile_pic, last_interaction_at, \
    interaction_count, best_contact_hour, best_contact_confidence, top_hours";

/// Recipient rows joined with their (possibly deleted) contact.
const RECIPIENT_JOIN: &str = r#"
    SELECT r.id, r.status, r.scheduled_at, r.next_scheduled_at, r.message_sent_count,
           r.last_contacted_at, c.id AS contact_id, c.psid, c.name AS contact_name,
           c.best_contact_hour
    FROM campaign_recipients r
    LEFT JOIN contacts c ON c.id = r.contact_id
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PageStore for PgStore {
    async fn get_page(&self, page_id: Uuid) -> Result<Option<Page>, AppError> {
        Ok(sqlx::query_as::<_, Page>(
            r#"
            SELECT id, external_id, name, access_token, last_synced_at,
                   sync_backlog_floor, sync_backlog_until
            FROM pages WHERE id = $1
            "#,
        )
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn record_sync_pass(
        &self,
        page_id: Uuid,
        started_at: DateTime<Utc>,
        backlog: Option<SyncBacklog>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE pages
            SET last_synced_at = $2, sync_backlog_floor = $3, sync_backlog_until = $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(page_id)
        .bind(started_at)
        .bind(backlog.and_then(|b| b.floor))
        .bind(backlog.map(|b| b.until))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for PgStore {
    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<Campaign>, AppError> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1"
        ))
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Campaign::try_from).transpose()?)
    }

    async fn campaign_status(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<CampaignStatus>, AppError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM campaigns WHERE id = $1")
                .bind(campaign_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(status.as_deref().map(str::parse).transpose()?)
    }

    async fn begin_sending(
        &self,
        campaign_id: Uuid,
        total_recipients: i32,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'sending', total_recipients = $2, updated_at = now()
            WHERE id = $1 AND status IN ('draft', 'scheduled', 'sending')
            "#,
        )
        .bind(campaign_id)
        .bind(total_recipients)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE campaigns SET status = $2, updated_at = now() WHERE id = $1 AND status <> 'cancelled'",
        )
        .bind(campaign_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_campaign(&self, campaign_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'cancelled', updated_at = now()
            WHERE id = $1 AND status IN ('draft', 'scheduled', 'sending')
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_sent_count(&self, campaign_id: Uuid, delta: i32) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE campaigns SET sent_count = sent_count + $2, updated_at = now() WHERE id = $1",
        )
        .bind(campaign_id)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_recipients(&self, campaign_id: Uuid) -> Result<i64, AppError> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn pending_recipients(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<PendingRecipient>, AppError> {
        let rows = sqlx::query_as::<_, RecipientJoinRow>(&format!(
            "{RECIPIENT_JOIN} WHERE r.campaign_id = $1 AND r.status = 'pending' ORDER BY r.created_at, r.id"
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PendingRecipient::from).collect())
    }

    async fn mark_recipient_sent(
        &self,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET status = 'sent', sent_at = $2, error_message = NULL
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(recipient_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_recipient_failed(
        &self,
        recipient_id: Uuid,
        error: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET status = 'failed', error_message = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(recipient_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_loop_campaigns(&self, limit: i64) -> Result<Vec<Campaign>, AppError> {
        let rows = sqlx::query_as::<_, CampaignRow>(&format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS} FROM campaigns
            WHERE is_loop AND loop_status = 'active' AND status <> 'cancelled'
            ORDER BY last_run_at ASC NULLS FIRST, created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(Campaign::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn due_loop_recipients(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<LoopRecipient>, AppError> {
        let rows = sqlx::query_as::<_, RecipientJoinRow>(&format!(
            r#"
            {RECIPIENT_JOIN}
            WHERE r.campaign_id = $1
              AND r.status = 'pending'
              AND (r.scheduled_at <= $2 OR r.next_scheduled_at <= $2)
            ORDER BY LEAST(r.scheduled_at, r.next_scheduled_at) ASC, r.id
            LIMIT $3
            "#
        ))
        .bind(campaign_id)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(LoopRecipient::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn unscheduled_loop_recipients(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<LoopRecipient>, AppError> {
        let rows = sqlx::query_as::<_, RecipientJoinRow>(&format!(
            r#"
            {RECIPIENT_JOIN}
            WHERE r.campaign_id = $1
              AND r.status = 'pending'
              AND r.scheduled_at IS NULL
              AND r.next_scheduled_at IS NULL
            ORDER BY r.created_at, r.id
            "#
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(LoopRecipient::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn schedule_recipient(
        &self,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE campaign_recipients SET scheduled_at = $2 WHERE id = $1")
            .bind(recipient_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_loop_success(
        &self,
        recipient_id: Uuid,
        contacted_at: DateTime<Utc>,
        next_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET message_sent_count = message_sent_count + 1,
                last_contacted_at = $2,
                next_scheduled_at = $3,
                scheduled_at = NULL,
                error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(recipient_id)
        .bind(contacted_at)
        .bind(next_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_loop_failure(
        &self,
        recipient_id: Uuid,
        error: &str,
        next_at: DateTime<Utc>,
        give_up: bool,
    ) -> Result<(), AppError> {
        if give_up {
            sqlx::query(
                "UPDATE campaign_recipients SET status = 'failed', error_message = $2 WHERE id = $1",
            )
            .bind(recipient_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE campaign_recipients
                SET error_message = $2, next_scheduled_at = $3, scheduled_at = NULL
                WHERE id = $1
                "#,
            )
            .bind(recipient_id)
            .bind(error)
            .bind(next_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn mark_campaign_run(
        &self,
        campaign_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE campaigns SET last_run_at = $2, updated_at = now() WHERE id = $1")
            .bind(campaign_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_loop_status(
        &self,
        campaign_id: Uuid,
        status: LoopStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE campaigns SET loop_status = $2, updated_at = now() WHERE id = $1")
            .bind(campaign_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContactStore for PgStore {
    async fn known_psids(&self, page_id: Uuid) -> Result<HashSet<String>, AppError> {
        let psids: Vec<String> = sqlx::query_scalar("SELECT psid FROM contacts WHERE page_id = $1")
            .bind(page_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(psids.into_iter().collect())
    }

    async fn deleted_psids(&self, page_id: Uuid) -> Result<HashSet<String>, AppError> {
        let psids: Vec<String> =
            sqlx::query_scalar("SELECT psid FROM deleted_contacts WHERE page_id = $1")
                .bind(page_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(psids.into_iter().collect())
    }

    async fn upsert_contact(&self, contact: &ContactUpsert) -> Result<Uuid, AppError> {
        let history = contact.history.as_ref();
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO contacts
                (page_id, psid, name, profile_pic, last_interaction_at, interaction_count,
                 best_contact_hour, best_contact_confidence, top_hours)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, 0), $7, COALESCE($8, 'none'),
                    COALESCE($9, '[]'::jsonb))
            ON CONFLICT (page_id, psid) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, contacts.name),
                profile_pic = COALESCE(EXCLUDED.profile_pic, contacts.profile_pic),
                last_interaction_at = EXCLUDED.last_interaction_at,
                interaction_count = CASE WHEN $10 THEN EXCLUDED.interaction_count
                                         ELSE contacts.interaction_count END,
                best_contact_hour = CASE WHEN $10 THEN EXCLUDED.best_contact_hour
                                         ELSE contacts.best_contact_hour END,
                best_contact_confidence = CASE WHEN $10 THEN EXCLUDED.best_contact_confidence
                                               ELSE contacts.best_contact_confidence END,
                top_hours = CASE WHEN $10 THEN EXCLUDED.top_hours ELSE contacts.top_hours END,
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(contact.page_id)
        .bind(&contact.psid)
        .bind(&contact.name)
        .bind(&contact.profile_pic)
        .bind(contact.last_interaction_at)
        .bind(history.map(|h| i32::try_from(h.interaction_count).unwrap_or(i32::MAX)))
        .bind(history.and_then(|h| h.best_contact_hour).map(i16::from))
        .bind(history.map(|h| h.best_contact_confidence.as_str()))
        .bind(history.map(|h| Json(h.top_hours.clone())))
        .bind(history.is_some())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn clear_deleted(&self, page_id: Uuid, psids: &[String]) -> Result<(), AppError> {
        if psids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM deleted_contacts WHERE page_id = $1 AND psid = ANY($2)")
            .bind(page_id)
            .bind(psids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_contacts(&self, page_id: Uuid, contact_ids: &[Uuid]) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO deleted_contacts (page_id, psid)
            SELECT page_id, psid FROM contacts WHERE page_id = $1 AND id = ANY($2)
            ON CONFLICT (page_id, psid) DO UPDATE SET deleted_at = now()
            "#,
        )
        .bind(page_id)
        .bind(contact_ids)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM contacts WHERE page_id = $1 AND id = ANY($2)")
            .bind(page_id)
            .bind(contact_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }

    async fn contacts_for_page(&self, page_id: Uuid) -> Result<Vec<Contact>, AppError> {
        let rows = sqlx::query_as::<_, ContactRow>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE page_id = $1 ORDER BY created_at, id"
        ))
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(Contact::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_contact(
        &self,
        page_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Contact>, AppError> {
        let row = sqlx::query_as::<_, ContactRow>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE page_id = $1 AND id = $2"
        ))
        .bind(page_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Contact::try_from).transpose()?)
    }

    async fn save_best_time(
        &self,
        contact_id: Uuid,
        hour: Option<u8>,
        confidence: Confidence,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE contacts
            SET best_contact_hour = $2, best_contact_confidence = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(contact_id)
        .bind(hour.map(i16::from))
        .bind(confidence.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
