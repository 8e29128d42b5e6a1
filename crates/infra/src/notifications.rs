use std::sync::Arc;

use cornerstone_domain::DomainResult;
use cornerstone_domain::error::DomainError;
use cornerstone_domain::notifications::{Notification, NotificationType};
use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::notifications::{NotificationListQuery, NotificationRepository};
use serde::{Deserialize, Serialize};
use serde_json::{Value, to_value};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Notification inbox stored in the `sys_box` collection.
#[derive(Clone)]
pub struct SurrealNotificationRepository {
    client: Arc<Surreal<Client>>,
}

#[derive(Debug, Deserialize)]
struct SysBoxRow {
    notification_id: String,
    receiver_id: u64,
    sender_id: u64,
    #[serde(rename = "type")]
    kind: u8,
    target_id: u64,
    #[serde(default)]
    content: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    is_read: bool,
    created_at: String,
}

#[derive(Debug, Serialize)]
struct SysBoxCreateRow {
    notification_id: String,
    receiver_id: u64,
    sender_id: u64,
    #[serde(rename = "type")]
    kind: u8,
    target_id: u64,
    content: String,
    payload: Value,
    is_read: bool,
    created_at: String,
}

impl SurrealNotificationRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    fn parse_datetime_ms(value: &str) -> DomainResult<i64> {
        let datetime = OffsetDateTime::parse(value, &Rfc3339)
            .map_err(|err| DomainError::Validation(format!("invalid datetime: {err}")))?;
        Ok((datetime.unix_timestamp_nanos() / 1_000_000) as i64)
    }

    fn to_rfc3339(timestamp_ms: i64) -> DomainResult<String> {
        let datetime =
            OffsetDateTime::from_unix_timestamp_nanos((timestamp_ms as i128) * 1_000_000)
                .map_err(|err| DomainError::Validation(format!("invalid timestamp: {err}")))?;
        Ok(datetime
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()))
    }

    fn map_rows(rows: Vec<Value>) -> DomainResult<Vec<Notification>> {
        rows.into_iter()
            .map(|row| {
                let row = serde_json::from_value::<SysBoxRow>(row).map_err(|err| {
                    DomainError::Validation(format!("invalid sys_box row: {err}"))
                })?;
                Ok(Notification {
                    notification_id: row.notification_id,
                    receiver_id: row.receiver_id,
                    sender_id: row.sender_id,
                    kind: NotificationType::try_from(row.kind).map_err(DomainError::Validation)?,
                    target_id: row.target_id,
                    content: row.content,
                    payload: row.payload.unwrap_or(Value::Null),
                    is_read: row.is_read,
                    created_at_ms: Self::parse_datetime_ms(&row.created_at)?,
                })
            })
            .collect()
    }

    fn to_create_payload(notification: &Notification) -> DomainResult<SysBoxCreateRow> {
        Ok(SysBoxCreateRow {
            notification_id: notification.notification_id.clone(),
            receiver_id: notification.receiver_id,
            sender_id: notification.sender_id,
            kind: notification.kind.code(),
            target_id: notification.target_id,
            content: notification.content.clone(),
            payload: notification.payload.clone(),
            is_read: notification.is_read,
            created_at: Self::to_rfc3339(notification.created_at_ms)?,
        })
    }

    fn decode_count(rows: Vec<Value>, field: &str) -> DomainResult<u64> {
        let Some(row) = rows.into_iter().next() else {
            return Ok(0);
        };
        let value = row
            .get(field)
            .ok_or_else(|| DomainError::Validation(format!("{field} missing")))?;
        value
            .as_u64()
            .or_else(|| value.as_i64().and_then(|value| value.try_into().ok()))
            .ok_or_else(|| DomainError::Validation(format!("invalid {field}")))
    }

    fn map_surreal_error(err: surrealdb::Error) -> DomainError {
        let error_message = err.to_string().to_lowercase();
        if error_message.contains("already exists")
            || error_message.contains("duplicate")
            || error_message.contains("unique")
            || error_message.contains("conflict")
        {
            return DomainError::Conflict;
        }
        DomainError::Unavailable(format!("surreal query failed: {error_message}"))
    }
}

impl NotificationRepository for SurrealNotificationRepository {
    fn create(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<Notification>> {
        let payload = match Self::to_create_payload(notification) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let client = self.client.clone();
        Box::pin(async move {
            let payload = to_value(payload)
                .map_err(|err| DomainError::Validation(format!("invalid payload: {err}")))?;
            let mut response = client
                .query("CREATE sys_box CONTENT $payload")
                .bind(("payload", payload))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            let mut rows = Self::map_rows(rows)?;
            rows.pop()
                .ok_or_else(|| DomainError::Validation("create returned no row".to_string()))
        })
    }

    fn list(&self, query: &NotificationListQuery) -> BoxFuture<'_, DomainResult<Vec<Notification>>> {
        let query = query.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * FROM sys_box WHERE receiver_id = $receiver_id \
                     ORDER BY created_at DESC, notification_id DESC \
                     LIMIT $limit START $offset",
                )
                .bind(("receiver_id", query.receiver_id))
                .bind(("limit", query.limit as i64))
                .bind(("offset", query.offset as i64))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            Self::map_rows(rows)
        })
    }

    fn unread_count(&self, receiver_id: u64) -> BoxFuture<'_, DomainResult<u64>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT count() AS unread_count FROM sys_box \
                     WHERE receiver_id = $receiver_id AND is_read = false GROUP ALL",
                )
                .bind(("receiver_id", receiver_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            Self::decode_count(rows, "unread_count")
        })
    }

    fn mark_read(
        &self,
        receiver_id: u64,
        notification_id: &str,
    ) -> BoxFuture<'_, DomainResult<Notification>> {
        let notification_id = notification_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "UPDATE sys_box SET is_read = true \
                     WHERE notification_id = $notification_id AND receiver_id = $receiver_id \
                     RETURN AFTER",
                )
                .bind(("notification_id", notification_id))
                .bind(("receiver_id", receiver_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            let mut rows = Self::map_rows(rows)?;
            rows.pop().ok_or(DomainError::NotFound)
        })
    }

    fn mark_all_read(&self, receiver_id: u64) -> BoxFuture<'_, DomainResult<u64>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "UPDATE sys_box SET is_read = true \
                     WHERE receiver_id = $receiver_id AND is_read = false RETURN AFTER",
                )
                .bind(("receiver_id", receiver_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            Ok(rows.len() as u64)
        })
    }
}
