use axum::{
    Json,
    extract::{Query, State},
};

use scribe_db::MessageFilter;
use scribe_types::api::{AttachmentFilter, MessagesPage, MessagesQuery};
use scribe_types::models::Message;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 200;

/// Missing, non-numeric and zero values all mean "use the default".
fn positive_or(value: Option<&str>, default: u32) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

/// GET /messages: filtered page of archived messages, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesPage>, ApiError> {
    let page = positive_or(query.page.as_deref(), DEFAULT_PAGE);
    let limit = positive_or(query.limit.as_deref(), DEFAULT_LIMIT).min(MAX_LIMIT);

    let filter = MessageFilter {
        attachments: query
            .attachments
            .as_deref()
            .map(AttachmentFilter::parse)
            .unwrap_or_default(),
        content: query.content,
        author: query.author,
        channel_id: query.channel_id,
        guild_id: query.guild_id,
    };

    // Run blocking DB query off the async runtime
    let db = state.db.clone();
    let (rows, total) =
        tokio::task::spawn_blocking(move || db.query_messages(&filter, page, limit)).await??;

    let messages = rows
        .into_iter()
        .map(Message::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Json(MessagesPage {
        messages,
        total_pages: total.div_ceil(u64::from(limit)),
        current_page: page,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::{TimeZone, Utc};
    use scribe_db::models::{AttachmentRow, MessageRow};
    use scribe_types::models::Author;

    use crate::test_support;

    fn message(id: &str, minute: u32, content: &str, attachments: &[&str]) -> Message {
        Message {
            id: id.to_string(),
            content: content.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            author: Author {
                id: "u1".into(),
                username: "bob".into(),
                discriminator: Some("0".into()),
                avatar: Some("x".into()),
            },
            channel_id: Some("c1".into()),
            guild_id: Some("g1".into()),
            attachments: attachments.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn seed(state: &AppState, message: &Message) {
        let attachments: Vec<AttachmentRow> = message
            .attachments
            .iter()
            .map(|id| AttachmentRow {
                id: id.clone(),
                message_id: message.id.clone(),
                filename: format!("{}.txt", id),
                size: 2,
                content_type: "text/plain".into(),
                data: "aGk=".into(),
            })
            .collect();
        state
            .db
            .commit_message(&MessageRow::from(message), &attachments)
            .unwrap();
    }

    async fn page(state: &AppState, uri: &str) -> MessagesPage {
        let (status, _, body) = test_support::get(state, uri).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        assert_eq!(positive_or(None, 10), 10);
        assert_eq!(positive_or(Some("abc"), 10), 10);
        assert_eq!(positive_or(Some("0"), 1), 1);
        assert_eq!(positive_or(Some("-3"), 1), 1);
        assert_eq!(positive_or(Some(" 25 "), 10), 25);
    }

    #[tokio::test]
    async fn third_page_of_twenty_five() {
        let state = test_support::state();
        for i in 0..25 {
            seed(&state, &message(&format!("m{:02}", i), i, "hi", &[]));
        }

        let result = page(&state, "/messages?page=3&limit=10").await;
        assert_eq!(result.messages.len(), 5);
        assert_eq!(result.total_pages, 3);
        assert_eq!(result.current_page, 3);
        assert_eq!(result.messages[0].id, "m20");
    }

    #[tokio::test]
    async fn defaults_apply_without_parameters() {
        let state = test_support::state();
        for i in 0..12 {
            seed(&state, &message(&format!("m{:02}", i), i, "hi", &[]));
        }

        let result = page(&state, "/messages?page=zero&limit=").await;
        assert_eq!(result.current_page, 1);
        assert_eq!(result.messages.len(), 10);
        assert_eq!(result.total_pages, 2);
    }

    #[tokio::test]
    async fn filters_combine() {
        let state = test_support::state();
        seed(&state, &message("m1", 0, "Hello there", &["a1"]));
        seed(&state, &message("m2", 1, "hello again", &[]));
        seed(&state, &message("m3", 2, "bye", &[]));

        let result = page(&state, "/messages?content=HELLO").await;
        let ids: Vec<&str> = result.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);

        let result = page(&state, "/messages?content=hello&attachments=without").await;
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].id, "m2");
        assert!(result.messages[0].attachments.is_empty());

        let result = page(&state, "/messages?attachments=with").await;
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].attachments, vec!["a1"]);

        let result = page(&state, "/messages?channelId=c2").await;
        assert!(result.messages.is_empty());
        assert_eq!(result.total_pages, 0);

        let result = page(&state, "/messages?author=BO&guildId=g1").await;
        assert_eq!(result.messages.len(), 3);
    }

    #[tokio::test]
    async fn messages_serialize_with_underscore_id() {
        let state = test_support::state();
        seed(&state, &message("m1", 0, "hi", &[]));

        let (_, _, body) = test_support::get(&state, "/messages?channelId=c1").await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["messages"][0]["_id"], "m1");
        assert_eq!(json["messages"][0]["author"]["username"], "bob");
        assert_eq!(json["totalPages"], 1);
        assert_eq!(json["currentPage"], 1);
    }
}
