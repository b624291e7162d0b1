use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{CourseId, FileId, MessageId, MessageKind, Role, RoomId, UserId},
    error::ApiError,
};

/// Attached payload descriptor. One tagged shape covers both uploaded files
/// and inline media so the transport boundary can validate a single union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    File,
    Media,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
}

/// One unit of room communication. The server assigns `message_id` and
/// `created_at`; clients never rewrite either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_fullname: Option<String>,
    #[serde(default)]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

/// A chat room bound 1:1 to a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub course_id: CourseId,
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
    pub created_by: UserId,
}

/// Identity attached to typing-start/stop events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUser {
    pub user_id: UserId,
    pub fullname: String,
    pub role: Role,
}

/// Frames the client emits over the live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    TypingStart {
        room_id: RoomId,
    },
    TypingStop {
        room_id: RoomId,
    },
    SendMessage {
        room_id: RoomId,
        content: String,
        kind: MessageKind,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    MarkRead {
        message_id: MessageId,
        room_id: RoomId,
    },
}

/// Frames the server pushes over the live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageCreated { message: MessagePayload },
    UserTyping { user: TypingUser },
    UserStoppedTyping { user: TypingUser },
    Error(ApiError),
}

/// Response body of the file upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadResponse {
    pub file_id: FileId,
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

impl FileUploadResponse {
    pub fn into_attachment(self, kind: AttachmentKind) -> Attachment {
        Attachment {
            kind,
            url: self.url,
            name: self.name,
            mime_type: self.mime_type,
            size_bytes: self.size_bytes,
            file_id: Some(self.file_id),
        }
    }
}
