use serde::{Deserialize, Serialize};

use crate::application::items::{CreateItemCommand, UpdateItemCommand};
use crate::domain::items::ItemStatus;

#[derive(Debug, Deserialize, Serialize)]
pub struct ItemCreateRequest {
    pub title: String,
    pub notes: Option<String>,
}

impl From<ItemCreateRequest> for CreateItemCommand {
    fn from(request: ItemCreateRequest) -> Self {
        Self {
            title: request.title,
            notes: request.notes,
        }
    }
}

/// Absent fields are left unchanged; `clear_notes` removes the notes.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ItemUpdateRequest {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub clear_notes: bool,
    pub status: Option<ItemStatus>,
}

impl From<ItemUpdateRequest> for UpdateItemCommand {
    fn from(request: ItemUpdateRequest) -> Self {
        let notes = if request.clear_notes {
            Some(None)
        } else {
            request.notes.map(Some)
        };
        Self {
            title: request.title,
            notes,
            status: request.status,
        }
    }
}
