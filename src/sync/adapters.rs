use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::flashcard::Deck;
use crate::core::folder::Folder;
use crate::core::planner::PlannerBlock;
use crate::core::session::ChatSession;
use crate::platform::PlatformClient;

pub(crate) const KEY_SESSIONS: &str = "sessions";
pub(crate) const KEY_FOLDERS: &str = "folders";
pub(crate) const KEY_FLASHCARDS: &str = "flashcards";
pub(crate) const KEY_PLANNER: &str = "planner";

fn deck_key(id: Uuid) -> String {
    format!("decks/{}", id)
}

/// Wire payload for the flashcard domain. Active decks travel inline (hot
/// tier); archived decks travel as id stubs and live in per-deck blobs
/// fetched on demand (cold tier).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashcardSyncPayload {
    pub decks: Vec<Deck>,
    #[serde(default)]
    pub cold_deck_ids: Vec<Uuid>,
}

/// Pushes and pulls chat sessions as one cloud blob.
#[derive(Clone)]
pub struct SessionSync {
    platform: PlatformClient,
}

impl SessionSync {
    pub fn new(platform: PlatformClient) -> Self {
        Self { platform }
    }

    /// Replace the remote collection with the current local one.
    pub async fn save_all(&self, sessions: &[ChatSession]) -> Result<(), String> {
        let value = serde_json::to_value(sessions)
            .map_err(|e| format!("Failed to serialize sessions: {}", e))?;
        self.platform.put_blob(KEY_SESSIONS, &value).await
    }

    pub async fn load_all(&self) -> Result<Vec<ChatSession>, String> {
        match self.platform.get_blob(KEY_SESSIONS).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| format!("Failed to parse remote sessions: {}", e)),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Clone)]
pub struct FolderSync {
    platform: PlatformClient,
}

impl FolderSync {
    pub fn new(platform: PlatformClient) -> Self {
        Self { platform }
    }

    pub async fn save_all(&self, folders: &[Folder]) -> Result<(), String> {
        let value = serde_json::to_value(folders)
            .map_err(|e| format!("Failed to serialize folders: {}", e))?;
        self.platform.put_blob(KEY_FOLDERS, &value).await
    }

    pub async fn load_all(&self) -> Result<Vec<Folder>, String> {
        match self.platform.get_blob(KEY_FOLDERS).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| format!("Failed to parse remote folders: {}", e)),
            None => Ok(Vec::new()),
        }
    }
}

/// Flashcard sync with hot/cold tiering: the main blob carries active decks
/// plus stubs for archived ones; each archived deck has its own blob.
#[derive(Clone)]
pub struct FlashcardSync {
    platform: PlatformClient,
}

impl FlashcardSync {
    pub fn new(platform: PlatformClient) -> Self {
        Self { platform }
    }

    /// Push every deck: archived decks to their own cold blobs, the rest
    /// inline in the main payload.
    pub async fn save_all(&self, decks: &[Deck]) -> Result<(), String> {
        let (cold, hot): (Vec<&Deck>, Vec<&Deck>) = decks.iter().partition(|d| d.archived);

        for deck in &cold {
            let value = serde_json::to_value(deck)
                .map_err(|e| format!("Failed to serialize deck '{}': {}", deck.title, e))?;
            self.platform.put_blob(&deck_key(deck.id), &value).await?;
        }

        let payload = FlashcardSyncPayload {
            decks: hot.into_iter().cloned().collect(),
            cold_deck_ids: cold.iter().map(|d| d.id).collect(),
        };
        let value = serde_json::to_value(&payload)
            .map_err(|e| format!("Failed to serialize flashcard payload: {}", e))?;
        self.platform.put_blob(KEY_FLASHCARDS, &value).await
    }

    pub async fn load_payload(&self) -> Result<FlashcardSyncPayload, String> {
        match self.platform.get_blob(KEY_FLASHCARDS).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| format!("Failed to parse remote flashcards: {}", e)),
            None => Ok(FlashcardSyncPayload::default()),
        }
    }

    /// Fetch one archived deck from its cold blob.
    pub async fn fetch_cold_deck(&self, id: Uuid) -> Result<Option<Deck>, String> {
        match self.platform.get_blob(&deck_key(id)).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| format!("Failed to parse deck {}: {}", id, e)),
            None => Ok(None),
        }
    }
}

#[derive(Clone)]
pub struct PlannerSync {
    platform: PlatformClient,
}

impl PlannerSync {
    pub fn new(platform: PlatformClient) -> Self {
        Self { platform }
    }

    pub async fn save_all(&self, blocks: &[PlannerBlock]) -> Result<(), String> {
        let value = serde_json::to_value(blocks)
            .map_err(|e| format!("Failed to serialize planner blocks: {}", e))?;
        self.platform.put_blob(KEY_PLANNER, &value).await
    }

    pub async fn load_all(&self) -> Result<Vec<PlannerBlock>, String> {
        match self.platform.get_blob(KEY_PLANNER).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| format!("Failed to parse remote planner blocks: {}", e)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_are_empty_when_platform_is_unavailable() {
        let platform = PlatformClient::unavailable();
        assert!(SessionSync::new(platform.clone()).load_all().await.unwrap().is_empty());
        assert!(FolderSync::new(platform.clone()).load_all().await.unwrap().is_empty());
        let payload = FlashcardSync::new(platform.clone()).load_payload().await.unwrap();
        assert!(payload.decks.is_empty() && payload.cold_deck_ids.is_empty());
        assert!(PlannerSync::new(platform).load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn saves_propagate_unavailability_as_errors() {
        let platform = PlatformClient::unavailable();
        assert!(SessionSync::new(platform.clone()).save_all(&[]).await.is_err());
        assert!(FlashcardSync::new(platform).save_all(&[]).await.is_err());
    }
}
