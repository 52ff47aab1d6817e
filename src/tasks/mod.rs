pub mod background;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::SatchelConfig;

/// A named category of concurrent AI work, each with its own cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskScope {
    Chat,
    Summarize,
    Background,
}

impl TaskScope {
    pub const ALL: [TaskScope; 3] = [Self::Chat, Self::Summarize, Self::Background];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Summarize => "summarize",
            Self::Background => "background",
        }
    }
}

/// Per-scope capacity limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLimits {
    pub chat: usize,
    pub summarize: usize,
    pub background: usize,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            chat: 5,
            summarize: 5,
            background: 3,
        }
    }
}

impl TaskLimits {
    pub fn from_config(config: &SatchelConfig) -> Self {
        Self {
            chat: config.chat_task_limit,
            summarize: config.summarize_task_limit,
            background: config.background_task_limit,
        }
    }

    pub fn of(&self, scope: TaskScope) -> usize {
        match scope {
            TaskScope::Chat => self.chat,
            TaskScope::Summarize => self.summarize,
            TaskScope::Background => self.background,
        }
    }
}

/// Serializable view of which task ids are in flight, for UI observation.
/// Produced and consumed as a snapshot; the tokens themselves never leave
/// the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub chat: Vec<String>,
    pub summarize: Vec<String>,
    pub background: Vec<String>,
}

#[derive(Default)]
struct ScopeState {
    /// Active ids in registration order.
    active: Vec<String>,
    /// Cancellation handles, keyed like `active`. The two are only ever
    /// updated together, under the registry lock.
    tokens: HashMap<String, CancellationToken>,
}

/// Bounds in-flight operations per [`TaskScope`] and hands out cancellation
/// handles. Check-capacity and register happen under one lock, so there is
/// no window where both could succeed past the cap.
pub struct TaskRegistry {
    limits: TaskLimits,
    scopes: Mutex<HashMap<TaskScope, ScopeState>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(TaskLimits::default())
    }
}

impl TaskRegistry {
    pub fn new(limits: TaskLimits) -> Self {
        let mut scopes = HashMap::new();
        for scope in TaskScope::ALL {
            scopes.insert(scope, ScopeState::default());
        }
        Self {
            limits,
            scopes: Mutex::new(scopes),
        }
    }

    /// Register `id` in `scope` and get its cancellation handle.
    ///
    /// Re-entrant: an already-registered id gets its existing handle back
    /// and is not counted twice. Returns `None` when the scope is at
    /// capacity; the caller must not start the operation.
    pub fn start_task(&self, scope: TaskScope, id: &str) -> Option<CancellationToken> {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        let state = scopes.entry(scope).or_default();

        if let Some(token) = state.tokens.get(id) {
            return Some(token.clone());
        }

        if state.active.len() >= self.limits.of(scope) {
            log::debug!(
                "task scope '{}' at capacity ({}), rejecting '{}'",
                scope.as_str(),
                self.limits.of(scope),
                id
            );
            return None;
        }

        let token = CancellationToken::new();
        state.active.push(id.to_string());
        state.tokens.insert(id.to_string(), token.clone());
        Some(token)
    }

    /// Normal completion: drop the registration without signalling the
    /// handle. No-op if the id is not registered.
    pub fn end_task(&self, scope: TaskScope, id: &str) {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        let state = scopes.entry(scope).or_default();
        state.tokens.remove(id);
        state.active.retain(|a| a != id);
    }

    /// Signal cancellation on the handle (if registered), then drop the
    /// registration. The id stops being tracked immediately, even if the
    /// operation is still draining.
    pub fn cancel_task(&self, scope: TaskScope, id: &str) {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        let state = scopes.entry(scope).or_default();
        if let Some(token) = state.tokens.remove(id) {
            token.cancel();
            log::debug!("cancelled task '{}' in scope '{}'", id, scope.as_str());
        }
        state.active.retain(|a| a != id);
    }

    /// Cancel every handle in the scope and clear it.
    pub fn cancel_all_tasks(&self, scope: TaskScope) {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        let state = scopes.entry(scope).or_default();
        for token in state.tokens.values() {
            token.cancel();
        }
        let dropped = state.active.len();
        state.tokens.clear();
        state.active.clear();
        if dropped > 0 {
            log::info!("cancelled {} task(s) in scope '{}'", dropped, scope.as_str());
        }
    }

    pub fn can_start(&self, scope: TaskScope) -> bool {
        self.active_count(scope) < self.limits.of(scope)
    }

    pub fn is_active(&self, scope: TaskScope, id: &str) -> bool {
        let scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes[&scope].tokens.contains_key(id)
    }

    pub fn active_count(&self, scope: TaskScope) -> usize {
        let scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes[&scope].active.len()
    }

    pub fn active_ids(&self, scope: TaskScope) -> Vec<String> {
        let scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes[&scope].active.clone()
    }

    /// Serializable snapshot of every scope's active ids.
    pub fn snapshot(&self) -> TaskSnapshot {
        let scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        TaskSnapshot {
            chat: scopes[&TaskScope::Chat].active.clone(),
            summarize: scopes[&TaskScope::Summarize].active.clone(),
            background: scopes[&TaskScope::Background].active.clone(),
        }
    }
}
