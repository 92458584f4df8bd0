use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An account that owns folders and subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-request call context propagated from the HTTP layer into the
/// filesystem and event code.
///
/// `client_id` identifies the browser tab / device that issued the request so
/// the change it caused is not echoed back to it.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user: Option<Arc<User>>,
    pub client_id: Option<Uuid>,
}

impl RequestContext {
    pub fn for_user(user: Arc<User>) -> Self {
        Self {
            user: Some(user),
            client_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: Uuid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// The authenticated user, if any.
    pub fn user(&self) -> Option<&Arc<User>> {
        self.user.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> Arc<User> {
        Arc::new(User {
            id: 1,
            email: "a@example.com".to_string(),
            display_name: None,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn context_carries_user_and_client() {
        let id = Uuid::new_v4();
        let ctx = RequestContext::for_user(test_user()).with_client_id(id);
        assert_eq!(ctx.user().unwrap().id, 1);
        assert_eq!(ctx.client_id, Some(id));
    }

    #[test]
    fn default_context_is_anonymous() {
        let ctx = RequestContext::default();
        assert!(ctx.user().is_none());
        assert!(ctx.client_id.is_none());
    }
}
