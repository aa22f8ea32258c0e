use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use chatsync::auth::SessionAuth;
use chatsync::config::CoreConfig;
use chatsync::models::{collections, CreateGroupRequest};
use chatsync::store::{DocumentStore, MemoryStore, WriteOp};
use chatsync::ChatCore;

/// Test harness wrapping a fully-wired core over a fresh in-memory
/// store. Each test builds its own, so no data leaks between tests.
pub struct TestCore {
    pub core: ChatCore,
    pub store: Arc<MemoryStore>,
    pub auth: Arc<SessionAuth>,
}

impl TestCore {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::test_default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        // Logs show up with `--nocapture` and RUST_LOG set.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        let auth = Arc::new(SessionAuth::new());
        let core = ChatCore::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&auth) as Arc<dyn chatsync::auth::AuthProvider>,
            config,
        );
        TestCore { core, store, auth }
    }

    // ── High-level helpers ───────────────────────────────

    /// Seed a user profile document and return its id.
    pub async fn user(&self, first_name: &str, last_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let profile = json!({
            "id": id,
            "first_name": first_name,
            "last_name": last_name,
            "avatar_url": null,
        });
        self.store
            .atomic_write(vec![WriteOp::Insert {
                collection: collections::USERS.to_string(),
                id: id.to_string(),
                data: profile,
            }])
            .await
            .expect("seed user");
        id
    }

    pub fn sign_in(&self, user_id: Uuid) {
        self.auth.sign_in(user_id);
    }

    /// Send a DM as `sender` and return the conversation id.
    pub async fn send_as(&self, sender: Uuid, recipient: Uuid, text: &str) -> String {
        self.sign_in(sender);
        self.core
            .messages
            .send(recipient, text)
            .await
            .expect("send direct message")
    }

    /// Create a group as `owner` with the given members and capacity.
    pub async fn group_as(
        &self,
        owner: Uuid,
        name: &str,
        member_ids: Vec<Uuid>,
        max_members: Option<u32>,
    ) -> Uuid {
        self.sign_in(owner);
        self.core
            .groups
            .create_group(CreateGroupRequest {
                name: name.to_string(),
                description: None,
                member_ids,
                max_members,
                is_private: true,
            })
            .await
            .expect("create group")
    }

    /// Send a group message as `sender` and return the message id.
    pub async fn group_send_as(&self, sender: Uuid, group_id: Uuid, text: &str) -> Uuid {
        self.sign_in(sender);
        self.core
            .groups
            .send_group_message(group_id, text)
            .await
            .expect("send group message")
    }
}
