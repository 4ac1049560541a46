#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use parley_client::{ChatEntry, Client, ClientConfig, SessionContext};
use parley_shared::{ChatId, ManualClock, MemoryIdentityProvider, ProvisionalId, UserId};
use parley_store::{Database, FlakyStore, MemoryStore, Message, MessageDraft};

pub const ALICE: &str = "alice@example.com";
pub const BOB: &str = "bob@example.com";

pub struct Harness {
    pub clock: ManualClock,
    pub idp: Arc<MemoryIdentityProvider>,
    pub store: Arc<FlakyStore<MemoryStore>>,
    pub client: Arc<Client>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let clock = ManualClock::new(Utc::now());
        let idp = Arc::new(MemoryIdentityProvider::new(Arc::new(clock.clone())));
        let store = Arc::new(FlakyStore::new(MemoryStore::new(Arc::new(clock.clone()))));
        let client = Arc::new(Client::new(
            config,
            Arc::new(clock.clone()),
            idp.clone(),
            store.clone(),
            Database::open_in_memory().expect("in-memory database"),
        ));
        Self {
            clock,
            idp,
            store,
            client,
        }
    }

    pub async fn sign_in(&self, email: &str) -> SessionContext {
        self.client.auth().request_code(email).await.expect("request code");
        let code = self.idp.last_code(email).expect("code issued");
        self.client.verify(&code).await.expect("verify")
    }

    /// Sign in as Alice and open the direct conversation with Bob.
    pub async fn alice_with_bob(&self) -> ChatId {
        self.sign_in(ALICE).await;
        self.client
            .sync()
            .open_direct(&bob())
            .await
            .expect("open direct conversation")
    }

    /// Bob posts straight to the store, as his own client would.
    pub async fn bob_says(&self, chat_id: ChatId, text: &str) -> Message {
        use parley_store::DataStore;
        self.store
            .inner()
            .insert_message(MessageDraft {
                provisional_id: ProvisionalId::new(),
                chat_id,
                sender_id: bob(),
                content: text.to_string(),
            })
            .await
            .expect("bob's insert")
    }

    pub async fn entries(&self) -> Vec<ChatEntry> {
        self.client.sync().entries().await.unwrap_or_default()
    }

    /// Wait until the open view satisfies `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&[ChatEntry]) -> bool) -> Vec<ChatEntry> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let entries = self.entries().await;
            if pred(&entries) {
                return entries;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "view never reached expected state: {entries:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn alice() -> UserId {
    MemoryIdentityProvider::user_id_for(ALICE)
}

pub fn bob() -> UserId {
    MemoryIdentityProvider::user_id_for(BOB)
}
