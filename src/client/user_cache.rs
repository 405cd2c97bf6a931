use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use super::{ClientError, UserInfo, WikiClient};

/// Single-flight cache over `WikiClient::fetch_user`: concurrent lookups
/// for the same username share one in-flight call instead of each issuing
/// its own `getUser` request. A failed lookup is not cached — the cell is
/// left uninitialized so a later retry can try again.
#[derive(Default)]
pub struct UserCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<UserInfo>>>>,
}

impl UserCache {
    pub fn new() -> Self {
        UserCache::default()
    }

    pub async fn fetch(&self, client: &dyn WikiClient, username: &str) -> Result<UserInfo, ClientError> {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(username.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_try_init(|| client.fetch_user(username))
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockWikiClient;

    #[tokio::test]
    async fn concurrent_lookups_for_the_same_user_share_one_fetch() {
        let client = MockWikiClient::new();
        client.seed_user(UserInfo {
            username: "jdoe".into(),
            display_name: "Jane Doe".into(),
            profile_page_id: None,
        });
        let cache = UserCache::new();
        let (a, b) = tokio::join!(cache.fetch(&client, "jdoe"), cache.fetch(&client, "jdoe"));
        assert_eq!(a.unwrap().display_name, "Jane Doe");
        assert_eq!(b.unwrap().display_name, "Jane Doe");
    }

    #[tokio::test]
    async fn a_failed_lookup_is_not_cached_and_can_be_retried() {
        let client = MockWikiClient::new();
        let cache = UserCache::new();
        assert!(cache.fetch(&client, "jdoe").await.is_err());
        client.seed_user(UserInfo {
            username: "jdoe".into(),
            display_name: "Jane Doe".into(),
            profile_page_id: None,
        });
        assert!(cache.fetch(&client, "jdoe").await.is_ok());
    }
}
