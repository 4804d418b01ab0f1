//! Monthly active users.
//!
//! One row per user per calendar month, `MAU#<yyyy-mm> / <user_id>`. The row is written with a
//! create-if-absent condition, so a user counts once per month no matter how often they sign in.
//! Each row written also bumps the `mau_unique_users_seen_total` counter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::Counter;

use crate::dynamodb::{av_map, av_s};
use crate::store::{Condition, Key, KvStore, Query, StoreError};
use crate::utils::time::{date_time_iso_str, year_month};

pub struct ActivityStore {
    store: Arc<dyn KvStore>,
    users_seen: Counter,
}

impl ActivityStore {
    pub fn new(store: Arc<dyn KvStore>, users_seen: Counter) -> Self {
        Self { store, users_seen }
    }

    /// Record that the user was active at `now`. Returns `true` only for the first activity of
    /// the month.
    pub async fn record_if_new(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut item = Key::new(format!("MAU#{}", year_month(&now)), user_id).to_item();
        item.extend(av_map(&[av_s("recorded_at", &date_time_iso_str(&now))]));
        match self.store.put(item, Condition::not_exists()).await {
            Ok(()) => {
                self.users_seen.increment(1);
                Ok(true)
            }
            Err(StoreError::PreconditionFailed) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Number of distinct active users in a month, eg. "2024-03".
    pub async fn count(&self, year_month: &str) -> Result<usize, StoreError> {
        let rows = self
            .store
            .query_all(&Query::new(format!("MAU#{}", year_month)))
            .await?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU64, Ordering};

    use chrono::TimeZone;

    use crate::testing::MemoryStore;

    #[tokio::test]
    async fn test_counts_each_user_once_per_month() {
        let seen = Arc::new(AtomicU64::new(0));
        let activity =
            ActivityStore::new(MemoryStore::new_arc(), Counter::from_arc(seen.clone()));
        let march = Utc.ymd(2024, 3, 1).and_hms(10, 0, 0);
        let later_in_march = Utc.ymd(2024, 3, 30).and_hms(23, 59, 59);
        let april = Utc.ymd(2024, 4, 1).and_hms(0, 0, 0);

        assert!(activity.record_if_new("u_1", march).await.unwrap());
        assert!(!activity.record_if_new("u_1", later_in_march).await.unwrap());
        assert!(activity.record_if_new("u_2", later_in_march).await.unwrap());
        assert!(activity.record_if_new("u_1", april).await.unwrap());

        assert_eq!(activity.count("2024-03").await.unwrap(), 2);
        assert_eq!(activity.count("2024-04").await.unwrap(), 1);
        assert_eq!(activity.count("2024-05").await.unwrap(), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
