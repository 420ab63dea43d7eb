use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;

/// In-process index: User -> Set<ConnId>.
/// A user present in the map always has at least one connection.
pub struct SessionRegistry {
    users: DashMap<i64, HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            users: DashMap::new(),
        }
    }

    pub fn add(&self, user_id: i64, conn_id: &str) {
        self.users
            .entry(user_id)
            .or_default()
            .insert(conn_id.to_string());
    }

    /// Removes one connection and returns how many the user still has.
    /// The user's entry is dropped under the same shard lock when it empties.
    pub fn remove(&self, user_id: i64, conn_id: &str) -> usize {
        match self.users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().remove(conn_id);
                let remaining = entry.get().len();
                if remaining == 0 {
                    entry.remove();
                }
                remaining
            }
            Entry::Vacant(_) => 0,
        }
    }

    pub fn all_connections(&self, user_id: i64) -> HashSet<String> {
        self.users
            .get(&user_id)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    pub fn holds(&self, user_id: i64, conn_id: &str) -> bool {
        self.users
            .get(&user_id)
            .is_some_and(|conns| conns.contains(conn_id))
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
