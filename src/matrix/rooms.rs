//! Joined-room registry
//!
//! Shared between the sync listener (writer), the typing heartbeat and the
//! sender (readers). Readers always work on a snapshot.

use super::traits::RoomId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-wide set of joined rooms
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<BTreeSet<RoomId>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a joined room; false if it was already known
    pub async fn insert(&self, room: RoomId) -> bool {
        self.rooms.write().await.insert(room)
    }

    pub async fn remove(&self, room: &RoomId) -> bool {
        self.rooms.write().await.remove(room)
    }

    pub async fn contains(&self, room: &RoomId) -> bool {
        self.rooms.read().await.contains(room)
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Consistent copy of the joined rooms, ordered by room ID
    pub async fn snapshot(&self) -> Vec<RoomId> {
        self.rooms.read().await.iter().cloned().collect()
    }

    /// Apply membership changes from one sync batch
    pub async fn apply(&self, joined: &[RoomId], left: &[RoomId]) {
        if joined.is_empty() && left.is_empty() {
            return;
        }
        let mut rooms = self.rooms.write().await;
        rooms.extend(joined.iter().cloned());
        for room in left {
            rooms.remove(room);
        }
    }
}
