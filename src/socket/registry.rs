use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::socket::protocol::ServerEvent;

/// 连接的出站通道
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// 本进程的连接表和组播房间
///
/// 只保存本进程持有的连接；其他进程的连接通过在线状态记录中的
/// socketId 定位。
#[derive(Default)]
pub struct ConnectionRegistry {
    /// conn_id -> 出站通道
    connections: DashMap<String, Outbound>,
    /// 房间 -> conn_id 集合
    rooms: DashMap<String, HashSet<String>>,
    /// conn_id -> 已加入的房间
    memberships: DashMap<String, HashSet<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn_id: &str, outbound: Outbound) {
        self.connections.insert(conn_id.to_string(), outbound);
        tracing::debug!(conn_id, "connection added");
    }

    /// 移除连接并退出所有房间，返回退出的房间
    pub fn remove(&self, conn_id: &str) -> Vec<String> {
        self.connections.remove(conn_id);
        let rooms: Vec<String> = self
            .memberships
            .remove(conn_id)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();

        for room in &rooms {
            self.drop_member(room, conn_id);
        }
        rooms
    }

    pub fn is_live(&self, conn_id: &str) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// 发送给本进程的某个连接，连接不存在或已关闭时返回 false
    pub fn send(&self, conn_id: &str, event: ServerEvent) -> bool {
        match self.connections.get(conn_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// 加入房间，已在房间中时返回 false
    pub fn join(&self, conn_id: &str, room: &str) -> bool {
        if !self.connections.contains_key(conn_id) {
            return false;
        }
        let joined = self
            .memberships
            .entry(conn_id.to_string())
            .or_default()
            .insert(room.to_string());
        if joined {
            self.rooms
                .entry(room.to_string())
                .or_default()
                .insert(conn_id.to_string());
        }
        joined
    }

    pub fn leave(&self, conn_id: &str, room: &str) -> bool {
        let left = self
            .memberships
            .get_mut(conn_id)
            .is_some_and(|mut rooms| rooms.remove(room));
        if left {
            self.drop_member(room, conn_id);
        }
        left
    }

    /// 发送给房间内所有连接，返回送达数
    pub fn broadcast(&self, room: &str, event: &ServerEvent) -> usize {
        let members: Vec<String> = match self.rooms.get(room) {
            Some(members) => members.iter().cloned().collect(),
            None => return 0,
        };
        members
            .iter()
            .filter(|conn_id| self.send(conn_id, event.clone()))
            .count()
    }

    pub fn rooms_of(&self, conn_id: &str) -> Vec<String> {
        self.memberships
            .get(conn_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn drop_member(&self, room: &str, conn_id: &str) {
        let now_empty = self
            .rooms
            .get_mut(room)
            .map(|mut members| {
                members.remove(conn_id);
                members.is_empty()
            })
            .unwrap_or(false);
        if now_empty {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(registry: &ConnectionRegistry, conn_id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.add(conn_id, tx);
        rx
    }

    #[test]
    fn broadcast_reaches_room_members_only() {
        let registry = ConnectionRegistry::new();
        let mut a = connect(&registry, "a");
        let mut b = connect(&registry, "b");
        let mut c = connect(&registry, "c");

        assert!(registry.join("a", "driver:d1"));
        assert!(!registry.join("a", "driver:d1"));
        assert!(registry.join("b", "driver:d1"));

        let delivered = registry.broadcast("driver:d1", &ServerEvent::notice("hi"));
        assert_eq!(delivered, 2);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
        assert!(c.try_recv().is_err());
    }

    #[test]
    fn remove_leaves_every_room() {
        let registry = ConnectionRegistry::new();
        let _rx = connect(&registry, "a");
        registry.join("a", "driver:d1");
        registry.join("a", "driver:d2");

        let mut left = registry.remove("a");
        left.sort();
        assert_eq!(left, vec!["driver:d1", "driver:d2"]);
        assert!(!registry.is_live("a"));
        assert_eq!(registry.broadcast("driver:d1", &ServerEvent::notice("x")), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn leave_and_unknown_connections() {
        let registry = ConnectionRegistry::new();
        let _rx = connect(&registry, "a");
        assert!(!registry.join("ghost", "driver:d1"));
        registry.join("a", "driver:d1");
        assert!(registry.leave("a", "driver:d1"));
        assert!(!registry.leave("a", "driver:d1"));
        assert!(registry.rooms_of("a").is_empty());
        assert!(!registry.send("ghost", ServerEvent::notice("x")));
    }

    #[test]
    fn closed_receivers_are_not_live() {
        let registry = ConnectionRegistry::new();
        let rx = connect(&registry, "a");
        assert!(registry.is_live("a"));
        drop(rx);
        assert!(!registry.is_live("a"));
    }
}
