use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;

use sumten_core::grid::{Grid, generate_grid};
use sumten_core::protocol::{ConnectionId, PlayerInfo, ServerMessage};

use crate::state::Outbox;

/// Exclusive access to one room. Broadcasts computed while holding it are
/// ordered with respect to every other mutation of that room.
pub type RoomGuard<'a> = RefMut<'a, String, Room>;

/// A room member.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: ConnectionId,
    pub nickname: String,
    /// Never reset to false while the room exists.
    pub ready: bool,
    tx: Outbox,
}

impl Player {
    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id,
            nickname: self.nickname.clone(),
            ready: self.ready,
        }
    }
}

/// A game room. The grid is generated once on creation and never changes.
#[derive(Debug)]
pub struct Room {
    code: String,
    players: Vec<Player>,
    grid: Grid,
    created_at: Instant,
}

impl Room {
    fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            players: Vec::new(),
            grid: generate_grid(),
            created_at: Instant::now(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Members in join order.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    /// Append a member with `ready = false`. Returns false if the connection
    /// is already in this room.
    pub fn add_player(&mut self, id: ConnectionId, nickname: &str, tx: Outbox) -> bool {
        if self.contains(id) {
            return false;
        }
        self.players.push(Player {
            id,
            nickname: nickname.to_string(),
            ready: false,
            tx,
        });
        true
    }

    /// Returns false if the connection is not a member.
    pub fn mark_ready(&mut self, id: ConnectionId) -> bool {
        match self.players.iter_mut().find(|p| p.id == id) {
            Some(player) => {
                player.ready = true;
                true
            }
            None => false,
        }
    }

    /// More than one member, and all of them ready.
    pub fn all_ready(&self) -> bool {
        self.players.len() > 1 && self.players.iter().all(|p| p.ready)
    }

    fn remove_player(&mut self, id: ConnectionId) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.id != id);
        self.players.len() != before
    }

    pub fn player_list(&self) -> Vec<PlayerInfo> {
        self.players.iter().map(Player::info).collect()
    }

    /// Human-readable ready states, e.g. `Ann: true, Bob: false`.
    pub fn ready_summary(&self) -> String {
        self.players
            .iter()
            .map(|p| format!("{}: {}", p.nickname, p.ready))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn broadcast(&self, msg: &ServerMessage) {
        for player in &self.players {
            let _ = player.tx.send(msg.clone());
        }
    }

    pub fn broadcast_except(&self, sender: ConnectionId, msg: &ServerMessage) {
        for player in self.players.iter().filter(|p| p.id != sender) {
            let _ = player.tx.send(msg.clone());
        }
    }
}

/// A membership removal caused by a connection leaving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub code: String,
    /// Members left afterwards; zero means the room was deleted.
    pub remaining: usize,
}

/// Every live room, keyed by its client-chosen code.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    /// Lock the room for `code`, creating it (and its grid) if absent.
    ///
    /// A room left behind with no members counts as absent and is replaced.
    pub fn ensure_room(&self, code: &str) -> RoomGuard<'_> {
        match self.rooms.entry(code.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_empty() => entry.into_ref(),
            Entry::Occupied(mut entry) => {
                entry.insert(Room::new(code));
                tracing::info!(room = code, "created room");
                entry.into_ref()
            }
            Entry::Vacant(entry) => {
                tracing::info!(room = code, "created room");
                entry.insert(Room::new(code))
            }
        }
    }

    /// Lock an existing room.
    pub fn room(&self, code: &str) -> Option<RoomGuard<'_>> {
        self.rooms.get_mut(code)
    }

    /// Add a member to the room for `code`, creating the room if needed.
    /// A connection already in the room is not added again.
    pub fn add_player(
        &self,
        code: &str,
        id: ConnectionId,
        nickname: &str,
        tx: Outbox,
    ) -> RoomGuard<'_> {
        let mut room = self.ensure_room(code);
        room.add_player(id, nickname, tx);
        room
    }

    /// Mark a member ready. Returns the still-locked room so the caller can
    /// evaluate the barrier atomically, or `None` when the room or the member
    /// does not exist.
    pub fn mark_ready(&self, code: &str, id: ConnectionId) -> Option<RoomGuard<'_>> {
        let mut room = self.rooms.get_mut(code)?;
        room.mark_ready(id).then_some(room)
    }

    pub fn all_ready(&self, code: &str) -> bool {
        self.rooms.get(code).is_some_and(|room| room.all_ready())
    }

    /// Remove `id` from every room it is in. `on_change` runs under the room's
    /// lock for each room that still has members afterwards; rooms left empty
    /// are deleted.
    pub fn remove_by_connection(
        &self,
        id: ConnectionId,
        on_change: impl FnMut(&Room),
    ) -> Vec<Departure> {
        self.remove_where(id, None, on_change)
    }

    /// Like [`remove_by_connection`](Self::remove_by_connection) but leaves
    /// the membership in `keep` untouched.
    pub fn leave_other_rooms(
        &self,
        id: ConnectionId,
        keep: &str,
        on_change: impl FnMut(&Room),
    ) -> Vec<Departure> {
        self.remove_where(id, Some(keep), on_change)
    }

    fn remove_where(
        &self,
        id: ConnectionId,
        keep: Option<&str>,
        mut on_change: impl FnMut(&Room),
    ) -> Vec<Departure> {
        let mut departures = Vec::new();
        for mut entry in self.rooms.iter_mut() {
            if keep == Some(entry.key().as_str()) {
                continue;
            }
            let room = entry.value_mut();
            if !room.remove_player(id) {
                continue;
            }
            if !room.is_empty() {
                on_change(room);
            }
            departures.push(Departure {
                code: room.code.clone(),
                remaining: room.len(),
            });
        }

        for departure in departures.iter().filter(|d| d.remaining == 0) {
            if let Some((code, room)) = self.rooms.remove_if(&departure.code, |_, room| room.is_empty())
            {
                tracing::info!(
                    room = %code,
                    age_secs = room.created_at().elapsed().as_secs(),
                    "cleaned up empty room"
                );
            }
        }
        departures
    }
}
