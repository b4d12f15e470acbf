use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;

use sumten_core::grid::is_solvable;
use sumten_core::protocol::{
    ClientMessage, ConnectionId, HighscoreSubmission, LEADERBOARD_SIZE, ServerMessage,
};

use crate::db;
use crate::registry::{Departure, Room, RoomRegistry};
use crate::state::{AppState, Outbox};

/// Top-level WebSocket handler -- spawned per connection.
pub async fn handle_socket(state: Arc<AppState>, mut socket: WebSocket) {
    let conn_id = state.next_connection_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.register(conn_id, tx.clone());
    tracing::info!(connection = %conn_id, "connected");

    loop {
        tokio::select! {
            // Outbound: forward queued ServerMessage to the WebSocket.
            Some(msg) = rx.recv() => {
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(connection = %conn_id, error = %e, "failed to encode message"),
                }
            }
            // Inbound: read from the WebSocket.
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => handle_message(&state, conn_id, &tx, msg).await,
                            Err(e) => {
                                tracing::debug!(connection = %conn_id, error = %e, "dropping malformed message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection = %conn_id, error = %e, "socket error");
                        break;
                    }
                    _ => continue,
                }
            }
        }
    }

    disconnect(&state.rooms, conn_id);
    state.deregister(conn_id);
    tracing::info!(connection = %conn_id, "disconnected");
}

/// Dispatch a single client message.
pub async fn handle_message(
    state: &AppState,
    conn_id: ConnectionId,
    tx: &Outbox,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Join {
            room_code,
            nickname,
        } => join(&state.rooms, conn_id, tx, &room_code, &nickname),
        ClientMessage::Ready { room_code } => ready(&state.rooms, conn_id, &room_code),
        ClientMessage::ScoreUpdate {
            room_code,
            nickname,
            score,
        } => relay_score(&state.rooms, conn_id, &room_code, nickname, score),
        ClientMessage::Highscore { nickname, score } => {
            record_highscore(state, HighscoreSubmission { nickname, score }).await
        }
        ClientMessage::GetLeaderboard => send_leaderboard(state, conn_id, tx).await,
    }
}

// -- Room events --------------------------------------------------------------

/// Add the connection to `room_code` (creating the room on first join) and
/// send the membership list to everyone in it.
///
/// A connection lives in one room at a time: joining elsewhere first leaves
/// any previous room.
pub fn join(
    rooms: &RoomRegistry,
    conn_id: ConnectionId,
    tx: &Outbox,
    room_code: &str,
    nickname: &str,
) {
    let departures = rooms.leave_other_rooms(conn_id, room_code, send_players);
    log_departures(conn_id, &departures);

    let room = rooms.add_player(room_code, conn_id, nickname, tx.clone());
    tracing::info!(
        connection = %conn_id,
        room = room_code,
        nickname,
        players = room.len(),
        "joined room"
    );
    send_players(&room);
}

/// Mark the connection ready; start the game once every member of a
/// multi-player room is ready.
pub fn ready(rooms: &RoomRegistry, conn_id: ConnectionId, room_code: &str) {
    let Some(room) = rooms.mark_ready(room_code, conn_id) else {
        tracing::debug!(connection = %conn_id, room = room_code, "ready ignored: not a member");
        return;
    };

    tracing::info!(
        connection = %conn_id,
        room = room_code,
        states = %room.ready_summary(),
        "ready check"
    );

    if room.all_ready() {
        debug_assert!(is_solvable(room.grid()));
        tracing::info!(room = room_code, players = room.len(), "all players ready, starting game");
        room.broadcast(&ServerMessage::StartGame { grid: *room.grid() });
    }
}

/// Relay a score to the other members of the room. Fire-and-forget.
pub fn relay_score(
    rooms: &RoomRegistry,
    conn_id: ConnectionId,
    room_code: &str,
    nickname: String,
    score: i64,
) {
    let Some(room) = rooms.room(room_code) else {
        return;
    };
    if !room.contains(conn_id) {
        return;
    }
    room.broadcast_except(conn_id, &ServerMessage::ScoreUpdate { nickname, score });
}

/// Remove the connection from every room it is in and update the survivors.
pub fn disconnect(rooms: &RoomRegistry, conn_id: ConnectionId) -> Vec<Departure> {
    let departures = rooms.remove_by_connection(conn_id, send_players);
    log_departures(conn_id, &departures);
    departures
}

fn send_players(room: &Room) {
    room.broadcast(&ServerMessage::Players {
        players: room.player_list(),
    });
}

fn log_departures(conn_id: ConnectionId, departures: &[Departure]) {
    for d in departures {
        tracing::info!(
            connection = %conn_id,
            room = %d.code,
            remaining = d.remaining,
            "left room"
        );
    }
}

// -- Leaderboard events -------------------------------------------------------

/// Store a score and push the refreshed leaderboard to every connection.
/// Malformed submissions and storage failures are dropped silently.
pub async fn record_highscore(state: &AppState, submission: HighscoreSubmission) {
    let Some(submission) = submission.validated() else {
        tracing::debug!("dropping highscore with blank nickname");
        return;
    };

    if let Err(e) = db::record_score(&state.db, &submission.nickname, submission.score).await {
        tracing::warn!(nickname = %submission.nickname, error = %e, "failed to record highscore");
        return;
    }

    match db::get_top(&state.db, LEADERBOARD_SIZE).await {
        Ok(entries) => {
            tracing::info!(
                nickname = %submission.nickname,
                score = submission.score,
                "leaderboard updated"
            );
            state.broadcast_all(&ServerMessage::UpdateLeaderboard { entries });
        }
        Err(e) => tracing::warn!(error = %e, "failed to load leaderboard"),
    }
}

/// Send the current leaderboard to one connection.
pub async fn send_leaderboard(state: &AppState, conn_id: ConnectionId, tx: &Outbox) {
    match db::get_top(&state.db, LEADERBOARD_SIZE).await {
        Ok(entries) => {
            let _ = tx.send(ServerMessage::UpdateLeaderboard { entries });
        }
        Err(e) => tracing::warn!(connection = %conn_id, error = %e, "failed to load leaderboard"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sumten_core::grid::{GRID_COLS, GRID_ROWS};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Client {
        id: ConnectionId,
        tx: Outbox,
        rx: UnboundedReceiver<ServerMessage>,
    }

    fn client(id: u64) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        Client {
            id: ConnectionId(id),
            tx,
            rx,
        }
    }

    fn drain(c: &mut Client) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = c.rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn nicknames(msg: &ServerMessage) -> Vec<String> {
        match msg {
            ServerMessage::Players { players } => {
                players.iter().map(|p| p.nickname.clone()).collect()
            }
            other => panic!("Expected Players, got {:?}", other),
        }
    }

    fn start_games(msgs: &[ServerMessage]) -> Vec<&sumten_core::grid::Grid> {
        msgs.iter()
            .filter_map(|m| match m {
                ServerMessage::StartGame { grid } => Some(grid),
                _ => None,
            })
            .collect()
    }

    async fn app_state() -> AppState {
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        db::init_db(&pool).await.unwrap();
        AppState::new(pool, 10)
    }

    #[test]
    fn join_broadcasts_players_to_all_members() {
        let rooms = RoomRegistry::new();
        let mut ann = client(1);
        let mut bob = client(2);

        join(&rooms, ann.id, &ann.tx, "ABCD", "Ann");
        assert_eq!(nicknames(&drain(&mut ann)[0]), vec!["Ann"]);

        join(&rooms, bob.id, &bob.tx, "ABCD", "Bob");
        assert_eq!(nicknames(&drain(&mut ann)[0]), vec!["Ann", "Bob"]);
        assert_eq!(nicknames(&drain(&mut bob)[0]), vec!["Ann", "Bob"]);
    }

    #[test]
    fn two_ready_players_receive_identical_grid() {
        let rooms = RoomRegistry::new();
        let mut ann = client(1);
        let mut bob = client(2);
        join(&rooms, ann.id, &ann.tx, "ABCD", "Ann");
        join(&rooms, bob.id, &bob.tx, "ABCD", "Bob");
        drain(&mut ann);
        drain(&mut bob);

        ready(&rooms, ann.id, "ABCD");
        assert!(drain(&mut ann).is_empty());
        assert!(drain(&mut bob).is_empty());

        ready(&rooms, bob.id, "ABCD");
        let a = drain(&mut ann);
        let b = drain(&mut bob);
        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
        match &a[0] {
            ServerMessage::StartGame { grid } => {
                assert_eq!(grid.len(), GRID_ROWS);
                assert!(grid.iter().all(|row| row.len() == GRID_COLS));
                assert!(is_solvable(grid));
                assert_eq!(grid, rooms.room("ABCD").unwrap().grid());
            }
            other => panic!("Expected StartGame, got {:?}", other),
        }
    }

    #[test]
    fn solo_room_never_starts() {
        let rooms = RoomRegistry::new();
        let mut ann = client(1);
        join(&rooms, ann.id, &ann.tx, "SOLO", "Ann");
        drain(&mut ann);

        ready(&rooms, ann.id, "SOLO");
        ready(&rooms, ann.id, "SOLO");
        assert!(drain(&mut ann).is_empty());
    }

    #[test]
    fn ready_for_unknown_room_or_non_member_is_silent() {
        let rooms = RoomRegistry::new();
        let mut ann = client(1);
        let mut bob = client(2);
        join(&rooms, ann.id, &ann.tx, "ABCD", "Ann");
        drain(&mut ann);

        ready(&rooms, ann.id, "ZZZZ");
        ready(&rooms, bob.id, "ABCD");
        assert!(!rooms.contains("ZZZZ"));
        assert!(drain(&mut ann).is_empty());
        assert!(drain(&mut bob).is_empty());
    }

    #[test]
    fn score_update_skips_sender() {
        let rooms = RoomRegistry::new();
        let mut ann = client(1);
        let mut bob = client(2);
        let mut cid = client(3);
        for (c, name) in [(&ann, "Ann"), (&bob, "Bob"), (&cid, "Cid")] {
            join(&rooms, c.id, &c.tx, "ABCD", name);
        }
        drain(&mut ann);
        drain(&mut bob);
        drain(&mut cid);

        relay_score(&rooms, ann.id, "ABCD", "Ann".into(), 42);

        let expected = ServerMessage::ScoreUpdate {
            nickname: "Ann".into(),
            score: 42,
        };
        assert!(drain(&mut ann).is_empty());
        assert_eq!(drain(&mut bob), vec![expected.clone()]);
        assert_eq!(drain(&mut cid), vec![expected]);
    }

    #[test]
    fn score_update_from_outsider_is_dropped() {
        let rooms = RoomRegistry::new();
        let mut ann = client(1);
        join(&rooms, ann.id, &ann.tx, "ABCD", "Ann");
        drain(&mut ann);

        relay_score(&rooms, ConnectionId(99), "ABCD", "Eve".into(), 1);
        relay_score(&rooms, ann.id, "NOPE", "Ann".into(), 1);
        assert!(drain(&mut ann).is_empty());
    }

    #[test]
    fn disconnect_updates_remaining_members() {
        let rooms = RoomRegistry::new();
        let mut ann = client(1);
        let mut bob = client(2);
        join(&rooms, ann.id, &ann.tx, "ABCD", "Ann");
        join(&rooms, bob.id, &bob.tx, "ABCD", "Bob");
        drain(&mut ann);
        drain(&mut bob);

        disconnect(&rooms, bob.id);
        assert_eq!(nicknames(&drain(&mut ann)[0]), vec!["Ann"]);

        let departures = disconnect(&rooms, ann.id);
        assert_eq!(departures[0].remaining, 0);
        assert!(!rooms.contains("ABCD"));
    }

    #[test]
    fn joining_another_room_leaves_the_first() {
        let rooms = RoomRegistry::new();
        let mut ann = client(1);
        let mut bob = client(2);
        join(&rooms, ann.id, &ann.tx, "AAAA", "Ann");
        join(&rooms, bob.id, &bob.tx, "AAAA", "Bob");
        drain(&mut ann);
        drain(&mut bob);

        join(&rooms, bob.id, &bob.tx, "BBBB", "Bob");
        assert_eq!(nicknames(&drain(&mut ann)[0]), vec!["Ann"]);
        assert_eq!(nicknames(&drain(&mut bob)[0]), vec!["Bob"]);
        assert!(!rooms.room("AAAA").unwrap().contains(bob.id));
    }

    #[test]
    fn rejoining_same_room_keeps_single_entry() {
        let rooms = RoomRegistry::new();
        let mut ann = client(1);
        join(&rooms, ann.id, &ann.tx, "ABCD", "Ann");
        join(&rooms, ann.id, &ann.tx, "ABCD", "Ann");

        let msgs = drain(&mut ann);
        assert_eq!(msgs.len(), 2);
        assert_eq!(nicknames(&msgs[1]), vec!["Ann"]);
    }

    #[tokio::test]
    async fn highscore_is_broadcast_to_every_connection() {
        let state = app_state().await;
        let mut lobby = client(1);
        let mut player = client(2);
        state.register(lobby.id, lobby.tx.clone());
        state.register(player.id, player.tx.clone());

        for score in [10, 5, 20, 15] {
            handle_message(
                &state,
                player.id,
                &player.tx,
                ClientMessage::Highscore {
                    nickname: "Ann".into(),
                    score,
                },
            )
            .await;
        }

        let last = drain(&mut lobby).pop().unwrap();
        match last {
            ServerMessage::UpdateLeaderboard { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].score, 20);
            }
            other => panic!("Expected UpdateLeaderboard, got {:?}", other),
        }
        assert_eq!(drain(&mut player).len(), 4);
    }

    #[tokio::test]
    async fn blank_highscore_is_dropped() {
        let state = app_state().await;
        let mut ann = client(1);
        state.register(ann.id, ann.tx.clone());

        record_highscore(
            &state,
            HighscoreSubmission {
                nickname: " ".into(),
                score: 99,
            },
        )
        .await;

        assert!(drain(&mut ann).is_empty());
        assert!(db::get_top(&state.db, LEADERBOARD_SIZE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_leaderboard_answers_only_the_requester() {
        let state = app_state().await;
        let mut ann = client(1);
        let mut bob = client(2);
        state.register(ann.id, ann.tx.clone());
        state.register(bob.id, bob.tx.clone());
        db::record_score(&state.db, "Ann", 7).await.unwrap();

        handle_message(&state, ann.id, &ann.tx, ClientMessage::GetLeaderboard).await;

        assert_eq!(
            drain(&mut ann),
            vec![ServerMessage::UpdateLeaderboard {
                entries: vec![sumten_core::protocol::LeaderboardEntry {
                    nickname: "Ann".into(),
                    score: 7,
                }],
            }]
        );
        assert!(drain(&mut bob).is_empty());
    }

    #[test]
    fn concurrent_ready_starts_exactly_once() {
        const PLAYERS: u64 = 8;
        for _ in 0..20 {
            let rooms = RoomRegistry::new();
            let mut clients: Vec<Client> = (1..=PLAYERS).map(client).collect();
            let barrier = std::sync::Barrier::new(PLAYERS as usize);

            std::thread::scope(|s| {
                for c in &clients {
                    let (id, tx) = (c.id, c.tx.clone());
                    let (rooms, barrier) = (&rooms, &barrier);
                    s.spawn(move || {
                        join(rooms, id, &tx, "RACE", "p");
                        barrier.wait();
                        ready(rooms, id, "RACE");
                    });
                }
            });

            assert_eq!(rooms.len(), 1);
            let room = rooms.room("RACE").unwrap();
            assert_eq!(room.len(), PLAYERS as usize);
            for c in &mut clients {
                let msgs = drain(c);
                let starts = start_games(&msgs);
                assert_eq!(starts.len(), 1, "{} saw {} startGame", c.id, starts.len());
                assert_eq!(starts[0], room.grid());
            }
        }
    }
}
