//! Live room registry and the room-scoped actions
//!
//! Every room sits behind its own mutex; the registry map is only touched to
//! look a room up, insert it or remove it. Room events go out on the room's
//! broadcast channel while its lock is held so subscribers see them in the
//! order they happened. Lobby events go out on a single global channel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::game::simulation;
use crate::ws::protocol::{RoomSummary, ServerMsg};

use super::bot::BotController;
use super::error::RoomError;
use super::physics::{PaddleInput, PhysicsEngine};
use super::r#match::RematchOutcome;
use super::room::{GameMode, ParticipantId, Room, RoomId};
use super::state::Side;

const ROOM_CHANNEL_CAPACITY: usize = 128;
const LOBBY_CHANNEL_CAPACITY: usize = 64;

/// Shared handle to one live room
pub struct RoomHandle {
    pub id: RoomId,
    room: Mutex<Room>,
    events: broadcast::Sender<ServerMsg>,
}

impl RoomHandle {
    pub fn new(room: Room) -> Self {
        let (events, _) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
        Self {
            id: room.id,
            room: Mutex::new(room),
            events,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Room> {
        self.room.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.events.subscribe()
    }

    /// Fan out to the room's subscribers; nobody listening is fine
    pub fn broadcast(&self, msg: ServerMsg) {
        let _ = self.events.send(msg);
    }
}

/// Result of a successful join
pub struct Joined {
    pub seat: Option<Side>,
    /// `init` for the joiner
    pub init: ServerMsg,
    /// Room events from this point on
    pub events: broadcast::Receiver<ServerMsg>,
}

/// Registry of all live rooms
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<RoomHandle>>,
    lobby: broadcast::Sender<ServerMsg>,
    bot: Arc<BotController>,
}

impl RoomRegistry {
    pub fn new(bot: BotController) -> Self {
        let (lobby, _) = broadcast::channel(LOBBY_CHANNEL_CAPACITY);
        Self {
            rooms: DashMap::new(),
            lobby,
            bot: Arc::new(bot),
        }
    }

    pub fn subscribe_lobby(&self) -> broadcast::Receiver<ServerMsg> {
        self.lobby.subscribe()
    }

    fn announce(&self, msg: ServerMsg) {
        let _ = self.lobby.send(msg);
    }

    /// Register a new room. The creator is not seated until they join.
    pub fn create(
        &self,
        id: RoomId,
        mode: GameMode,
        win_points: u32,
        creator: ParticipantId,
    ) -> Result<RoomSummary, RoomError> {
        if win_points == 0 {
            return Err(RoomError::invalid_state("win_points must be at least 1"));
        }

        let handle = match self.rooms.entry(id) {
            Entry::Occupied(_) => return Err(RoomError::AlreadyExists),
            Entry::Vacant(slot) => {
                let room = Room::new(id, mode, win_points, creator, rand::random());
                let handle = Arc::new(RoomHandle::new(room));
                slot.insert(handle.clone());
                handle
            }
        };

        let summary = summarize(&handle.lock());
        info!(room_id = %id, mode = ?mode, win_points, creator = %creator, "Room created");
        self.announce(ServerMsg::RoomCreated {
            room: summary.clone(),
        });
        Ok(summary)
    }

    pub fn get(&self, id: RoomId) -> Result<Arc<RoomHandle>, RoomError> {
        self.rooms
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RoomError::NotFound)
    }

    fn handles(&self) -> Vec<Arc<RoomHandle>> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Drop a closed room from the map, unless the id was reused meanwhile
    fn remove(&self, handle: &Arc<RoomHandle>) {
        let removed = self
            .rooms
            .remove_if(&handle.id, |_, current| Arc::ptr_eq(current, handle))
            .is_some();
        if removed {
            info!(room_id = %handle.id, "Room removed");
            self.announce(ServerMsg::RoomDissolved { room_id: handle.id });
        }
    }

    pub fn join(&self, id: RoomId, participant: ParticipantId, name: String) -> Result<Joined, RoomError> {
        let handle = self.get(id)?;

        let (joined, players) = {
            let mut room = handle.lock();
            if room.closed {
                return Err(RoomError::NotFound);
            }

            let seat = room.join(participant, name)?;
            let events = handle.subscribe();
            let init = ServerMsg::Init {
                room_id: room.id,
                game_state: room.sim.clone(),
                phase: room.phase.name(),
                running: room.phase.is_running(),
                winner: room.phase.winner(),
                you: seat,
                players: room.seats,
                mode: room.mode,
                win_points: room.win_points,
                room_creator: room.creator,
                is_creator: room.is_creator(participant),
            };
            handle.broadcast(ServerMsg::PlayersUpdate {
                room_id: room.id,
                players: room.seats,
                members: room.member_list(),
                room_creator: room.creator,
            });
            (Joined { seat, init, events }, room.members.len())
        };

        info!(room_id = %id, user_id = %participant, seat = ?joined.seat, "Player joined room");
        self.announce(ServerMsg::RoomUpdated { room_id: id, players });
        Ok(joined)
    }

    /// Remove a participant. Leaving a room one is not in is a no-op.
    /// The last member out removes the room.
    pub fn leave(&self, id: RoomId, participant: ParticipantId) -> Result<(), RoomError> {
        let handle = self.get(id)?;

        let (departure, players) = {
            let mut room = handle.lock();
            let Some(departure) = room.leave(participant) else {
                return Ok(());
            };

            if departure.halted {
                handle.broadcast(ServerMsg::GameHalted {
                    reason: "Player left".to_string(),
                });
            }
            handle.broadcast(ServerMsg::UserLeft {
                user_id: participant,
                players: room.seats,
                members: room.member_list(),
            });
            if departure.emptied {
                room.closed = true;
                handle.broadcast(ServerMsg::RoomDissolved { room_id: id });
            }
            (departure, room.members.len())
        };

        info!(
            room_id = %id,
            user_id = %participant,
            halted = departure.halted,
            "Player left room"
        );

        if departure.emptied {
            self.remove(&handle);
        } else {
            self.announce(ServerMsg::RoomUpdated { room_id: id, players });
        }
        Ok(())
    }

    /// Creator-only teardown of a room and any match in it
    pub fn dissolve(&self, id: RoomId, by: ParticipantId) -> Result<(), RoomError> {
        let handle = self.get(id)?;
        {
            let mut room = handle.lock();
            if !room.is_creator(by) {
                return Err(RoomError::unauthorized("Only room creator can dissolve room"));
            }
            room.halt();
            room.closed = true;
            handle.broadcast(ServerMsg::RoomDissolved { room_id: id });
        }
        info!(room_id = %id, user_id = %by, "Room dissolved");
        self.remove(&handle);
        Ok(())
    }

    /// Move the participant's own paddle
    pub fn paddle_move(&self, id: RoomId, participant: ParticipantId, input: PaddleInput) -> Result<(), RoomError> {
        let handle = self.get(id)?;
        let mut room = handle.lock();

        let Some(side) = room.seats.side_of(participant) else {
            return Err(RoomError::unauthorized("You do not control a paddle"));
        };
        if !room.phase.is_running() && room.mode != GameMode::Bot {
            return Ok(());
        }

        let paddle = room.sim.paddles.get_mut(side);
        PhysicsEngine::apply_input(paddle, input);
        let y = paddle.y;
        handle.broadcast(ServerMsg::PaddleUpdate { paddle: side, y });
        Ok(())
    }

    /// Start a match and its simulation loop
    pub fn start_game(&self, id: RoomId, by: ParticipantId) -> Result<(), RoomError> {
        let handle = self.get(id)?;
        let epoch = {
            let mut room = handle.lock();
            if room.closed {
                return Err(RoomError::NotFound);
            }
            let epoch = room.start(by)?;
            handle.broadcast(ServerMsg::GameStarted {
                game_state: room.sim.clone(),
            });
            epoch
        };

        simulation::spawn(handle, epoch, self.bot.clone());
        Ok(())
    }

    pub fn rematch_request(&self, id: RoomId, by: ParticipantId) -> Result<(), RoomError> {
        let handle = self.get(id)?;
        let mut room = handle.lock();
        let outcome = room.request_rematch(by)?;
        debug!(room_id = %id, outcome = ?outcome, "Rematch requested");
        publish_rematch(&handle, &room, by, outcome);
        Ok(())
    }

    pub fn rematch_response(&self, id: RoomId, by: ParticipantId, accept: bool) -> Result<(), RoomError> {
        let handle = self.get(id)?;
        let mut room = handle.lock();
        let outcome = room.respond_rematch(by, accept)?;
        publish_rematch(&handle, &room, by, outcome);
        Ok(())
    }

    /// Remove rooms that have had no members for longer than `grace`
    pub fn reap_idle(&self, grace: Duration) -> usize {
        let mut reaped = 0;
        for handle in self.handles() {
            {
                let mut room = handle.lock();
                let expired = room.members.is_empty()
                    && room.empty_since.is_some_and(|since| since.elapsed() >= grace);
                if !expired || room.closed {
                    continue;
                }
                room.halt();
                room.closed = true;
                handle.broadcast(ServerMsg::RoomDissolved { room_id: handle.id });
            }
            warn!(room_id = %handle.id, "Reaping empty room");
            self.remove(&handle);
            reaped += 1;
        }
        reaped
    }

    pub fn summary(&self, id: RoomId) -> Result<RoomSummary, RoomError> {
        let handle = self.get(id)?;
        let room = handle.lock();
        Ok(summarize(&room))
    }

    pub fn summaries(&self) -> Vec<RoomSummary> {
        self.handles()
            .iter()
            .map(|handle| summarize(&handle.lock()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn running_count(&self) -> usize {
        self.handles()
            .iter()
            .filter(|handle| handle.lock().phase.is_running())
            .count()
    }

    pub fn member_count(&self) -> usize {
        self.handles()
            .iter()
            .map(|handle| handle.lock().members.len())
            .sum()
    }
}

fn publish_rematch(handle: &RoomHandle, room: &Room, by: ParticipantId, outcome: RematchOutcome) {
    let msg = match outcome {
        RematchOutcome::Reset => {
            info!(room_id = %room.id, "Rematch agreed, state reset");
            ServerMsg::Reset {
                game_state: room.sim.clone(),
            }
        }
        RematchOutcome::Requested { creator_vote } => ServerMsg::RematchRequested {
            requested_by: by,
            creator_vote,
        },
        RematchOutcome::Status { votes, responders } => ServerMsg::RematchStatus { votes, responders },
        RematchOutcome::Declined => ServerMsg::RematchDeclined { declined_by: by },
    };
    handle.broadcast(msg);
}

fn summarize(room: &Room) -> RoomSummary {
    RoomSummary {
        room_id: room.id,
        mode: room.mode,
        win_points: room.win_points,
        players: room.members.len(),
        seats: room.seats,
        phase: room.phase.name(),
        room_creator: room.creator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::Direction;
    use crate::game::r#match::MatchPhase;
    use crate::game::room::Seat;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(BotController::default())
    }

    fn pvp_with_two(registry: &RoomRegistry) -> (RoomId, ParticipantId, ParticipantId) {
        let id = Uuid::new_v4();
        let creator = Uuid::new_v4();
        let guest = Uuid::new_v4();
        registry.create(id, GameMode::Pvp, 5, creator).unwrap();
        registry.join(id, creator, "creator".into()).unwrap();
        registry.join(id, guest, "guest".into()).unwrap();
        (id, creator, guest)
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let registry = registry();
        let id = Uuid::new_v4();
        assert_ok!(registry.create(id, GameMode::Pvp, 5, Uuid::new_v4()));
        assert_eq!(
            registry.create(id, GameMode::Bot, 5, Uuid::new_v4()).unwrap_err(),
            RoomError::AlreadyExists
        );
        assert_err!(registry.create(Uuid::new_v4(), GameMode::Pvp, 0, Uuid::new_v4()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn create_announces_in_lobby() {
        let registry = registry();
        let mut lobby = registry.subscribe_lobby();
        let id = Uuid::new_v4();
        registry.create(id, GameMode::Bot, 3, Uuid::new_v4()).unwrap();

        match lobby.try_recv().unwrap() {
            ServerMsg::RoomCreated { room } => {
                assert_eq!(room.room_id, id);
                assert_eq!(room.players, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn join_unknown_room_is_not_found() {
        let registry = registry();
        let err = registry.join(Uuid::new_v4(), Uuid::new_v4(), "x".into()).err();
        assert_eq!(err, Some(RoomError::NotFound));
    }

    #[test]
    fn join_sends_init_and_players_update() {
        let registry = registry();
        let (id, creator, guest) = pvp_with_two(&registry);
        let mut watcher = registry.join(id, creator, "creator".into()).unwrap().events;

        let joined = registry.join(id, guest, "guest".into()).unwrap();
        assert_eq!(joined.seat, Some(Side::Right));
        match joined.init {
            ServerMsg::Init { you, is_creator, running, .. } => {
                assert_eq!(you, Some(Side::Right));
                assert!(!is_creator);
                assert!(!running);
            }
            other => panic!("unexpected {:?}", other),
        }

        match watcher.try_recv().unwrap() {
            ServerMsg::PlayersUpdate { players, members, .. } => {
                assert_eq!(players.left, Seat::Human(creator));
                assert_eq!(members.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn third_join_is_full() {
        let registry = registry();
        let (id, _, _) = pvp_with_two(&registry);
        let err = registry.join(id, Uuid::new_v4(), "late".into()).err();
        assert_eq!(err, Some(RoomError::Full { max: 2 }));
    }

    #[test]
    fn last_leave_removes_room() {
        let registry = registry();
        let (id, creator, guest) = pvp_with_two(&registry);
        let mut lobby = registry.subscribe_lobby();

        registry.leave(id, guest).unwrap();
        assert_eq!(registry.summary(id).unwrap().players, 1);
        registry.leave(id, creator).unwrap();

        assert_eq!(registry.get(id).err(), Some(RoomError::NotFound));
        let mut saw_dissolved = false;
        while let Ok(msg) = lobby.try_recv() {
            if matches!(msg, ServerMsg::RoomDissolved { room_id } if room_id == id) {
                saw_dissolved = true;
            }
        }
        assert!(saw_dissolved);
    }

    #[test]
    fn only_creator_dissolves() {
        let registry = registry();
        let (id, creator, guest) = pvp_with_two(&registry);
        assert!(matches!(registry.dissolve(id, guest), Err(RoomError::Unauthorized(_))));
        assert_ok!(registry.dissolve(id, creator));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn paddle_moves_ignored_while_pvp_idle() {
        let registry = registry();
        let (id, creator, _) = pvp_with_two(&registry);
        registry
            .paddle_move(id, creator, PaddleInput::Step(Direction::Down))
            .unwrap();
        let handle = registry.get(id).unwrap();
        assert_eq!(handle.lock().sim.paddles.left.y, 250.0);

        assert!(matches!(
            registry.paddle_move(id, Uuid::new_v4(), PaddleInput::Pointer(10.0)),
            Err(RoomError::Unauthorized(_))
        ));
    }

    #[test]
    fn bot_human_positions_before_start() {
        let registry = registry();
        let id = Uuid::new_v4();
        let human = Uuid::new_v4();
        registry.create(id, GameMode::Bot, 3, human).unwrap();
        let mut events = registry.join(id, human, "h".into()).unwrap().events;

        registry.paddle_move(id, human, PaddleInput::Pointer(1000.0)).unwrap();
        let handle = registry.get(id).unwrap();
        assert_eq!(handle.lock().sim.paddles.right.y, 520.0);

        let mut echoed = false;
        while let Ok(msg) = events.try_recv() {
            if let ServerMsg::PaddleUpdate { paddle, y } = msg {
                assert_eq!(paddle, Side::Right);
                assert_eq!(y, 520.0);
                echoed = true;
            }
        }
        assert!(echoed);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_running_halts_and_removes() {
        let registry = registry();
        let id = Uuid::new_v4();
        let human = Uuid::new_v4();
        registry.create(id, GameMode::Bot, 3, human).unwrap();
        registry.join(id, human, "h".into()).unwrap();
        registry.start_game(id, human).unwrap();

        let handle = registry.get(id).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.lock().phase.is_running());

        registry.leave(id, human).unwrap();
        {
            let room = handle.lock();
            assert_eq!(room.phase, MatchPhase::Idle);
            assert_eq!(room.phase.winner(), None);
            assert!(room.closed);
        }
        assert_eq!(registry.get(id).err(), Some(RoomError::NotFound));
        assert_eq!(registry.running_count(), 0);
    }

    #[test]
    fn rematch_vote_flow_broadcasts() {
        let registry = registry();
        let (id, creator, guest) = pvp_with_two(&registry);
        let handle = registry.get(id).unwrap();
        let mut events = handle.subscribe();
        {
            let mut room = handle.lock();
            room.phase = MatchPhase::GameOver { winner: Side::Right };
            room.sim.score.right = 5;
        }

        registry.rematch_request(id, creator).unwrap();
        registry.rematch_response(id, guest, true).unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|msg| serde_json::to_value(msg).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["rematch_requested", "reset"]);
        assert_eq!(handle.lock().phase, MatchPhase::Idle);
    }

    fn drain_kinds(events: &mut broadcast::Receiver<ServerMsg>) -> Vec<String> {
        std::iter::from_fn(|| events.try_recv().ok())
            .map(|msg| serde_json::to_value(msg).unwrap()["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn leaving_after_game_over_does_not_halt() {
        let registry = registry();
        let (id, _, guest) = pvp_with_two(&registry);
        let handle = registry.get(id).unwrap();
        handle.lock().phase = MatchPhase::GameOver { winner: Side::Left };
        let mut events = handle.subscribe();

        assert_ok!(registry.leave(id, guest));

        assert_eq!(drain_kinds(&mut events), vec!["user_left"]);
        assert_eq!(handle.lock().phase, MatchPhase::GameOver { winner: Side::Left });
        assert_eq!(registry.summary(id).unwrap().phase, "game_over");
    }

    #[test]
    fn leaving_mid_vote_withdraws_seat_vote() {
        let registry = registry();
        let (id, creator, guest) = pvp_with_two(&registry);
        let handle = registry.get(id).unwrap();
        handle.lock().phase = MatchPhase::GameOver { winner: Side::Right };
        registry.rematch_request(id, creator).unwrap();

        assert_ok!(registry.leave(id, creator));
        let newcomer = Uuid::new_v4();
        registry.join(id, newcomer, "newcomer".into()).unwrap();
        let mut events = handle.subscribe();

        registry.rematch_response(id, guest, true).unwrap();
        assert_eq!(drain_kinds(&mut events), vec!["rematch_status"]);
        assert!(matches!(handle.lock().phase, MatchPhase::RematchPending { .. }));

        registry.rematch_response(id, newcomer, true).unwrap();
        assert_eq!(drain_kinds(&mut events), vec!["reset"]);
        assert_eq!(handle.lock().phase, MatchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_removes_never_joined_rooms() {
        let registry = registry();
        let idle = Uuid::new_v4();
        registry.create(idle, GameMode::Pvp, 5, Uuid::new_v4()).unwrap();
        let (busy, _, _) = pvp_with_two(&registry);

        assert_eq!(registry.reap_idle(Duration::from_secs(30)), 0);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(registry.reap_idle(Duration::from_secs(30)), 1);

        assert_eq!(registry.get(idle).err(), Some(RoomError::NotFound));
        assert_ok!(registry.get(busy));
    }
}
