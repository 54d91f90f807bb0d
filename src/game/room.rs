//! Room membership and paddle seats

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize, Serializer};
use tokio::time::Instant;
use uuid::Uuid;

use super::error::RoomError;
use super::r#match::MatchPhase;
use super::state::{Side, SimulationState};

pub type RoomId = Uuid;
pub type ParticipantId = Uuid;

/// Who the room is played against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Pvp,
    Bot,
}

impl GameMode {
    /// Most humans the room admits
    pub fn capacity(self) -> usize {
        match self {
            GameMode::Pvp => 2,
            GameMode::Bot => 1,
        }
    }
}

/// Occupant of a paddle seat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seat {
    Empty,
    Computer,
    Human(ParticipantId),
}

impl Seat {
    pub fn is_filled(&self) -> bool {
        !matches!(self, Seat::Empty)
    }
}

// Wire form: null, "computer" or the occupant's id.
impl Serialize for Seat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Seat::Empty => serializer.serialize_none(),
            Seat::Computer => serializer.serialize_str("computer"),
            Seat::Human(id) => id.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Seats {
    pub left: Seat,
    pub right: Seat,
}

impl Seats {
    fn for_mode(mode: GameMode) -> Self {
        let left = match mode {
            GameMode::Pvp => Seat::Empty,
            GameMode::Bot => Seat::Computer,
        };
        Self {
            left,
            right: Seat::Empty,
        }
    }

    pub fn get(&self, side: Side) -> Seat {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    fn set(&mut self, side: Side, seat: Seat) {
        match side {
            Side::Left => self.left = seat,
            Side::Right => self.right = seat,
        }
    }

    /// Seat held by a human participant
    pub fn side_of(&self, participant: ParticipantId) -> Option<Side> {
        [Side::Left, Side::Right]
            .into_iter()
            .find(|side| self.get(*side) == Seat::Human(participant))
    }

    pub fn both_filled(&self) -> bool {
        self.left.is_filled() && self.right.is_filled()
    }
}

/// Member entry exposed on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberInfo {
    pub user_id: ParticipantId,
    pub name: String,
}

/// Result of removing a member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    /// Seat the member was holding
    pub seat: Option<Side>,
    /// A running match was stopped
    pub halted: bool,
    /// No members remain
    pub emptied: bool,
}

/// Live state of one room (guarded by the room's lock)
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub mode: GameMode,
    pub win_points: u32,
    pub creator: ParticipantId,
    pub members: BTreeMap<ParticipantId, String>,
    pub seats: Seats,
    pub phase: MatchPhase,
    pub sim: SimulationState,
    pub rng: ChaCha8Rng,
    /// Bumped whenever a simulation loop is started or cancelled
    pub epoch: u64,
    /// Set once the room has been removed from the registry
    pub closed: bool,
    pub empty_since: Option<Instant>,
}

impl Room {
    pub fn new(id: RoomId, mode: GameMode, win_points: u32, creator: ParticipantId, seed: u64) -> Self {
        Self {
            id,
            mode,
            win_points,
            creator,
            members: BTreeMap::new(),
            seats: Seats::for_mode(mode),
            phase: MatchPhase::Idle,
            sim: SimulationState::fresh(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            epoch: 0,
            closed: false,
            empty_since: Some(Instant::now()),
        }
    }

    pub fn is_creator(&self, participant: ParticipantId) -> bool {
        self.creator == participant
    }

    pub fn is_member(&self, participant: ParticipantId) -> bool {
        self.members.contains_key(&participant)
    }

    /// Add a member and seat them. Re-joining returns the existing seat.
    pub fn join(&mut self, participant: ParticipantId, name: String) -> Result<Option<Side>, RoomError> {
        if self.is_member(participant) {
            return Ok(self.seats.side_of(participant));
        }

        let max = self.mode.capacity();
        if self.members.len() >= max {
            return Err(RoomError::Full { max });
        }

        self.members.insert(participant, name);
        self.empty_since = None;

        let candidates: &[Side] = match self.mode {
            GameMode::Bot => &[Side::Right],
            GameMode::Pvp => &[Side::Left, Side::Right],
        };
        let open = candidates
            .iter()
            .copied()
            .find(|side| !self.seats.get(*side).is_filled());
        if let Some(side) = open {
            self.seats.set(side, Seat::Human(participant));
        }
        Ok(open)
    }

    /// Remove a member, free their seat and stop a running match.
    /// Returns `None` if they were not a member.
    pub fn leave(&mut self, participant: ParticipantId) -> Option<Departure> {
        self.members.remove(&participant)?;

        let seat = self.seats.side_of(participant);
        if let Some(side) = seat {
            self.seats.set(side, Seat::Empty);
        }
        self.withdraw_vote(participant, seat);

        let halted = self.halt();
        let emptied = self.members.is_empty();
        if emptied {
            self.empty_since = Some(Instant::now());
        }

        Some(Departure {
            seat,
            halted,
            emptied,
        })
    }

    pub fn member_list(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|(id, name)| MemberInfo {
                user_id: *id,
                name: name.clone(),
            })
            .collect()
    }

    /// Still driven by the simulation loop started at `epoch`
    pub fn is_live(&self, epoch: u64) -> bool {
        !self.closed && self.epoch == epoch && self.phase.is_running()
    }
}
