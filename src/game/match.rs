//! Match lifecycle: start, scoring to a win, rematch negotiation

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::bot::BotController;
use super::error::RoomError;
use super::physics::PhysicsEngine;
use super::room::{GameMode, ParticipantId, Room};
use super::state::{Side, SimulationState};

/// Match phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPhase {
    /// No simulation; ready to start
    Idle,
    /// Simulation loop advancing physics
    Running,
    /// A side reached the win threshold
    GameOver { winner: Side },
    /// Creator asked for a rematch, waiting on the other seat (PvP only)
    RematchPending {
        winner: Side,
        votes: BTreeSet<Side>,
        responders: BTreeSet<ParticipantId>,
    },
}

impl MatchPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, MatchPhase::Running)
    }

    pub fn winner(&self) -> Option<Side> {
        match self {
            MatchPhase::GameOver { winner } | MatchPhase::RematchPending { winner, .. } => {
                Some(*winner)
            }
            MatchPhase::Idle | MatchPhase::Running => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MatchPhase::Idle => "idle",
            MatchPhase::Running => "running",
            MatchPhase::GameOver { .. } => "game_over",
            MatchPhase::RematchPending { .. } => "rematch_pending",
        }
    }
}

/// What one physics tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Scored(Side),
    /// The point that reached the threshold; the phase is already `GameOver`
    Won(Side),
}

/// Result of a rematch request or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RematchOutcome {
    /// State was reset and the room is ready to start again
    Reset,
    /// Vote opened; the creator's own seat already voted
    Requested { creator_vote: Option<Side> },
    /// Vote still open
    Status {
        votes: Vec<Side>,
        responders: Vec<ParticipantId>,
    },
    Declined,
}

impl Room {
    fn may_start(&self, by: ParticipantId) -> bool {
        self.is_creator(by) || (self.mode == GameMode::Bot && self.seats.side_of(by) == Some(Side::Right))
    }

    /// Begin a match. Returns the epoch the new simulation loop must carry.
    pub fn start(&mut self, by: ParticipantId) -> Result<u64, RoomError> {
        if !self.may_start(by) {
            return Err(RoomError::unauthorized("Only room creator can start game"));
        }

        match self.mode {
            GameMode::Bot if !self.seats.right.is_filled() => {
                return Err(RoomError::invalid_state(
                    "Assign right paddle before starting bot game",
                ));
            }
            GameMode::Pvp if self.members.len() < 2 => {
                return Err(RoomError::invalid_state(format!(
                    "Need 2 players to start (currently {})",
                    self.members.len()
                )));
            }
            _ => {}
        }

        if !self.seats.both_filled() {
            return Err(RoomError::invalid_state("Both paddle positions must be filled"));
        }

        match self.phase {
            MatchPhase::Running => return Err(RoomError::invalid_state("Game already running")),
            MatchPhase::RematchPending { .. } => {
                return Err(RoomError::invalid_state("Rematch vote in progress"))
            }
            MatchPhase::Idle | MatchPhase::GameOver { .. } => {}
        }

        self.sim = SimulationState::fresh();
        self.phase = MatchPhase::Running;
        self.epoch += 1;
        info!(room_id = %self.id, epoch = self.epoch, "Match started");
        Ok(self.epoch)
    }

    /// Stop a running match without declaring a winner.
    /// Returns whether anything was running.
    pub fn halt(&mut self) -> bool {
        if !self.phase.is_running() {
            return false;
        }
        self.phase = MatchPhase::Idle;
        self.epoch += 1;
        info!(room_id = %self.id, "Match halted");
        true
    }

    /// Advance the match one fixed tick
    pub fn step(&mut self, bot: &BotController) -> Result<StepOutcome, RoomError> {
        if !self.phase.is_running() {
            return Err(RoomError::invalid_state("Game is not running"));
        }

        if let Some(side) = PhysicsEngine::step(&mut self.sim) {
            debug!(room_id = %self.id, side = %side, "Point scored");
            if let Some(winner) = self.sim.score.leader_at(self.win_points) {
                self.phase = MatchPhase::GameOver { winner };
                info!(
                    room_id = %self.id,
                    winner = %winner,
                    left = self.sim.score.left,
                    right = self.sim.score.right,
                    "Match won"
                );
                return Ok(StepOutcome::Won(winner));
            }
            return Ok(StepOutcome::Scored(side));
        }

        if self.mode == GameMode::Bot {
            bot.update(&mut self.sim, &mut self.rng);
        }

        if !self.sim.ball.is_finite() {
            return Err(RoomError::TransientFault(format!(
                "ball state is not finite: {:?}",
                self.sim.ball
            )));
        }
        Ok(StepOutcome::Continue)
    }

    /// Serve after the post-point pause
    pub fn serve_after_point(&mut self, scorer: Side) {
        PhysicsEngine::serve(&mut self.sim.ball, scorer, &mut self.rng);
    }

    fn reset_for_rematch(&mut self) {
        self.sim = SimulationState::fresh();
        self.phase = MatchPhase::Idle;
    }

    /// Take back whatever a departing seat holder contributed to an open vote
    pub(crate) fn withdraw_vote(&mut self, participant: ParticipantId, seat: Option<Side>) {
        if let MatchPhase::RematchPending {
            votes, responders, ..
        } = &mut self.phase
        {
            if let Some(side) = seat {
                votes.remove(&side);
            }
            responders.remove(&participant);
        }
    }

    pub fn request_rematch(&mut self, by: ParticipantId) -> Result<RematchOutcome, RoomError> {
        if !self.is_creator(by) {
            return Err(RoomError::unauthorized("Only room creator can request rematch"));
        }

        let Some(winner) = self.phase.winner() else {
            return Err(RoomError::invalid_state("Game still in progress"));
        };

        if self.mode == GameMode::Bot {
            self.reset_for_rematch();
            return Ok(RematchOutcome::Reset);
        }

        let creator_vote = self.seats.side_of(by);
        self.phase = MatchPhase::RematchPending {
            winner,
            votes: creator_vote.into_iter().collect(),
            responders: BTreeSet::new(),
        };
        Ok(RematchOutcome::Requested { creator_vote })
    }

    pub fn respond_rematch(&mut self, by: ParticipantId, accept: bool) -> Result<RematchOutcome, RoomError> {
        let seat = self.seats.side_of(by);
        let is_creator = self.is_creator(by);

        let MatchPhase::RematchPending {
            winner,
            votes,
            responders,
        } = &mut self.phase
        else {
            return Err(RoomError::invalid_state("No rematch request"));
        };

        if is_creator {
            return Err(RoomError::unauthorized("You are the room creator"));
        }
        let Some(seat) = seat else {
            return Err(RoomError::unauthorized("You do not hold a paddle"));
        };

        let winner = *winner;
        if !accept {
            self.phase = MatchPhase::GameOver { winner };
            return Ok(RematchOutcome::Declined);
        }

        votes.insert(seat);
        responders.insert(by);

        if votes.len() >= 2 {
            self.reset_for_rematch();
            return Ok(RematchOutcome::Reset);
        }

        Ok(RematchOutcome::Status {
            votes: votes.iter().copied().collect(),
            responders: responders.iter().copied().collect(),
        })
    }
}
