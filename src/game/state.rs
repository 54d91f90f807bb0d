//! Simulation state owned by a room

use serde::{Deserialize, Serialize};

use super::bot::BotState;
use super::physics::{BALL_START_DX, BALL_START_DY, FIELD_HEIGHT, FIELD_WIDTH, PADDLE_START_Y};

/// One of the two paddle seats
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ball position and per-tick velocity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
}

impl Ball {
    pub fn speed(&self) -> f32 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.dx.is_finite() && self.dy.is_finite()
    }
}

/// A paddle; `y` is the top edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paddle {
    pub y: f32,
    /// AI memory, only present on a computer-controlled paddle
    #[serde(skip)]
    pub bot: Option<BotState>,
}

impl Paddle {
    fn at_start() -> Self {
        Self {
            y: PADDLE_START_Y,
            bot: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paddles {
    pub left: Paddle,
    pub right: Paddle,
}

impl Paddles {
    pub fn get_mut(&mut self, side: Side) -> &mut Paddle {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub left: u32,
    pub right: u32,
}

impl Score {
    pub fn award(&mut self, side: Side) {
        match side {
            Side::Left => self.left += 1,
            Side::Right => self.right += 1,
        }
    }

    /// Side that has reached `win_points`, left checked first
    pub fn leader_at(&self, win_points: u32) -> Option<Side> {
        if self.left >= win_points {
            Some(Side::Left)
        } else if self.right >= win_points {
            Some(Side::Right)
        } else {
            None
        }
    }
}

/// Ball, paddles and score of one match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub ball: Ball,
    pub paddles: Paddles,
    pub score: Score,
}

impl SimulationState {
    /// The state every match starts from (start, rematch and bot rematch alike)
    pub fn fresh() -> Self {
        Self {
            ball: Ball {
                x: FIELD_WIDTH / 2.0,
                y: FIELD_HEIGHT / 2.0,
                dx: BALL_START_DX,
                dy: BALL_START_DY,
            },
            paddles: Paddles {
                left: Paddle::at_start(),
                right: Paddle::at_start(),
            },
            score: Score::default(),
        }
    }
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::fresh()
    }
}
