//! Ball and paddle physics for one fixed step

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::state::{Ball, Paddle, Side, SimulationState};

/// Playfield dimensions (logical units)
pub const FIELD_WIDTH: f32 = 800.0;
pub const FIELD_HEIGHT: f32 = 600.0;

pub const BALL_RADIUS: f32 = 8.0;

pub const PADDLE_WIDTH: f32 = 10.0;
pub const PADDLE_HEIGHT: f32 = 80.0;
pub const LEFT_PADDLE_X: f32 = 10.0;
pub const RIGHT_PADDLE_X: f32 = FIELD_WIDTH - 20.0;
pub const PADDLE_START_Y: f32 = 250.0;
/// Keyboard step per `paddle_move`
pub const PADDLE_STEP: f32 = 25.0;

pub const BALL_START_DX: f32 = 4.0;
pub const BALL_START_DY: f32 = 2.0;

/// Speed multiplier applied on every paddle hit
pub const SPEED_UP: f32 = 1.02;
pub const MAX_BALL_SPEED: f32 = 12.0;
/// Floor on horizontal speed after a bounce or serve
pub const MIN_BALL_DX: f32 = 2.0;
/// Largest bounce angle off a paddle (30 degrees)
pub const MAX_BOUNCE_ANGLE: f32 = std::f32::consts::PI / 6.0;
/// Hits closer than this to a paddle tip are treated as this far out
pub const MAX_INTERSECT: f32 = 0.8;

const SERVE_DX: [f32; 2] = [-4.0, 4.0];
const SERVE_DY: [f32; 4] = [-2.0, -1.0, 1.0, 2.0];

/// Highest valid paddle top
pub fn paddle_max_y() -> f32 {
    FIELD_HEIGHT - PADDLE_HEIGHT
}

/// Keyboard direction for stepped paddle movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// A paddle command after it has been decoded from the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaddleInput {
    /// Pointer position; the paddle centers on it
    Pointer(f32),
    Step(Direction),
}

/// Stateless physics routines operating on a `SimulationState`
pub struct PhysicsEngine;

impl PhysicsEngine {
    /// Advance the ball one tick. Returns the side that scored, if any,
    /// after its counter has been incremented.
    pub fn step(state: &mut SimulationState) -> Option<Side> {
        let ball = &mut state.ball;
        ball.x += ball.dx;
        ball.y += ball.dy;

        if ball.y <= BALL_RADIUS {
            ball.y = BALL_RADIUS;
            ball.dy = ball.dy.abs();
        } else if ball.y >= FIELD_HEIGHT - BALL_RADIUS {
            ball.y = FIELD_HEIGHT - BALL_RADIUS;
            ball.dy = -ball.dy.abs();
        }

        if Self::overlaps_paddle(ball, LEFT_PADDLE_X, state.paddles.left.y) {
            Self::bounce(ball, state.paddles.left.y, Side::Left);
        }
        if Self::overlaps_paddle(ball, RIGHT_PADDLE_X, state.paddles.right.y) {
            Self::bounce(ball, state.paddles.right.y, Side::Right);
        }

        let scored = if ball.x < -BALL_RADIUS * 2.0 {
            Some(Side::Right)
        } else if ball.x > FIELD_WIDTH + BALL_RADIUS * 2.0 {
            Some(Side::Left)
        } else {
            None
        };

        if let Some(side) = scored {
            state.score.award(side);
        }
        scored
    }

    /// Bounding box of the ball against the paddle rectangle
    pub fn overlaps_paddle(ball: &Ball, paddle_x: f32, paddle_y: f32) -> bool {
        ball.x - BALL_RADIUS <= paddle_x + PADDLE_WIDTH
            && ball.x + BALL_RADIUS >= paddle_x
            && ball.y + BALL_RADIUS >= paddle_y
            && ball.y - BALL_RADIUS <= paddle_y + PADDLE_HEIGHT
    }

    /// Reflect the ball off the paddle on `side`
    pub fn bounce(ball: &mut Ball, paddle_y: f32, side: Side) {
        ball.x = match side {
            Side::Left => LEFT_PADDLE_X + PADDLE_WIDTH + BALL_RADIUS,
            Side::Right => RIGHT_PADDLE_X - BALL_RADIUS,
        };

        let half = PADDLE_HEIGHT / 2.0;
        let offset = ((paddle_y + half - ball.y) / half).clamp(-MAX_INTERSECT, MAX_INTERSECT);
        let angle = offset * MAX_BOUNCE_ANGLE;
        let speed = (ball.speed() * SPEED_UP).min(MAX_BALL_SPEED);

        let away = match side {
            Side::Left => 1.0,
            Side::Right => -1.0,
        };
        ball.dx = away * (speed * angle.cos()).abs().max(MIN_BALL_DX);
        ball.dy = -speed * angle.sin();
    }

    /// Put the ball back in the center and serve it toward the side that
    /// was just scored against.
    pub fn serve<R: Rng + ?Sized>(ball: &mut Ball, scorer: Side, rng: &mut R) {
        ball.x = FIELD_WIDTH / 2.0;
        ball.y = FIELD_HEIGHT / 2.0;

        let dx = SERVE_DX.choose(rng).copied().unwrap_or(BALL_START_DX);
        let dy = SERVE_DY.choose(rng).copied().unwrap_or(BALL_START_DY);

        let toward = match scorer.opposite() {
            Side::Left => -1.0,
            Side::Right => 1.0,
        };
        ball.dx = toward * dx.abs().max(MIN_BALL_DX);
        ball.dy = dy;
    }

    /// Apply a human paddle command, keeping the paddle on the field
    pub fn apply_input(paddle: &mut Paddle, input: PaddleInput) {
        let target = match input {
            PaddleInput::Pointer(y) if y.is_finite() => y - PADDLE_HEIGHT / 2.0,
            PaddleInput::Pointer(_) => paddle.y,
            PaddleInput::Step(Direction::Up) => paddle.y - PADDLE_STEP,
            PaddleInput::Step(Direction::Down) => paddle.y + PADDLE_STEP,
        };
        paddle.y = Self::clamp_paddle(target);
    }

    pub fn clamp_paddle(y: f32) -> f32 {
        y.clamp(0.0, paddle_max_y())
    }
}
