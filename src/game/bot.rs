//! Computer opponent for the left paddle in bot rooms

use rand::Rng;

use super::physics::{paddle_max_y, LEFT_PADDLE_X, PADDLE_HEIGHT, PADDLE_WIDTH};
use super::state::{Paddle, SimulationState};

/// Tuning for the computer paddle
#[derive(Debug, Clone, Copy)]
pub struct BotTuning {
    /// Uniform noise added to every prediction
    pub jitter: f32,
    /// Chance per tick of a larger aiming mistake
    pub mistake_chance: f64,
    pub mistake_range: f32,
    /// Ticks the bot keeps its old target after the ball turns toward it
    pub reaction_ticks: (u32, u32),
    /// Proportional gain from distance to target velocity
    pub gain: f32,
    pub max_velocity: f32,
    /// Largest velocity change per tick
    pub acceleration: f32,
}

impl Default for BotTuning {
    fn default() -> Self {
        Self {
            jitter: 20.0,
            mistake_chance: 0.02,
            mistake_range: 40.0,
            reaction_ticks: (3, 8),
            gain: 0.08,
            max_velocity: 1.5,
            acceleration: 0.15,
        }
    }
}

/// Memory kept between ticks by the computer paddle
#[derive(Debug, Clone, PartialEq)]
pub struct BotState {
    pub target_y: f32,
    pub velocity: f32,
    pub reaction_delay: u32,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            target_y: paddle_max_y() / 2.0,
            velocity: 0.0,
            reaction_delay: 0,
        }
    }
}

/// Drives the computer paddle from the current ball state
pub struct BotController {
    tuning: BotTuning,
}

impl BotController {
    pub fn new(tuning: BotTuning) -> Self {
        Self { tuning }
    }

    /// Move the left paddle one tick
    pub fn update<R: Rng + ?Sized>(&self, state: &mut SimulationState, rng: &mut R) {
        let ball = state.ball;
        let paddle = &mut state.paddles.left;
        let tuning = &self.tuning;
        let memory = paddle.bot.get_or_insert_with(BotState::default);

        if ball.dx < 0.0 {
            let time_to_paddle =
                (ball.x - LEFT_PADDLE_X - PADDLE_WIDTH) / ball.dx.abs().max(f32::EPSILON);
            let noise = rng.gen_range(-tuning.jitter..=tuning.jitter);
            let predicted_y = ball.y + ball.dy * time_to_paddle + noise;
            let mut target = predicted_y - PADDLE_HEIGHT / 2.0;

            memory.reaction_delay = memory.reaction_delay.saturating_sub(1);
            if memory.reaction_delay > 0 {
                target = memory.target_y;
            }

            if rng.gen_bool(tuning.mistake_chance) {
                target += rng.gen_range(-tuning.mistake_range..=tuning.mistake_range);
            }
            memory.target_y = target;
        } else {
            memory.target_y = paddle_max_y() / 2.0;
            let (min, max) = tuning.reaction_ticks;
            memory.reaction_delay = rng.gen_range(min..=max);
        }

        memory.target_y = memory.target_y.clamp(0.0, paddle_max_y());
        Self::steer(paddle, tuning);
    }

    fn steer(paddle: &mut Paddle, tuning: &BotTuning) {
        let Some(memory) = paddle.bot.as_mut() else {
            return;
        };

        let wanted = ((memory.target_y - paddle.y) * tuning.gain)
            .clamp(-tuning.max_velocity, tuning.max_velocity);
        memory.velocity = if wanted > memory.velocity {
            wanted.min(memory.velocity + tuning.acceleration)
        } else {
            wanted.max(memory.velocity - tuning.acceleration)
        };

        let y = (paddle.y + memory.velocity).clamp(0.0, paddle_max_y());
        if y <= 0.0 || y >= paddle_max_y() {
            memory.velocity = 0.0;
        }
        paddle.y = y;
    }
}

impl Default for BotController {
    fn default() -> Self {
        Self::new(BotTuning::default())
    }
}
