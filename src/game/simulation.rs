//! Per-room simulation loop
//!
//! One tokio task per running room. Real elapsed time is accumulated and
//! drained in fixed physics steps; a scored point pauses only this room for
//! one second before the serve. The loop holds the room lock for a single
//! step at a time and never across an await.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::util::time::{broadcast_interval, fixed_dt, MAX_FRAME_SECS, SCORE_PAUSE};
use crate::ws::protocol::ServerMsg;

use super::bot::BotController;
use super::r#match::StepOutcome;
use super::registry::RoomHandle;
use super::snapshot::{update_msg, BroadcastThrottle};
use super::state::Side;

/// What the drain loop decided after one locked step
enum Drained {
    Continue,
    Paused(Side),
    Stop,
}

/// Spawn the loop for the match started at `epoch`.
///
/// The outer task supervises the worker: if the worker panics the room is
/// forced out of `Running` so no state leaks past the loop.
pub fn spawn(handle: Arc<RoomHandle>, epoch: u64, bot: Arc<BotController>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let worker = tokio::spawn(run(handle.clone(), epoch, bot));

        if let Err(err) = worker.await {
            if err.is_panic() {
                error!(room_id = %handle.id, epoch, "Simulation task panicked");
            }
        }

        let mut room = handle.lock();
        if room.epoch == epoch && room.halt() {
            handle.broadcast(ServerMsg::GameHalted {
                reason: "Simulation stopped unexpectedly".to_string(),
            });
        }
    })
}

async fn run(handle: Arc<RoomHandle>, epoch: u64, bot: Arc<BotController>) {
    let dt = fixed_dt();
    let mut ticker = interval(Duration::from_secs_f64(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut throttle = BroadcastThrottle::new(broadcast_interval());
    let mut accumulator = 0.0_f64;
    let mut last = Instant::now();

    info!(room_id = %handle.id, epoch, "Simulation loop started");

    'outer: loop {
        ticker.tick().await;

        let now = Instant::now();
        accumulator += now.duration_since(last).as_secs_f64().min(MAX_FRAME_SECS);
        last = now;

        while accumulator >= dt {
            accumulator -= dt;

            match drain_step(&handle, epoch, &bot) {
                Drained::Continue => {}
                Drained::Stop => break 'outer,
                Drained::Paused(scorer) => {
                    sleep(SCORE_PAUSE).await;

                    {
                        let mut room = handle.lock();
                        if !room.is_live(epoch) {
                            break 'outer;
                        }
                        room.serve_after_point(scorer);
                        handle.broadcast(update_msg(&room.sim));
                    }

                    // The pause is not simulated time
                    accumulator = 0.0;
                    last = Instant::now();
                    throttle.mark_sent(last);
                    continue 'outer;
                }
            }
        }

        {
            let room = handle.lock();
            if !room.is_live(epoch) {
                break;
            }
            if throttle.should_send(now) {
                handle.broadcast(update_msg(&room.sim));
            }
        }
    }

    debug!(room_id = %handle.id, epoch, "Simulation loop exited");
}

/// Advance one fixed step under the room lock and publish its events
fn drain_step(handle: &RoomHandle, epoch: u64, bot: &BotController) -> Drained {
    let mut room = handle.lock();
    if !room.is_live(epoch) {
        return Drained::Stop;
    }

    match room.step(bot) {
        Ok(StepOutcome::Continue) => Drained::Continue,
        Ok(StepOutcome::Scored(side)) => {
            handle.broadcast(ServerMsg::Score {
                game_state: room.sim.clone(),
                scoring_side: side,
            });
            Drained::Paused(side)
        }
        Ok(StepOutcome::Won(winner)) => {
            handle.broadcast(ServerMsg::Score {
                game_state: room.sim.clone(),
                scoring_side: winner,
            });
            handle.broadcast(ServerMsg::GameOver {
                winner,
                game_state: room.sim.clone(),
                score: room.sim.score,
                win_points: room.win_points,
            });
            Drained::Stop
        }
        Err(err) => {
            error!(room_id = %room.id, epoch, error = %err, "Simulation tick fault");
            room.halt();
            handle.broadcast(ServerMsg::GameHalted {
                reason: err.to_string(),
            });
            Drained::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::r#match::MatchPhase;
    use crate::game::room::{GameMode, Room};
    use crate::game::state::{Ball, Side};
    use tokio::sync::broadcast::Receiver;
    use uuid::Uuid;

    fn bot() -> Arc<BotController> {
        Arc::new(BotController::default())
    }

    fn running_pvp(win_points: u32) -> (Arc<RoomHandle>, u64) {
        let creator = Uuid::new_v4();
        let mut room = Room::new(Uuid::new_v4(), GameMode::Pvp, win_points, creator, 3);
        room.join(creator, "a".into()).unwrap();
        room.join(Uuid::new_v4(), "b".into()).unwrap();
        let epoch = room.start(creator).unwrap();
        (Arc::new(RoomHandle::new(room)), epoch)
    }

    async fn next_matching(rx: &mut Receiver<ServerMsg>, pred: impl Fn(&ServerMsg) -> bool) -> ServerMsg {
        loop {
            let msg = rx.recv().await.unwrap();
            if pred(&msg) {
                return msg;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bot_match_ends_with_left_win() {
        let human = Uuid::new_v4();
        let mut room = Room::new(Uuid::new_v4(), GameMode::Bot, 3, human, 7);
        room.join(human, "h".into()).unwrap();
        let epoch = room.start(human).unwrap();

        // Human parked at the bottom, ball flying past the top of the field
        room.sim.paddles.right.y = 520.0;
        room.sim.score.left = 2;
        room.sim.ball = Ball { x: 700.0, y: 100.0, dx: 8.0, dy: 0.0 };

        let handle = Arc::new(RoomHandle::new(room));
        let mut rx = handle.subscribe();
        let task = spawn(handle.clone(), epoch, bot());

        let over = next_matching(&mut rx, |m| matches!(m, ServerMsg::GameOver { .. })).await;
        match over {
            ServerMsg::GameOver { winner, score, win_points, .. } => {
                assert_eq!(winner, Side::Left);
                assert_eq!(score.left, 3);
                assert_eq!(win_points, 3);
            }
            _ => unreachable!(),
        }

        task.await.unwrap();
        let room = handle.lock();
        assert_eq!(room.phase, MatchPhase::GameOver { winner: Side::Left });
        assert!(!room.phase.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn score_pauses_before_serving() {
        let (handle, epoch) = running_pvp(5);
        {
            let mut room = handle.lock();
            room.sim.paddles.right.y = 520.0;
            room.sim.ball = Ball { x: 790.0, y: 100.0, dx: 8.0, dy: 0.0 };
        }
        let mut rx = handle.subscribe();
        let _task = spawn(handle.clone(), epoch, bot());

        let scored = next_matching(&mut rx, |m| matches!(m, ServerMsg::Score { .. })).await;
        assert!(matches!(scored, ServerMsg::Score { scoring_side: Side::Left, .. }));

        sleep(Duration::from_millis(500)).await;
        assert!(handle.lock().sim.ball.x > 800.0);

        sleep(Duration::from_millis(600)).await;
        let room = handle.lock();
        assert!((room.sim.ball.x - 400.0).abs() < 60.0);
        assert_eq!(room.sim.score.left, 1);
        assert!(room.phase.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn broadcasts_are_throttled() {
        let (handle, epoch) = running_pvp(5);
        let mut rx = handle.subscribe();
        let _task = spawn(handle.clone(), epoch, bot());

        sleep(Duration::from_millis(500)).await;
        handle.lock().halt();

        let mut updates = 0;
        while let Ok(msg) = rx.try_recv() {
            if matches!(msg, ServerMsg::Update { .. }) {
                updates += 1;
            }
        }
        // ~20 per second, never one per physics tick
        assert!((6..=12).contains(&updates), "got {updates} updates");
    }

    #[tokio::test(start_paused = true)]
    async fn halt_stops_the_loop() {
        let (handle, epoch) = running_pvp(5);
        let task = spawn(handle.clone(), epoch, bot());

        sleep(Duration::from_millis(100)).await;
        assert!(handle.lock().halt());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should exit after halt")
            .unwrap();
        assert_eq!(handle.lock().phase, MatchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_fault_forces_idle_and_keeps_room() {
        let (handle, epoch) = running_pvp(5);
        handle.lock().sim.ball.dy = f32::NAN;
        let mut rx = handle.subscribe();

        spawn(handle.clone(), epoch, bot()).await.unwrap();

        let halted = next_matching(&mut rx, |m| matches!(m, ServerMsg::GameHalted { .. })).await;
        assert!(matches!(halted, ServerMsg::GameHalted { .. }));
        let room = handle.lock();
        assert_eq!(room.phase, MatchPhase::Idle);
        assert!(!room.closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_loop_exits_after_restart() {
        let (handle, first) = running_pvp(5);
        let stale = spawn(handle.clone(), first, bot());

        let second = {
            let mut room = handle.lock();
            room.halt();
            let creator = room.creator;
            room.start(creator).unwrap()
        };
        assert_ne!(first, second);

        tokio::time::timeout(Duration::from_secs(1), stale)
            .await
            .expect("stale loop should exit")
            .unwrap();
        // The newer match is untouched by the stale supervisor
        assert!(handle.lock().is_live(second));
    }
}
