//! Regulation: turns received positions into coordinated multi-arm motion.
//!
//! One coordinator thread samples the mailbox, derives a motion goal per
//! arm and waits for all workers to go idle before sampling again. Speeds
//! are scaled proportionally to each arm's remaining distance so all arms
//! arrive together.

pub mod worker;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hexapod_lib::{Direction, LegPosition, Mailbox, MotionCommand, RegulationConfig, LEG_COUNT};
use tracing::{debug, info};

use crate::hal::ArmControl;
use crate::regulation::worker::{spawn_worker, WorkerHandle};
use crate::runtime::RunFlag;

pub struct Regulation {
    handles: Vec<WorkerHandle>,
    coordinator: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Regulation {
    /// Spawns the per-arm workers (each homes first) and the coordinator.
    pub fn start(
        arms: Vec<Box<dyn ArmControl>>,
        cfg: &RegulationConfig,
        mailbox: Arc<Mailbox<LegPosition>>,
        run: RunFlag,
    ) -> Self {
        let poll_interval = Duration::from_millis(cfg.poll_interval_ms);
        let max_speed = cfg.max_speed_percent;

        let mut handles = Vec::with_capacity(arms.len());
        let mut workers = Vec::with_capacity(arms.len());
        for (id, arm) in arms.into_iter().enumerate() {
            let (handle, thread) = spawn_worker(id, arm, poll_interval, run.clone());
            handles.push(handle);
            workers.push(thread);
        }

        let coordinator = {
            let handles = handles.clone();
            thread::Builder::new()
                .name("coordinator".to_string())
                .spawn(move || coordinator_loop(handles, mailbox, max_speed, poll_interval, run))
                .expect("failed to spawn coordinator thread")
        };

        Self {
            handles,
            coordinator: Some(coordinator),
            workers,
        }
    }

    /// Coordinator-side views of the workers, for status reporting.
    pub fn handles(&self) -> Vec<WorkerHandle> {
        self.handles.clone()
    }

    /// Joins the coordinator and every worker. The run flag must already
    /// be cleared and the mailbox closed.
    pub fn join(mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            let _ = coordinator.join();
        }
        // dropping the handles disconnects the command channels
        self.handles.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn coordinator_loop(
    handles: Vec<WorkerHandle>,
    mailbox: Arc<Mailbox<LegPosition>>,
    max_speed: u8,
    poll_interval: Duration,
    run: RunFlag,
) {
    // no targets are accepted until every arm finished homing
    wait_all_idle(&handles, poll_interval, &run);
    if !run.is_running() {
        return;
    }
    info!("all arms at starting position");

    while run.is_running() {
        let Some(position) = mailbox.take_latest() else {
            info!("position stream ended; requesting shutdown");
            run.request_stop();
            break;
        };

        debug!(%position, "dispatching position");
        dispatch(&handles, &position, max_speed);
        wait_all_idle(&handles, poll_interval, &run);
    }
}

/// Commands every worker with its share of one position update.
fn dispatch(handles: &[WorkerHandle], position: &LegPosition, max_speed: u8) {
    let mut goals = [0i64; LEG_COUNT];
    let mut diffs = [0i64; LEG_COUNT];
    for (i, handle) in handles.iter().enumerate() {
        goals[i] = scale_goal(position.length(i), handle.max_position());
        diffs[i] = (handle.position() - goals[i]).abs();
    }

    let speeds = plan_speeds(&diffs, max_speed);

    for (i, handle) in handles.iter().enumerate() {
        let direction = Direction::towards(handle.position(), goals[i]);
        debug!(
            arm = i,
            goal = goals[i],
            speed = speeds[i],
            ?direction,
            "commanding move"
        );
        handle.command(MotionCommand {
            direction,
            speed: speeds[i],
            target: goals[i],
        });
    }
}

/// Scales a raw length (`0..=LegPosition::MAX`) into an arm's calibrated
/// encoder range.
fn scale_goal(raw: u32, max_position: i64) -> i64 {
    let fraction = f64::from(raw) / f64::from(LegPosition::MAX);
    let goal = (fraction * max_position as f64).round() as i64;
    goal.clamp(0, max_position)
}

/// Proportional speed policy: the arm with the longest way to go moves at
/// top speed, the others proportionally slower, so all arms arrive
/// together. A nonzero distance never yields a zero speed, which would
/// leave the drive disengaged and the move unable to terminate.
fn plan_speeds(diffs: &[i64; LEG_COUNT], max_speed: u8) -> [u8; LEG_COUNT] {
    let longest = diffs.iter().copied().max().unwrap_or(0).max(1);

    let mut speeds = [0u8; LEG_COUNT];
    for (i, &diff) in diffs.iter().enumerate() {
        if diff == 0 {
            continue;
        }
        let scaled = (diff as f64 / longest as f64) * f64::from(max_speed);
        speeds[i] = (scaled.round() as u8).clamp(1, max_speed.max(1));
    }
    speeds
}

/// Bounded-poll barrier: returns once every non-faulted worker is idle or
/// shutdown is requested. The poll interval bounds how stale an "all
/// idle" observation can be; a stuck worker never hangs this forever
/// silently because the run flag is rechecked each round.
fn wait_all_idle(handles: &[WorkerHandle], poll_interval: Duration, run: &RunFlag) {
    loop {
        if !run.is_running() {
            return;
        }
        if handles
            .iter()
            .all(|handle| !handle.is_moving() || handle.is_faulted())
        {
            return;
        }
        thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimArm;
    use crate::server::PositionServer;
    use hexapod_lib::ServerConfig;
    use std::io::Write;
    use std::net::TcpStream;
    use std::time::Instant;

    fn sim_arms(count: usize) -> Vec<Box<dyn ArmControl>> {
        (0..count)
            .map(|id| {
                Box::new(SimArm::new(
                    id,
                    1024,
                    Duration::from_millis(2),
                    Duration::from_millis(30),
                )) as Box<dyn ArmControl>
            })
            .collect()
    }

    fn test_config() -> RegulationConfig {
        RegulationConfig {
            max_speed_percent: 100,
            poll_interval_ms: 5,
        }
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_scale_goal_is_monotonic_and_bounded() {
        let max_position = 1024;
        let mut previous = scale_goal(0, max_position);
        assert_eq!(previous, 0);
        for raw in 1..=LegPosition::MAX {
            let goal = scale_goal(raw, max_position);
            assert!(goal >= previous, "scaling must be monotonic");
            assert!((0..=max_position).contains(&goal));
            previous = goal;
        }
        assert_eq!(scale_goal(LegPosition::MAX, max_position), max_position);
    }

    #[test]
    fn test_plan_speeds_proportional_policy() {
        let speeds = plan_speeds(&[400, 200, 100, 0, 400, 40], 50);

        // longest distance gets top speed, the rest scale down with it
        assert_eq!(speeds[0], 50);
        assert_eq!(speeds[1], 25);
        assert_eq!(speeds[2], 13);
        assert_eq!(speeds[4], 50);
        // no motion needed, no speed
        assert_eq!(speeds[3], 0);
        assert_eq!(speeds[5], 5);
    }

    #[test]
    fn test_plan_speeds_never_stalls_a_nonzero_distance() {
        // rounding would give 0 here; the clamp keeps the arm moving
        let speeds = plan_speeds(&[1, 1000, 0, 0, 0, 0], 50);
        assert_eq!(speeds[0], 1);
        assert_eq!(speeds[1], 50);
    }

    #[test]
    fn test_regulation_homes_then_executes_target() {
        let run = RunFlag::new();
        let mailbox = Arc::new(Mailbox::new());
        let regulation = Regulation::start(sim_arms(6), &test_config(), mailbox.clone(), run.clone());
        let handles = regulation.handles();

        // homing barrier: all workers become idle at position 0
        assert!(wait_until(Duration::from_secs(2), || {
            handles.iter().all(|h| !h.is_moving())
        }));
        for handle in &handles {
            assert_eq!(handle.position(), 0);
        }

        let position = LegPosition::from_frame_text("100,200,300,400,500,600").unwrap();
        mailbox.publish(position);

        // every arm ends up at or past its scaled goal
        assert!(wait_until(Duration::from_secs(5), || {
            handles.iter().enumerate().all(|(i, h)| {
                !h.is_moving() && h.position() >= scale_goal(position.length(i), h.max_position())
            })
        }));

        run.request_stop();
        mailbox.close();
        regulation.join();
    }

    #[test]
    fn test_target_published_during_homing_is_served_after_homing() {
        let run = RunFlag::new();
        let mailbox = Arc::new(Mailbox::new());
        let regulation =
            Regulation::start(sim_arms(6), &test_config(), mailbox.clone(), run.clone());
        let handles = regulation.handles();

        // published while the arms are still homing; it stays in the
        // mailbox until the homing barrier opens
        let position = LegPosition::from_frame_text("500,500,500,500,500,500").unwrap();
        mailbox.publish(position);

        assert!(wait_until(Duration::from_secs(5), || {
            handles
                .iter()
                .all(|h| !h.is_moving() && h.position() >= scale_goal(500, h.max_position()))
        }));

        run.request_stop();
        mailbox.close();
        regulation.join();
    }

    #[test]
    fn test_closed_mailbox_triggers_shutdown() {
        let run = RunFlag::new();
        let mailbox: Arc<Mailbox<LegPosition>> = Arc::new(Mailbox::new());
        let regulation = Regulation::start(sim_arms(2), &test_config(), mailbox.clone(), run.clone());

        mailbox.close();

        // the coordinator exits AwaitTarget and requests process shutdown
        assert!(wait_until(Duration::from_secs(2), || !run.is_running()));
        regulation.join();
    }

    #[test]
    fn test_end_to_end_over_tcp() {
        let run = RunFlag::new();
        let mailbox = Arc::new(Mailbox::new());
        let mut server = PositionServer::start(
            &ServerConfig { port: 0 },
            mailbox.clone(),
            run.clone(),
        )
        .unwrap();
        let regulation = Regulation::start(sim_arms(6), &test_config(), mailbox.clone(), run.clone());
        let handles = regulation.handles();

        assert!(wait_until(Duration::from_secs(2), || {
            handles.iter().all(|h| !h.is_moving())
        }));

        // frame up a position the way the sender does
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        let payload = b"100,200,300,400,500,600";
        stream
            .write_all(&(payload.len() as u16).to_be_bytes())
            .unwrap();
        stream.write_all(payload).unwrap();
        stream.flush().unwrap();

        let position = LegPosition::from_frame_text("100,200,300,400,500,600").unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            handles.iter().enumerate().all(|(i, h)| {
                !h.is_moving() && h.position() >= scale_goal(position.length(i), h.max_position())
            })
        }));

        run.request_stop();
        server.stop();
        regulation.join();
    }
}
