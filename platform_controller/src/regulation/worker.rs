//! Per-arm worker threads.
//!
//! Each worker owns exactly one arm, executes one point-to-point move at a
//! time and reports completion through shared flags. A new command always
//! preempts the in-flight move; commands are never queued.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError};
use hexapod_lib::{ArmError, Direction, MotionCommand};
use tracing::{info, warn};

use crate::hal::ArmControl;
use crate::runtime::RunFlag;

/// Coordinator-side view of one worker.
///
/// The coordinator only observes `position`/`is_moving` and sends
/// commands; it never touches the arm itself.
#[derive(Clone)]
pub struct WorkerHandle {
    id: usize,
    tx: flume::Sender<MotionCommand>,
    pending: Arc<AtomicUsize>,
    faulted: Arc<AtomicBool>,
    position: Arc<AtomicI64>,
    max_position: i64,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Sends a move; an in-flight one is preempted (latest command wins).
    pub fn command(&self, command: MotionCommand) {
        // counted before the hand-off so a completion check between send
        // and receive cannot observe a phantom idle
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(command).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(arm = self.id, "worker is gone; command dropped");
        }
    }

    /// Whether the worker is homing, executing a move, or has one queued.
    pub fn is_moving(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Whether the arm is sidelined by a hardware fault. A fresh command
    /// re-arms it.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Last position observed by the worker.
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    pub fn max_position(&self) -> i64 {
        self.max_position
    }
}

/// Spawns the worker thread for one arm. The handle starts out `moving`
/// because the worker homes the arm before accepting commands.
pub fn spawn_worker(
    id: usize,
    arm: Box<dyn ArmControl>,
    poll_interval: Duration,
    run: RunFlag,
) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = flume::unbounded();
    // one synthetic pending entry covers the homing move
    let pending = Arc::new(AtomicUsize::new(1));
    let faulted = Arc::new(AtomicBool::new(false));
    let position = Arc::new(AtomicI64::new(0));

    let handle = WorkerHandle {
        id,
        tx,
        pending: pending.clone(),
        faulted: faulted.clone(),
        position: position.clone(),
        max_position: arm.max_position(),
    };

    let thread = thread::Builder::new()
        .name(format!("arm-{id}"))
        .spawn(move || worker_loop(id, arm, rx, pending, faulted, position, poll_interval, run))
        .expect("failed to spawn arm worker thread");

    (handle, thread)
}

enum MoveOutcome {
    Done,
    Preempted(MotionCommand),
    Shutdown,
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    id: usize,
    mut arm: Box<dyn ArmControl>,
    rx: Receiver<MotionCommand>,
    pending: Arc<AtomicUsize>,
    faulted: Arc<AtomicBool>,
    position: Arc<AtomicI64>,
    poll_interval: Duration,
    run: RunFlag,
) {
    info!(arm = id, "moving to starting position");
    match home(arm.as_mut()) {
        Ok(()) => info!(arm = id, "at starting position"),
        Err(e) => {
            warn!(arm = id, error = %e, "homing failed; arm sidelined");
            faulted.store(true, Ordering::SeqCst);
        }
    }
    publish_position(arm.as_mut(), &position);
    pending.fetch_sub(1, Ordering::SeqCst);

    while run.is_running() {
        let mut command = match rx.recv_timeout(poll_interval) {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // latest command wins; every consumed command is accounted for in
        // `pending` exactly once, when its processing ends
        faulted.store(false, Ordering::SeqCst);
        loop {
            match run_move(
                id,
                arm.as_mut(),
                command,
                &rx,
                &pending,
                &position,
                poll_interval,
                &run,
            ) {
                Ok(MoveOutcome::Done) => break,
                Ok(MoveOutcome::Preempted(next)) => {
                    command = next;
                }
                Ok(MoveOutcome::Shutdown) => break,
                Err(e) => {
                    warn!(arm = id, error = %e, "arm fault during move; arm sidelined");
                    if let Err(stop_err) = arm.stop_by_pwm() {
                        warn!(arm = id, error = %stop_err, "failed to cut power after fault");
                    }
                    faulted.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }

    // leave the arm unpowered on the way out
    if let Err(e) = arm.stop() {
        warn!(arm = id, error = %e, "failed to stop arm during shutdown");
    }
}

fn home(arm: &mut dyn ArmControl) -> Result<(), ArmError> {
    arm.move_to_starting_position()?;
    arm.reset_position_buffer()?;
    Ok(())
}

fn publish_position(arm: &mut dyn ArmControl, position: &AtomicI64) {
    if let Ok(current) = arm.position() {
        position.store(current, Ordering::SeqCst);
    }
}

fn arrived(direction: Direction, position: i64, target: i64) -> bool {
    match direction {
        Direction::Forward => position >= target,
        Direction::Backward => position <= target,
        Direction::Stopped => true,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_move(
    id: usize,
    arm: &mut dyn ArmControl,
    command: MotionCommand,
    rx: &Receiver<MotionCommand>,
    pending: &AtomicUsize,
    position: &AtomicI64,
    poll_interval: Duration,
    run: &RunFlag,
) -> Result<MoveOutcome, ArmError> {
    let MotionCommand {
        direction,
        speed,
        target,
    } = command;

    if direction == Direction::Stopped {
        return Ok(MoveOutcome::Done);
    }

    // already at or past the target in this direction sense
    let current = arm.position()?;
    position.store(current, Ordering::SeqCst);
    if arrived(direction, current, target) {
        return Ok(MoveOutcome::Done);
    }

    arm.set_speed(speed)?;
    match direction {
        Direction::Forward => arm.start_forward()?,
        Direction::Backward => arm.start_backward()?,
        Direction::Stopped => unreachable!(),
    }

    loop {
        thread::sleep(poll_interval);

        if !run.is_running() {
            arm.stop()?;
            return Ok(MoveOutcome::Shutdown);
        }

        if let Ok(mut next) = rx.try_recv() {
            // drain to the newest command; everything superseded on the
            // way is finished without ever starting
            while let Ok(newer) = rx.try_recv() {
                pending.fetch_sub(1, Ordering::SeqCst);
                next = newer;
            }
            arm.stop()?;
            // the abandoned move is finished too
            pending.fetch_sub(1, Ordering::SeqCst);
            return Ok(MoveOutcome::Preempted(next));
        }

        let current = arm.position()?;
        position.store(current, Ordering::SeqCst);
        if arrived(direction, current, target) {
            arm.stop()?;
            tracing::debug!(arm = id, position = current, target, "arrived at goal");
            return Ok(MoveOutcome::Done);
        }
    }
}
