use alloc::vec::Vec;

use super::*;
use crate::platform::{AddressSpaceProvider, GateVerdict};
use crate::task::{InterruptFrame, TrapFrame};
use crate::testing::{DEFAULT_ENTRY_STACK, KERNEL_ROOT, MockPlatform};

const KERNEL_ENTRY: u64 = 0xffff_8000_0001_0000;
const USER_ENTRY: u64 = 0x40_0000;

fn scheduler() -> Scheduler<MockPlatform> {
    Scheduler::new(MockPlatform::new(), SchedulerConfig::default())
}

fn with_config(config: SchedulerConfig) -> Scheduler<MockPlatform> {
    Scheduler::new(MockPlatform::new(), config)
}

fn kernel_task(s: &mut Scheduler<MockPlatform>, name: &str) -> TaskId {
    s.spawn(name, KERNEL_ENTRY, 0, Priority::Normal, TaskFlags::KERNEL_MODE)
        .unwrap()
}

fn user_task(s: &mut Scheduler<MockPlatform>, name: &str) -> TaskId {
    s.spawn(name, USER_ENTRY, 0, Priority::Normal, TaskFlags::USER_MODE)
        .unwrap()
}

/// Task whose saved context the plan loads.
fn target(s: &Scheduler<MockPlatform>, plan: &SwitchPlan) -> Option<TaskId> {
    s.tasks()
        .iter_active()
        .find(|task| core::ptr::eq(task.context(), plan.load.as_ptr()))
        .map(Task::id)
}

fn state(s: &Scheduler<MockPlatform>, id: TaskId) -> TaskState {
    s.task(id).unwrap().state()
}

fn assert_invariants(s: &Scheduler<MockPlatform>) {
    let running = s
        .tasks()
        .iter_active()
        .filter(|task| task.state() == TaskState::Running)
        .count();
    assert!(running <= 1, "{running} tasks running");

    for task in s.tasks().iter_active() {
        assert_eq!(
            task.is_queued(),
            task.state() == TaskState::Ready,
            "task {} is {:?} but queued={}",
            task.id(),
            task.state(),
            task.is_queued()
        );
    }

    let mut ready = s.ready_tasks();
    let len = ready.len();
    ready.sort();
    ready.dedup();
    assert_eq!(ready.len(), len, "task queued twice");
}

fn user_trap(rip: u64) -> TrapFrame {
    TrapFrame {
        frame: InterruptFrame {
            rip,
            cs: 0x33,
            rflags: 0x202,
            rsp: 0x7fff_ffff_e000,
            ss: 0x2b,
        },
        vector: 0x80,
        ..TrapFrame::default()
    }
}

fn pending_input() -> bool {
    true
}

fn fatal_gate() -> GateVerdict {
    GateVerdict::Fatal
}

#[test]
fn test_start_runs_queue_head() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    let b = kernel_task(&mut s, "b");

    let plan = s.start().unwrap();
    assert_eq!(target(&s, &plan), Some(a));
    assert_eq!(plan.kind, Handoff::Jump);
    assert!(plan.save.is_some());
    assert_eq!(s.current_task(), Some(a));
    assert_eq!(state(&s, a), TaskState::Running);
    assert_eq!(s.ready_tasks(), [b]);
    assert!(s.is_enabled());
    assert!(s.is_preemption_enabled());
    assert!(s.platform().tick_irq);
    assert_invariants(&s);
}

#[test]
fn test_start_errors() {
    let mut s = scheduler();
    assert_eq!(s.start(), Err(SchedulerError::NoRunnableTask));

    kernel_task(&mut s, "a");
    s.start().unwrap();
    assert_eq!(s.start(), Err(SchedulerError::AlreadyStarted));
}

#[test]
fn test_two_tasks_alternate() {
    let mut s = with_config(SchedulerConfig::default().with_quantum(10));
    let a = kernel_task(&mut s, "a");
    let b = kernel_task(&mut s, "b");

    let plan = s.start().unwrap();
    assert_eq!(s.stats().context_switches, 1);
    assert_eq!(target(&s, &plan), Some(a));

    let mut order = Vec::new();
    for _ in 0..4 {
        let plan = s.yield_now().unwrap();
        order.push(target(&s, &plan).unwrap());
        assert_invariants(&s);
    }
    assert_eq!(order, [b, a, b, a]);
    assert_eq!(s.stats().yields, 4);
    assert_eq!(s.stats().context_switches, 5);
}

#[test]
fn test_round_robin_fairness() {
    let mut s = scheduler();
    let ids: Vec<TaskId> = ["a", "b", "c", "d"]
        .iter()
        .map(|name| kernel_task(&mut s, name))
        .collect();
    s.start().unwrap();

    let mut order = vec![s.current_task().unwrap()];
    for _ in 0..11 {
        s.yield_now().unwrap();
        order.push(s.current_task().unwrap());
    }

    for round in order.chunks(4) {
        assert_eq!(round, ids.as_slice());
    }
}

#[test]
fn test_yield_alone_keeps_running() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    s.start().unwrap();

    assert_eq!(s.yield_now(), None);
    assert_eq!(s.current_task(), Some(a));
    assert_eq!(state(&s, a), TaskState::Running);
    assert_invariants(&s);
}

#[test]
fn test_quantum_expiry_sets_pending_on_last_tick() {
    let mut s = with_config(SchedulerConfig::default().with_quantum(5));
    let a = kernel_task(&mut s, "a");
    let b = kernel_task(&mut s, "b");
    s.start().unwrap();

    for _ in 0..4 {
        s.timer_tick();
        assert!(!s.is_reschedule_pending());
    }
    s.timer_tick();
    assert!(s.is_reschedule_pending());
    assert_eq!(s.stats().preemptions, 1);

    let plan = s.handle_post_irq().unwrap();
    assert_eq!(target(&s, &plan), Some(b));
    assert!(!s.is_reschedule_pending());
    assert_eq!(s.ready_tasks(), [a]);
    assert_eq!(s.task(a).unwrap().accounting().quantum_remaining, 5);
    assert_invariants(&s);
}

#[test]
fn test_quantum_resets_when_nothing_is_ready() {
    let mut s = with_config(SchedulerConfig::default().with_quantum(3));
    let a = kernel_task(&mut s, "a");
    s.start().unwrap();

    for _ in 0..3 {
        s.timer_tick();
    }
    assert!(!s.is_reschedule_pending());
    assert_eq!(s.task(a).unwrap().accounting().quantum_remaining, 3);
    assert_eq!(s.stats().ticks, 3);
}

#[test]
fn test_no_preempt_tasks_are_not_preempted() {
    let mut s = with_config(SchedulerConfig::default().with_quantum(2));
    s.spawn(
        "pinned",
        KERNEL_ENTRY,
        0,
        Priority::High,
        TaskFlags::KERNEL_MODE | TaskFlags::NO_PREEMPT,
    )
    .unwrap();
    kernel_task(&mut s, "other");
    s.start().unwrap();

    for _ in 0..10 {
        s.timer_tick();
    }
    assert!(!s.is_reschedule_pending());
    assert_eq!(s.handle_post_irq(), None);
}

#[test]
fn test_tick_is_ignored_when_preemption_is_off() {
    let mut s = with_config(SchedulerConfig::default().with_quantum(1).with_preemption(false));
    let a = kernel_task(&mut s, "a");
    kernel_task(&mut s, "b");
    s.start().unwrap();
    assert!(!s.platform().tick_irq);

    s.timer_tick();
    s.request_reschedule();
    assert!(!s.is_reschedule_pending());
    assert_eq!(s.stats().ticks, 1);
    assert_eq!(s.current_task(), Some(a));
}

#[test]
fn test_disabling_preemption_drops_pending() {
    let mut s = with_config(SchedulerConfig::default().with_quantum(1));
    kernel_task(&mut s, "a");
    kernel_task(&mut s, "b");
    s.start().unwrap();

    s.timer_tick();
    assert!(s.is_reschedule_pending());
    s.set_preemption_enabled(false);
    assert!(!s.is_reschedule_pending());
    assert!(!s.platform().tick_irq);
    assert_eq!(s.handle_post_irq(), None);
}

#[test]
fn test_missed_ticks_are_counted() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    s.start().unwrap();

    s.record_missed_ticks(3);
    s.timer_tick();
    assert_eq!(s.stats().ticks, 4);
    assert_eq!(s.current_task(), Some(a));
}

#[test]
fn test_schedule_is_not_reentrant() {
    let mut s = with_config(SchedulerConfig::default().with_quantum(1));
    let a = kernel_task(&mut s, "a");
    kernel_task(&mut s, "b");
    s.start().unwrap();

    s.in_schedule = true;
    s.timer_tick();
    assert!(!s.is_reschedule_pending());
    assert_eq!(s.schedule(), None);
    assert_eq!(s.current_task(), Some(a));

    s.in_schedule = false;
    assert!(s.schedule().is_some());
}

#[test]
fn test_stopped_scheduler_does_nothing() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    kernel_task(&mut s, "b");
    s.start().unwrap();
    s.stop();

    assert!(!s.is_enabled());
    assert_eq!(s.yield_now(), None);
    assert_eq!(s.current_task(), Some(a));
}

#[test]
fn test_wait_for_wakes_on_exit() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    let b = kernel_task(&mut s, "b");
    s.start().unwrap();

    let plan = s.wait_for(b).unwrap().unwrap();
    assert_eq!(target(&s, &plan), Some(b));
    assert_eq!(state(&s, a), TaskState::Blocked);
    assert_eq!(s.task(a).unwrap().waiting_on(), Some(b));
    assert_invariants(&s);

    let plan = s.exit_current(0).unwrap().unwrap();
    assert_eq!(target(&s, &plan), Some(a));
    assert_eq!(state(&s, a), TaskState::Running);
    assert_eq!(s.task(a).unwrap().waiting_on(), None);
    assert_eq!(state(&s, b), TaskState::Terminated);
    assert_invariants(&s);

    let record = s.tasks().exit_record(b).unwrap();
    assert_eq!(record.reason, ExitReason::Normal);
    assert_eq!(record.code, 0);
}

#[test]
fn test_exit_wakes_every_waiter_once() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    let b = kernel_task(&mut s, "b");
    let c = kernel_task(&mut s, "c");
    s.start().unwrap();

    s.wait_for(c).unwrap();
    assert_eq!(s.current_task(), Some(b));
    s.wait_for(c).unwrap();
    assert_eq!(s.current_task(), Some(c));

    s.exit_current(3).unwrap();
    assert_eq!(s.current_task(), Some(a));
    assert_eq!(s.ready_tasks(), [b]);
    assert_invariants(&s);
}

#[test]
fn test_wait_for_missing_target_returns_immediately() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    s.start().unwrap();

    assert_eq!(s.wait_for(TaskId::from_raw(42)), Ok(None));
    assert_eq!(state(&s, a), TaskState::Running);
    assert_eq!(s.wait_for(a), Err(SchedulerError::InvalidTarget));
    assert_eq!(
        s.wait_for(TaskId::INVALID),
        Err(SchedulerError::InvalidTarget)
    );
}

#[test]
fn test_block_and_unblock() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    let b = kernel_task(&mut s, "b");
    s.start().unwrap();

    s.block_current().unwrap();
    assert_eq!(state(&s, a), TaskState::Blocked);
    assert_eq!(s.current_task(), Some(b));

    assert_eq!(s.unblock(b), Err(SchedulerError::NotBlocked));
    s.unblock(a).unwrap();
    s.unblock(a).unwrap();
    assert_eq!(s.ready_tasks(), [a]);
    assert_invariants(&s);
}

#[test]
fn test_terminate_is_idempotent() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    let b = user_task(&mut s, "b");
    s.start().unwrap();

    s.terminate(b).unwrap();
    assert!(s.task(b).is_none());
    assert_eq!(s.platform().destroyed.len(), 1);
    assert!(s.ready_tasks().is_empty());

    assert_eq!(
        s.terminate(b),
        Err(SchedulerError::Task(TaskError::NotFound))
    );
    assert_eq!(
        s.terminate(TaskId::INVALID),
        Err(SchedulerError::Task(TaskError::NotFound))
    );

    s.terminate(TaskId::CURRENT).unwrap();
    assert_eq!(
        s.terminate(a),
        Err(SchedulerError::Task(TaskError::AlreadyTerminated))
    );
    assert_eq!(s.platform().destroyed.len(), 1);
    assert_eq!(s.tasks().stats().total_terminated, 2);
}

#[test]
fn test_self_termination_defers_release() {
    let mut s = scheduler();
    let u = user_task(&mut s, "u");
    let k = kernel_task(&mut s, "k");
    s.start().unwrap();

    s.terminate(TaskId::CURRENT).unwrap();
    assert_eq!(state(&s, u), TaskState::Terminated);
    assert!(s.tasks().get(u).is_some());
    assert_eq!(s.platform().live_spaces(), 1);

    // Reclaim must wait until the switch away has happened.
    s.reap();
    assert!(s.tasks().get(u).is_some());

    let plan = s.schedule().unwrap();
    assert_eq!(target(&s, &plan), Some(k));
    assert!(plan.save.is_none());
    assert!(s.tasks().get(u).is_some());

    s.reap();
    assert!(s.tasks().get(u).is_none());
    assert_eq!(s.platform().live_spaces(), 0);
}

#[test]
fn test_reclaim_on_next_schedule() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    kernel_task(&mut s, "b");
    s.start().unwrap();

    s.exit_current(0).unwrap();
    assert!(s.tasks().get(a).is_some());
    s.yield_now();
    assert!(s.tasks().get(a).is_none());
}

#[test]
fn test_table_full() {
    let mut s = scheduler();
    for i in 0..32 {
        s.create_task(
            &alloc::format!("t{i}"),
            KERNEL_ENTRY,
            0,
            Priority::Normal,
            TaskFlags::KERNEL_MODE,
        )
        .unwrap();
    }
    let before = s.tasks().stats();

    assert_eq!(
        s.create_task("one-more", KERNEL_ENTRY, 0, Priority::Normal, TaskFlags::KERNEL_MODE),
        Err(SchedulerError::Task(TaskError::TableFull))
    );
    assert_eq!(s.tasks().stats(), before);
}

#[test]
fn test_user_fault_terminates_task() {
    let mut s = scheduler();
    let u = user_task(&mut s, "u");
    let k = kernel_task(&mut s, "k");
    s.start().unwrap();

    assert_eq!(s.fault_current(FaultReason::PageFault), Ok(u));
    let task = s.task(u).unwrap();
    assert_eq!(task.state(), TaskState::Terminated);
    assert_eq!(task.exit_reason(), ExitReason::UserFault);
    assert_eq!(task.fault_reason(), FaultReason::PageFault);
    assert!(s.is_reschedule_pending());
    assert!(s.is_enabled());

    let plan = s.handle_post_irq().unwrap();
    assert_eq!(target(&s, &plan), Some(k));
    assert_eq!(
        s.tasks().exit_record(u).unwrap().fault,
        FaultReason::PageFault
    );
    assert_invariants(&s);
}

#[test]
fn test_kernel_task_fault_is_not_a_user_fault() {
    let mut s = scheduler();
    let k = kernel_task(&mut s, "k");
    s.start().unwrap();

    assert_eq!(
        s.fault_current(FaultReason::GeneralProtection),
        Err(SchedulerError::NotUserTask)
    );
    assert_eq!(state(&s, k), TaskState::Running);
}

#[test]
fn test_full_queue_keeps_current_running() {
    let mut config = SchedulerConfig::default().with_capacity(4);
    config.queue_capacity = 1;
    let mut s = with_config(config);
    let a = kernel_task(&mut s, "a");
    s.start().unwrap();
    let b = kernel_task(&mut s, "b");

    assert_eq!(s.yield_now(), None);
    assert_eq!(s.current_task(), Some(a));
    assert_eq!(state(&s, a), TaskState::Running);
    assert_eq!(s.ready_tasks(), [b]);
    assert_invariants(&s);
}

#[test]
fn test_waiter_woken_into_full_queue_is_not_lost() {
    let mut config = SchedulerConfig::default().with_capacity(4);
    config.queue_capacity = 1;
    let mut s = with_config(config);
    let a = kernel_task(&mut s, "a");
    s.start().unwrap();
    let c = kernel_task(&mut s, "c");

    let plan = s.wait_for(c).unwrap().unwrap();
    assert_eq!(target(&s, &plan), Some(c));
    let d = kernel_task(&mut s, "d");

    // `d` fills the queue, so the exit of `c` cannot queue `a`.
    s.terminate(TaskId::CURRENT).unwrap();
    assert_eq!(state(&s, a), TaskState::Blocked);
    assert_eq!(s.task(a).unwrap().waiting_on(), Some(c));
    assert_eq!(s.stats().deferred_wakes, 1);
    assert_invariants(&s);

    let plan = s.schedule().unwrap();
    assert_eq!(target(&s, &plan), Some(d));
    assert_eq!(state(&s, a), TaskState::Ready);
    assert_eq!(s.ready_tasks(), [a]);
    assert_invariants(&s);

    let plan = s.exit_current(0).unwrap().unwrap();
    assert_eq!(target(&s, &plan), Some(a));
    assert_eq!(state(&s, a), TaskState::Running);
    assert_eq!(s.task(a).unwrap().waiting_on(), None);
    assert_invariants(&s);
}

#[test]
fn test_spawn_rolls_back_when_queue_is_full() {
    let mut config = SchedulerConfig::default().with_capacity(4);
    config.queue_capacity = 1;
    let mut s = with_config(config);
    kernel_task(&mut s, "a");

    assert_eq!(
        s.spawn("b", KERNEL_ENTRY, 0, Priority::Normal, TaskFlags::KERNEL_MODE),
        Err(SchedulerError::Queue(QueueError::Full))
    );
    assert_eq!(s.tasks().iter_active().count(), 1);
}

#[test]
fn test_switch_installs_address_space_and_entry_stack() {
    let mut s = scheduler();
    let u = user_task(&mut s, "u");
    let k = kernel_task(&mut s, "k");

    let plan = s.start().unwrap();
    assert_eq!(plan.kind, Handoff::EnterUser);
    let task = s.task(u).unwrap();
    let space = task.mode().address_space().unwrap();
    let root = s.platform().resolve_root(space).unwrap();
    assert_eq!(s.platform().last_root(), Some(root));
    assert_eq!(task.context().cr3, root.as_u64());
    assert_eq!(
        s.platform().last_entry_stack(),
        task.mode().entry_stack_top()
    );

    let plan = s.yield_now().unwrap();
    assert_eq!(target(&s, &plan), Some(k));
    assert_eq!(plan.kind, Handoff::Jump);
    assert_eq!(s.platform().last_root().unwrap().as_u64(), KERNEL_ROOT);
    assert_eq!(
        s.platform().last_entry_stack().unwrap().as_u64(),
        DEFAULT_ENTRY_STACK
    );
}

#[test]
fn test_trap_snapshot_is_not_overwritten() {
    let mut s = scheduler();
    let u = user_task(&mut s, "u");
    let k = kernel_task(&mut s, "k");
    s.start().unwrap();

    let mut trap = user_trap(0x40_1234);
    trap.gprs.rbx = 77;
    s.capture_trap(&trap).unwrap();
    assert!(s.task(u).unwrap().context_from_trap());
    s.set_current_return(0);

    let plan = s.yield_now().unwrap();
    assert_eq!(target(&s, &plan), Some(k));
    assert!(plan.save.is_none());

    let task = s.task(u).unwrap();
    assert!(!task.context_from_trap());
    assert_eq!(task.context().rip, 0x40_1234);
    assert_eq!(task.context().rbx, 77);
    assert!(task.context().resumes_in_user_mode());

    // Back to the user task: resumed with an iretq from the snapshot.
    let plan = s.yield_now().unwrap();
    assert_eq!(target(&s, &plan), Some(u));
    assert_eq!(plan.kind, Handoff::EnterUser);
}

#[test]
fn test_capture_trap_needs_user_task() {
    let mut s = scheduler();
    kernel_task(&mut s, "k");
    assert_eq!(
        s.capture_trap(&user_trap(0x1000)),
        Err(SchedulerError::NoCurrentTask)
    );
    s.start().unwrap();
    assert_eq!(
        s.capture_trap(&user_trap(0x1000)),
        Err(SchedulerError::NotUserTask)
    );
}

#[test]
fn test_idle_runs_when_nothing_is_ready() {
    let mut s = scheduler();
    let idle = s.create_idle_task(KERNEL_ENTRY).unwrap();
    let a = kernel_task(&mut s, "a");
    assert_eq!(state(&s, idle), TaskState::Blocked);
    s.start().unwrap();

    let plan = s.block_current().unwrap().unwrap();
    assert_eq!(target(&s, &plan), Some(idle));
    assert_eq!(state(&s, idle), TaskState::Running);
    assert_eq!(s.stats().idle_activations, 1);
    assert_invariants(&s);

    // A task becoming ready makes the idle task give way at the next tick.
    s.unblock(a).unwrap();
    s.timer_tick();
    assert!(s.is_reschedule_pending());
    let plan = s.handle_post_irq().unwrap();
    assert_eq!(target(&s, &plan), Some(a));
    assert_eq!(state(&s, idle), TaskState::Blocked);
    assert!(!s.task(idle).unwrap().is_queued());
    assert_invariants(&s);
}

#[test]
fn test_idle_task_cannot_be_queued_or_blocked() {
    let mut s = scheduler();
    let idle = s.create_idle_task(KERNEL_ENTRY).unwrap();
    assert_eq!(s.admit(idle), Err(SchedulerError::IsIdle));
    assert_eq!(s.unblock(idle), Err(SchedulerError::IsIdle));
    assert_eq!(
        s.create_idle_task(KERNEL_ENTRY),
        Err(SchedulerError::IdleExists)
    );

    s.start().unwrap();
    assert_eq!(s.current_task(), Some(idle));
    assert_eq!(s.block_current(), Err(SchedulerError::IsIdle));
}

#[test]
fn test_idle_poll() {
    let mut s = scheduler();
    s.create_idle_task(KERNEL_ENTRY).unwrap();
    s.start().unwrap();

    for _ in 0..IDLE_POLL_INTERVAL - 1 {
        assert_eq!(s.idle_poll(), IdleAction::Halt);
    }
    assert_eq!(s.idle_poll(), IdleAction::Exit);
    assert!(!s.is_enabled());
}

#[test]
fn test_idle_poll_yields_for_work() {
    let mut s = scheduler();
    s.create_idle_task(KERNEL_ENTRY).unwrap();
    s.start().unwrap();

    s.set_idle_wakeup(Some(pending_input));
    assert_eq!(s.idle_poll(), IdleAction::Yield);

    s.set_idle_wakeup(None);
    kernel_task(&mut s, "a");
    assert_eq!(s.idle_poll(), IdleAction::Yield);
}

#[test]
fn test_idle_poll_yields_periodically_with_blocked_tasks() {
    let mut s = scheduler();
    s.create_idle_task(KERNEL_ENTRY).unwrap();
    kernel_task(&mut s, "a");
    s.start().unwrap();
    s.block_current().unwrap();

    for _ in 0..IDLE_POLL_INTERVAL - 1 {
        assert_eq!(s.idle_poll(), IdleAction::Halt);
    }
    assert_eq!(s.idle_poll(), IdleAction::Yield);
    assert!(s.is_enabled());
}

#[test]
fn test_last_exit_returns_to_start_context() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    s.start().unwrap();

    let plan = s.exit_current(0).unwrap().unwrap();
    assert!(core::ptr::eq(plan.load.as_ptr(), &*s.exit_context));
    assert!(plan.save.is_none());
    assert_eq!(plan.kind, Handoff::Jump);
    assert!(!s.is_enabled());
    assert_eq!(s.current_task(), None);

    s.reap();
    assert!(s.task(a).is_none());
}

#[test]
fn test_idle_exit_returns_to_start() {
    let mut s = scheduler();
    assert_eq!(s.return_to_start(), None);

    let idle = s.create_idle_task(KERNEL_ENTRY).unwrap();
    s.start().unwrap();
    for _ in 0..IDLE_POLL_INTERVAL {
        s.idle_poll();
    }
    assert!(!s.is_enabled());

    let plan = s.return_to_start().unwrap();
    assert!(core::ptr::eq(plan.load.as_ptr(), &*s.exit_context));
    assert!(plan.save.is_some());
    assert_eq!(state(&s, idle), TaskState::Blocked);
    assert_eq!(s.current_task(), None);
    assert_invariants(&s);
}

#[test]
#[should_panic(expected = "switch gate")]
fn test_fatal_gate_stops_the_system() {
    let mut s = scheduler();
    kernel_task(&mut s, "a");
    s.set_switch_gate(Some(fatal_gate));
    let _ = s.start();
}

#[test]
fn test_shutdown() {
    let mut s = scheduler();
    s.create_idle_task(KERNEL_ENTRY).unwrap();
    let a = kernel_task(&mut s, "a");
    let b = kernel_task(&mut s, "b");
    let c = user_task(&mut s, "c");
    s.start().unwrap();

    s.shutdown();
    assert!(!s.is_enabled());
    assert_eq!(s.current_task(), None);
    assert_eq!(s.idle_task(), None);
    assert!(s.ready_tasks().is_empty());
    assert!(s.task(b).is_none());
    assert!(s.task(c).is_none());
    assert_eq!(state(&s, a), TaskState::Blocked);
    assert_eq!(s.platform().live_spaces(), 0);
    assert_invariants(&s);
}

#[test]
fn test_restart_after_shutdown_runs_one_task() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    kernel_task(&mut s, "b");
    s.start().unwrap();
    s.shutdown();

    let c = kernel_task(&mut s, "c");
    let plan = s.start().unwrap();
    assert_eq!(target(&s, &plan), Some(c));
    assert_eq!(state(&s, a), TaskState::Blocked);
    assert_invariants(&s);
}

#[test]
fn test_runtime_accounting() {
    let mut s = scheduler();
    let a = kernel_task(&mut s, "a");
    kernel_task(&mut s, "b");

    s.platform_mut().now = 100;
    s.start().unwrap();
    s.platform_mut().now = 130;
    s.yield_now().unwrap();

    let accounting = s.task(a).unwrap().accounting();
    assert_eq!(accounting.runtime, 30);
    assert_eq!(accounting.yields, 1);
    assert_eq!(accounting.switches, 1);
    assert_eq!(accounting.last_scheduled, 100);
}
