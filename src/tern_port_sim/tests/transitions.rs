//! Transition-level properties of the fast-interrupt protocol, driven
//! through the hosted simulator.
use quickcheck_macros::quickcheck;
use tern_kernel::RelinquishCause;
use tern_port_arc::{
    arc::Status32,
    firq::frame::{IrqFrame, MinFrame, IRQ_FRAME_WORDS},
};
use tern_port_sim::{Gprs, SimCpu, Transition};

const WORD: usize = core::mem::size_of::<usize>();

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn outermost_round_trip_restores_the_interrupted_context() {
    init_logger();
    let mut cpu = SimCpu::new();
    let a = cpu.spawn_cooperative(1, 0, 0);
    cpu.make_running(a, 1, 0x1000);
    cpu.lp = [3, 0x30, 0x40];

    let thread_sp = cpu.sp;
    let thread_bank = cpu.banks[0].clone();
    let thread_status = cpu.status32;
    let irq_stack_top = cpu.irq_stack_top();

    let t = cpu.firq_raise(|cpu, interrupted_sp| {
        assert_eq!(interrupted_sp as usize, thread_sp);
        // The handler runs on the interrupt stack, in the interrupt bank.
        assert_eq!(cpu.sp, irq_stack_top);
        assert_eq!(cpu.status32.bank(), 1);
        // Clobber what the service routine legitimately may: caller-saved
        // registers of its bank and the loop registers.
        cpu.banks[1].caller = [0xdead; 13];
        cpu.banks[1].blink = 0xdead;
        cpu.lp = [7, 0x70, 0x80];
    });

    assert_eq!(t, Transition::OutermostReturn);
    assert_eq!(cpu.sp, thread_sp);
    assert_eq!(cpu.pc, 0x1000);
    assert_eq!(cpu.status32, thread_status);
    assert_eq!(cpu.banks[0], thread_bank);
    assert_eq!(cpu.lp, [3, 0x30, 0x40]);
    assert_eq!(unsafe { cpu.state.nested() }, 0);
}

#[test]
fn nested_entry_neither_switches_stacks_nor_touches_the_thread_bank() {
    init_logger();
    let mut cpu = SimCpu::new();
    let a = cpu.spawn_cooperative(1, 0, 0);
    cpu.make_running(a, 1, 0x1000);
    let thread_sp = cpu.sp;

    cpu.rirq_raise(3, |cpu| {
        let handler_sp = cpu.sp;
        let thread_bank = cpu.banks[0].clone();

        let t = cpu.firq_raise(|cpu, interrupted_sp| {
            // The dispatch argument names the interrupted *thread*, not the
            // preempted handler; the carry is read from the other bank.
            assert_eq!(interrupted_sp as usize, thread_sp);
            assert!(cpu.on_irq_stack(cpu.sp));
        });

        assert_eq!(t, Transition::NestedReturn);
        // The nested entry never moved the stack pointer, and the bank-swap
        // excursion left the thread bank exactly as it found it.
        assert_eq!(cpu.sp, handler_sp);
        assert_eq!(cpu.banks[0], thread_bank);
    });

    assert_eq!(cpu.sp, thread_sp);
    assert_eq!(unsafe { cpu.state.nested() }, 0);
}

fn nest_and_fire(cpu: &mut SimCpu, prios: &[u32], thread_sp: usize) {
    match prios.split_first() {
        Some((&prio, rest)) => cpu.rirq_raise(prio, |cpu| nest_and_fire(cpu, rest, thread_sp)),
        None => {
            let depth_before = unsafe { cpu.state.nested() };
            let t = cpu.firq_raise(|_, interrupted_sp| {
                assert_eq!(interrupted_sp as usize, thread_sp);
            });
            if depth_before == 0 {
                assert_eq!(t, Transition::OutermostReturn);
            } else {
                assert_eq!(t, Transition::NestedReturn);
            }
        }
    }
}

#[quickcheck]
fn nesting_stays_balanced_at_any_depth(depth: u8) -> bool {
    init_logger();
    let depth = usize::from(depth) % 15;
    let mut cpu = SimCpu::new();
    let a = cpu.spawn_cooperative(1, 0, 0);
    cpu.make_running(a, 1, 0x1000);
    let thread_sp = cpu.sp;

    let prios: Vec<u32> = (1..=depth as u32).collect();
    nest_and_fire(&mut cpu, &prios, thread_sp);

    cpu.sp == thread_sp && unsafe { cpu.state.nested() } == 0
}

#[test]
fn reschedule_waits_for_the_outermost_unwind() {
    init_logger();
    let mut cpu = SimCpu::new();
    let a = cpu.spawn_cooperative(1, 0, 0);
    let b = cpu.spawn_cooperative(2, 0x2000, Status32::IE.bits() as usize);
    cpu.make_running(a, 1, 0x1000);
    cpu.set_ready(Some(b));

    cpu.rirq_raise(5, |cpu| {
        // A higher-priority thread is ready, but this unwind still returns
        // into the preempted handler.
        let t = cpu.firq_raise(|_, _| {});
        assert_eq!(t, Transition::NestedReturn);
        assert_eq!(unsafe { cpu.state.current() }, cpu.thread_cb(0));
    });

    let t = cpu.firq_raise(|_, _| {});
    assert_eq!(t, Transition::Switched { from: a, to: b });
    assert_eq!(cpu.pc, 0x2000);
}

#[test]
fn switch_round_trip_preserves_both_threads_exactly() {
    init_logger();
    let mut cpu = SimCpu::new();
    let a = cpu.spawn_cooperative(1, 0, 0);
    let b = cpu.spawn_cooperative(2, 0x2000, Status32::IE.bits() as usize);
    cpu.make_running(a, 1, 0x1000);
    cpu.lp = [3, 0x30, 0x40];

    let a_sp = cpu.sp;
    let a_bank = cpu.banks[0].clone();
    let a_status = cpu.status32;

    // A -> B.
    cpu.set_ready(Some(b));
    let t = cpu.firq_raise(|_, _| {});
    assert_eq!(t, Transition::Switched { from: a, to: b });

    // B's cooperative frame: return words only, callee block from its
    // control block.
    assert_eq!(cpu.pc, 0x2000);
    assert_eq!(cpu.status32, Status32::IE);
    assert_eq!(cpu.banks[0].callee, Gprs::seeded(2).callee);
    assert_eq!(cpu.banks[0].gp, Gprs::seeded(2).gp);

    // A was left as a fast-interrupt preemptee: cause tag set, the full
    // frame parked on its stack.
    unsafe {
        let a_cb = cpu.thread_cb(a);
        assert_eq!((*a_cb).relinquish_cause(), RelinquishCause::FastIrq);
        let saved = *(*a_cb).callee_saved.get();
        assert_eq!(saved.r, a_bank.callee);
        assert_eq!(saved.sp, a_sp - IRQ_FRAME_WORDS * WORD);
    }

    // B -> A.
    cpu.set_ready(Some(a));
    let t = cpu.firq_raise(|_, _| {});
    assert_eq!(t, Transition::Switched { from: b, to: a });

    // Everything A had is back: both register groups, the loop registers,
    // the stack pointer, the resume point.
    assert_eq!(cpu.banks[0], a_bank);
    assert_eq!(cpu.lp, [3, 0x30, 0x40]);
    assert_eq!(cpu.sp, a_sp);
    assert_eq!(cpu.pc, 0x1000);
    assert_eq!(cpu.status32, a_status);
}

#[test]
fn interrupt_preemptee_resumes_from_its_full_frame() {
    init_logger();
    let mut cpu = SimCpu::new();
    let a = cpu.spawn_cooperative(1, 0, 0);

    let mut parked = IrqFrame {
        ret: MinFrame {
            status32: Status32::IE.bits() as usize,
            pc: 0x3000,
        },
        r: [0; 13],
        blink: 0xb11a,
        lp_count: 9,
        lp_start: 0x90,
        lp_end: 0xa0,
    };
    for (i, r) in parked.r.iter_mut().enumerate() {
        *r = 0x5000 + i;
    }
    let b = cpu.spawn_interrupted(2, RelinquishCause::RegularIrq, &parked);

    cpu.make_running(a, 1, 0x1000);
    cpu.set_ready(Some(b));
    let t = cpu.firq_raise(|_, _| {});
    assert_eq!(t, Transition::Switched { from: a, to: b });

    assert_eq!(cpu.pc, 0x3000);
    assert_eq!(cpu.banks[0].caller, parked.r);
    assert_eq!(cpu.banks[0].blink, 0xb11a);
    assert_eq!(cpu.banks[0].callee, Gprs::seeded(2).callee);
    assert_eq!(cpu.lp, [9, 0x90, 0xa0]);
    assert_eq!(cpu.status32, Status32::IE);
}
