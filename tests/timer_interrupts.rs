use std::sync::{Arc, Mutex};

use aero_timing_core::interrupts::{InterruptController, InterruptControllerConfig, NO_IRQ};
use aero_timing_core::route_compare_to_irq;
use aero_timing_core::time::ClockSource;
use aero_timing_core::timers::{ComparingTimer, ComparingTimerConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn timer(clock: &Arc<ClockSource>, name: &str, compare: u64) -> ComparingTimer {
    ComparingTimer::new(
        clock.clone(),
        name,
        ComparingTimerConfig {
            frequency: 1_000_000_000,
            limit: 1_000,
            compare,
            enabled: true,
            event_enabled: true,
            ..ComparingTimerConfig::default()
        },
    )
    .unwrap()
}

fn controller() -> Arc<Mutex<InterruptController>> {
    Arc::new(Mutex::new(InterruptController::new(
        InterruptControllerConfig {
            num_sources: 8,
            num_contexts: 1,
            default_priority: 1,
        },
    )))
}

#[test]
fn compare_match_raises_and_services_an_interrupt() {
    init_tracing();
    let clock = Arc::new(ClockSource::new());
    let plic = controller();
    let timer = timer(&clock, "mtimer", 100);
    route_compare_to_irq(&timer, plic.clone(), 3);
    {
        let mut plic = plic.lock().unwrap();
        plic.set_source_priority(3, 2);
        plic.enable_source(0, 3, true);
    }

    clock.advance(99);
    assert!(!plic.lock().unwrap().output_line(0));

    clock.advance(1);
    assert_eq!(timer.value(), 100);
    assert!(plic.lock().unwrap().output_line(0));

    let irq = plic.lock().unwrap().acknowledge(0);
    assert_eq!(irq, 3);
    assert!(!plic.lock().unwrap().output_line(0));

    // Pulsed source: nothing re-pends once the handler completes.
    plic.lock().unwrap().complete(0, irq);
    assert!(!plic.lock().unwrap().output_line(0));
    assert_eq!(plic.lock().unwrap().acknowledge(0), NO_IRQ);

    // Next match one period later.
    clock.advance(1_000);
    assert!(plic.lock().unwrap().output_line(0));
}

#[test]
fn higher_priority_timer_preempts_and_completion_unwinds_in_order() {
    init_tracing();
    let clock = Arc::new(ClockSource::new());
    let plic = controller();
    let slow = timer(&clock, "slow", 50);
    let fast = timer(&clock, "fast", 80);
    route_compare_to_irq(&slow, plic.clone(), 1);
    route_compare_to_irq(&fast, plic.clone(), 2);
    {
        let mut plic = plic.lock().unwrap();
        plic.set_source_priority(1, 2);
        plic.set_source_priority(2, 5);
        plic.enable_source(0, 1, true);
        plic.enable_source(0, 2, true);
    }

    clock.advance(50);
    assert_eq!(plic.lock().unwrap().acknowledge(0), 1);

    clock.advance(30);
    let mut plic = plic.lock().unwrap();
    assert!(plic.output_line(0));
    assert_eq!(plic.acknowledge(0), 2);

    plic.complete(0, 1);
    assert_eq!(
        plic.context(0).unwrap().active_interrupts().iter().collect::<Vec<_>>(),
        vec![1, 2]
    );

    plic.complete(0, 2);
    plic.complete(0, 1);
    assert!(plic.context(0).unwrap().active_interrupts().is_empty());
    assert!(!plic.output_line(0));
}

#[test]
fn disabled_compare_event_leaves_the_line_alone() {
    init_tracing();
    let clock = Arc::new(ClockSource::new());
    let plic = controller();
    let timer = timer(&clock, "quiet", 10);
    timer.set_event_enabled(false);
    route_compare_to_irq(&timer, plic.clone(), 4);
    plic.lock().unwrap().enable_source(0, 4, true);

    clock.advance(2_500);
    assert_eq!(timer.value(), 500);
    assert!(!plic.lock().unwrap().output_line(0));
}
