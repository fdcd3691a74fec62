use std::time::Duration;

use netroom_tick::{TickClock, TickConfig, TickPolicy};
use tokio::time;

fn config(rate: u32, policy: TickPolicy) -> TickConfig {
    TickConfig {
        tick_rate_hz: rate,
        policy,
        initial_jitter_us: 0,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_ticks_at_fixed_rate() {
    let mut clock = TickClock::new(config(20, TickPolicy::Skip));
    assert_eq!(clock.tick_duration(), Duration::from_millis(50));

    for expected in 1..=5u64 {
        let info = clock.next_tick().await;
        clock.record_tick_end();
        assert_eq!(info.tick, expected);
        assert_eq!(info.dt, Duration::from_millis(50));
        assert!(!info.overrun);
        assert_eq!(info.ticks_skipped, 0);
    }
    assert_eq!(clock.tick_count(), 5);
    assert_eq!(clock.metrics().total_ticks, 5);
}

#[tokio::test(start_paused = true)]
async fn test_server_time_advances_with_ticks() {
    let mut clock = TickClock::new(config(10, TickPolicy::Skip));
    let first = clock.next_tick().await;
    let second = clock.next_tick().await;
    assert_eq!(first.server_time, Duration::from_millis(100));
    assert_eq!(second.server_time, Duration::from_millis(200));
    assert!((second.server_seconds() - 0.2).abs() < 1e-9);

    time::advance(Duration::from_millis(30)).await;
    assert_eq!(clock.server_time(), Duration::from_millis(230));
}

#[tokio::test(start_paused = true)]
async fn test_zero_rate_falls_back_to_default() {
    let clock = TickClock::new(config(0, TickPolicy::Skip));
    assert_eq!(clock.tick_rate_hz(), TickConfig::DEFAULT_TICK_RATE_HZ);
}

// ---------------------------------------------------------------------------
// Overrun policies
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_skip_policy_reports_skipped_ticks() {
    let mut clock = TickClock::new(config(10, TickPolicy::Skip));
    clock.next_tick().await;

    // Stall for three and a half steps past the next deadline.
    time::advance(Duration::from_millis(450)).await;
    let info = clock.next_tick().await;
    assert!(info.overrun);
    assert_eq!(info.ticks_skipped, 3);
    assert_eq!(clock.metrics().total_skipped, 3);
    assert_eq!(clock.metrics().total_overruns, 1);

    // Next tick is scheduled a full step after the late one.
    let before = clock.server_time();
    let next = clock.next_tick().await;
    assert_eq!(next.server_time - before, Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_catch_up_policy_fires_missed_ticks_immediately() {
    let mut clock = TickClock::new(config(10, TickPolicy::CatchUp { max_catchup: 5 }));
    clock.next_tick().await;

    time::advance(Duration::from_millis(350)).await;
    let late = clock.next_tick().await;
    assert!(late.overrun);
    assert_eq!(late.ticks_skipped, 0);

    // The following deadlines are already in the past.
    let start = clock.server_time();
    clock.next_tick().await;
    clock.next_tick().await;
    assert_eq!(clock.server_time(), start);
}

#[tokio::test(start_paused = true)]
async fn test_catch_up_beyond_cap_skips_the_rest() {
    let mut clock = TickClock::new(config(10, TickPolicy::CatchUp { max_catchup: 1 }));
    clock.next_tick().await;

    time::advance(Duration::from_millis(550)).await;
    let info = clock.next_tick().await;
    // Four steps behind, one of them caught up.
    assert_eq!(info.ticks_skipped, 3);
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_keeps_cadence() {
    let mut clock = TickClock::new(config(10, TickPolicy::Drop));
    clock.next_tick().await;

    time::advance(Duration::from_millis(150)).await;
    let late = clock.next_tick().await;
    assert!(late.overrun);
    assert_eq!(late.ticks_skipped, 0);

    // Still on the 100ms grid.
    let next = clock.next_tick().await;
    assert_eq!(next.server_time, Duration::from_millis(300));
}

// ---------------------------------------------------------------------------
// Integration with select!
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_clock_inside_select_loop() {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    let mut clock = TickClock::new(config(20, TickPolicy::Skip));

    tokio::spawn(async move {
        time::sleep(Duration::from_millis(175)).await;
        let _ = tx.send(()).await;
    });

    let mut ticks = 0;
    loop {
        tokio::select! {
            Some(()) = rx.recv() => break,
            _ = clock.next_tick() => {
                ticks += 1;
                clock.record_tick_end();
            }
        }
    }
    assert_eq!(ticks, 3);
    assert_eq!(clock.tick_count(), 3);
}
