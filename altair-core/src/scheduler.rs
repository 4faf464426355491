//! Cooperative scheduler
//!
//! The main loop polls every live device's state machine once per cycle,
//! times each call, sleeps for the minimum requested delay (floored so the
//! loop never busy-spins), runs reduced-frequency housekeeping, and reaps
//! soft-deleted devices at the end of the cycle.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::device::now_epoch_secs;
use crate::logging;
use crate::server::ServerContext;

/// Smallest sleep between cycles, microseconds.
pub const MIN_LOOP_DELAY_US: u64 = 50;

/// Sleep used when no devices are registered, microseconds.
pub const DEFAULT_LOOP_DELAY_US: u64 = 500_000;

/// Watchdog checks and CPU-usage refresh run every this many cycles.
pub const HOUSEKEEPING_INTERVAL: u64 = 10;

/// Run the scheduler until the continue-flag clears, then destroy every
/// remaining device in registry order.
pub fn run(ctx: &Arc<ServerContext>) {
    info!("scheduler running");
    let mut cycle: u64 = 0;
    while ctx.keep_running.load(Ordering::SeqCst) {
        cycle += 1;
        let sleep = run_cycle(ctx, cycle);
        std::thread::sleep(sleep);
    }

    let names = ctx.registry.lock().expect("registry lock poisoned").clear();
    for name in names {
        info!("shutdown: destroyed {}", name);
    }
    info!("scheduler stopped");
}

/// One scheduler cycle. Returns the sleep before the next one:
/// `min(all requested delays)` clamped to [`MIN_LOOP_DELAY_US`], or
/// [`DEFAULT_LOOP_DELAY_US`] when no device is live.
pub fn run_cycle(ctx: &Arc<ServerContext>, cycle: u64) -> Duration {
    let housekeeping = cycle % HOUSEKEEPING_INTERVAL == 0;
    let now_secs = now_epoch_secs();
    let mut min_delay_us = DEFAULT_LOOP_DELAY_US;

    let mut registry = ctx.registry.lock().expect("registry lock poisoned");

    for device in registry.iter_live_mut() {
        let started = Instant::now();
        let requested = device.run_state_machine();
        let elapsed_nanos = started.elapsed().as_nanos() as u64;
        device.common_mut().cpu.accumulate(elapsed_nanos);

        min_delay_us = min_delay_us.min(requested);

        if housekeeping {
            let fired = device.common_mut().watchdog.check(now_secs);
            if fired {
                let name = device.common().name.clone();
                warn!("watchdog timeout on {}", name);
                device.watchdog_timeout();
                logging::event(&name, "watchdog", 0, "watchdog timeout");
            }
        }
    }

    // Soft-deleted devices go away here, never mid-dispatch
    for name in registry.reap() {
        info!("reaped device {}", name);
        logging::event(&name, "restart", 0, "device destroyed");
    }
    drop(registry);

    Duration::from_micros(min_delay_us.max(MIN_LOOP_DELAY_US))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AltairConfig;
    use crate::device::sim::{SimCamera, SimDome};
    use crate::device::watchdog::{Watchdog, WatchdogState};
    use crate::device::{
        AlpacaDevice, CommandContext, DeviceCommon, DEFAULT_STATE_MACHINE_DELAY_US,
    };
    use crate::protocol::commands::DeviceType;
    use crate::protocol::envelope::{EnvelopeResult, EnvelopeWriter};
    use crate::protocol::AlpacaResult;

    /// A device whose state machine always requests a fixed delay.
    struct FixedDelay {
        common: DeviceCommon,
        delay_us: u64,
    }

    impl FixedDelay {
        fn boxed(delay_us: u64) -> Box<dyn AlpacaDevice> {
            Box::new(Self {
                common: DeviceCommon::new(DeviceType::Switch, "fixed", "fixed-delay test device"),
                delay_us,
            })
        }
    }

    impl AlpacaDevice for FixedDelay {
        fn common(&self) -> &DeviceCommon {
            &self.common
        }
        fn common_mut(&mut self) -> &mut DeviceCommon {
            &mut self.common
        }
        fn process_command(&mut self, _ctx: &mut CommandContext<'_>) -> AlpacaResult {
            Ok(())
        }
        fn run_state_machine(&mut self) -> u64 {
            self.delay_us
        }
        fn device_state_content(&self, _json: &mut EnvelopeWriter) -> EnvelopeResult<bool> {
            Ok(false)
        }
    }

    fn ctx_with(devices: Vec<Box<dyn AlpacaDevice>>) -> Arc<ServerContext> {
        let ctx = Arc::new(ServerContext::new(AltairConfig::default()));
        {
            let mut registry = ctx.registry.lock().unwrap();
            for d in devices {
                registry.register(d).unwrap();
            }
        }
        ctx
    }

    #[test]
    fn test_sleep_is_default_max_with_no_devices() {
        let ctx = ctx_with(vec![]);
        let sleep = run_cycle(&ctx, 1);
        assert_eq!(sleep, Duration::from_micros(DEFAULT_LOOP_DELAY_US));
    }

    #[test]
    fn test_sleep_is_minimum_of_requested_delays() {
        let ctx = ctx_with(vec![
            FixedDelay::boxed(200_000),
            FixedDelay::boxed(70_000),
            FixedDelay::boxed(900_000),
        ]);
        let sleep = run_cycle(&ctx, 1);
        assert_eq!(sleep, Duration::from_micros(70_000));
    }

    #[test]
    fn test_sleep_clamped_to_floor() {
        let ctx = ctx_with(vec![FixedDelay::boxed(1)]);
        let sleep = run_cycle(&ctx, 1);
        assert_eq!(sleep, Duration::from_micros(MIN_LOOP_DELAY_US));
    }

    #[test]
    fn test_idle_simulator_requests_base_delay() {
        let ctx = ctx_with(vec![Box::new(SimCamera::new("cam"))]);
        let sleep = run_cycle(&ctx, 1);
        assert_eq!(sleep, Duration::from_micros(DEFAULT_STATE_MACHINE_DELAY_US.min(DEFAULT_LOOP_DELAY_US)));
    }

    #[test]
    fn test_flagged_device_reaped_at_end_of_cycle() {
        let ctx = ctx_with(vec![FixedDelay::boxed(1_000)]);
        {
            let mut registry = ctx.registry.lock().unwrap();
            registry
                .find_mut(DeviceType::Switch, 0)
                .unwrap()
                .common_mut()
                .delete_pending = true;
        }
        run_cycle(&ctx, 1);
        let registry = ctx.registry.lock().unwrap();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_watchdog_fires_only_on_housekeeping_cycles() {
        let ctx = ctx_with(vec![Box::new(SimDome::new("dome"))]);
        {
            let mut registry = ctx.registry.lock().unwrap();
            let device = registry.find_mut(DeviceType::Dome, 0).unwrap();
            // Armed with its window already elapsed
            let past = now_epoch_secs() - 120;
            device.common_mut().watchdog = Watchdog::armed(1, past);
        }

        // Cycle 1 is not a housekeeping cycle; the watchdog must not run
        run_cycle(&ctx, 1);
        {
            let registry = ctx.registry.lock().unwrap();
            let device = registry.iter_live().next().unwrap();
            assert_eq!(device.common().watchdog.state(), WatchdogState::Armed);
        }

        // Cycle 10 runs housekeeping and breaches
        run_cycle(&ctx, HOUSEKEEPING_INTERVAL);
        let registry = ctx.registry.lock().unwrap();
        let device = registry.iter_live().next().unwrap();
        assert_eq!(device.common().watchdog.state(), WatchdogState::Breached);
    }

    #[test]
    fn test_cpu_time_accumulates() {
        let ctx = ctx_with(vec![FixedDelay::boxed(1_000)]);
        run_cycle(&ctx, 1);
        let registry = ctx.registry.lock().unwrap();
        let device = registry.iter_live().next().unwrap();
        assert!(device.common().cpu.total_nanos > 0);
    }
}
