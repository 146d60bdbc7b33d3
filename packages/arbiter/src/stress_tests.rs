//! Stress tests that try to break the arbitration loop.
//!
//! The first half drives [`Arbiter`] directly with random operation
//! sequences and checks the invariants after every step. The second half
//! runs the real engine task against a recording transport with the tokio
//! clock paused.

#[cfg(test)]
mod stress_tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::arbiter::{Arbiter, Step};
    use crate::capability::{Channel, ChannelSet, DeviceModel};
    use crate::composer::{DeviceMode, LedCommand, MotorCommand};
    use crate::config::EngineConfig;
    use crate::demand::{
        Demand, DemandHandle, DemandKind, InputDevice, LedPattern, MatrixContent, MotionVector, Payload,
        Rgb, ToolPayload,
    };
    use crate::engine::Engine;
    use crate::error::ArbiterError;
    use crate::event::{LifecycleEvent, Outcome};
    use crate::feedback::{Feedback, InputReading, SensorEvent};
    use crate::registry::CancelOutcome;
    use crate::resolver::{self, Decision, QueueReason, RejectReason};
    use crate::state::LoopState;
    use crate::testing::{recv_until, RecordingTransport};

    // ==========================================================================
    // Random operation sequences
    // ==========================================================================

    const SEEDS: u64 = 48;
    const OPERATIONS: usize = 400;

    fn random_demand(rng: &mut fastrand::Rng) -> Demand {
        let demand = match rng.u8(0..6) {
            0 => Demand::expression(LedPattern::pulse(Rgb::BLUE)),
            1 => Demand::new(
                DemandKind::Expression,
                Payload::Matrix(MatrixContent::Text {
                    text: "hi".to_string(),
                    color: Rgb::WHITE,
                }),
            ),
            2 => Demand::motion(MotionVector::spin(rng.u8(..))),
            3 => Demand::input(match rng.u8(0..3) {
                0 => InputDevice::Knob {
                    min: 0.0,
                    max: 10.0,
                    step: 1.0,
                },
                1 => InputDevice::Joystick,
                _ => InputDevice::Button,
            }),
            4 => Demand::new(
                DemandKind::Reaction,
                Payload::Tool(ToolPayload {
                    tool: "confetti".to_string(),
                    channels: ChannelSet::only(Channel::Led).with(Channel::Matrix),
                    data: serde_json::Value::Null,
                }),
            ),
            _ => Demand::status(LedPattern::solid(Rgb::GREEN)),
        };

        let demand = demand.with_priority(rng.i32(0..6));
        let demand = if rng.bool() {
            demand.continuous()
        } else {
            demand.for_duration(Duration::from_millis(rng.u64(100..3_000)))
        };
        let demand = match rng.u8(0..4) {
            0 => demand.exclusive(),
            1 => demand.composable(),
            _ => demand,
        };
        if rng.u8(0..10) == 0 {
            demand.override_safety()
        } else {
            demand
        }
    }

    /// Checks every step of one random run.
    struct Observer {
        submitted: Vec<DemandHandle>,
        terminals: HashMap<DemandHandle, usize>,
        finished: HashSet<DemandHandle>,
        last_revision: u64,
    }

    impl Observer {
        fn new() -> Self {
            Self {
                submitted: Vec::new(),
                terminals: HashMap::new(),
                finished: HashSet::new(),
                last_revision: 0,
            }
        }

        fn observe(&mut self, arbiter: &Arbiter, step: Step, seed: u64) {
            for event in &step.events {
                if !event.is_terminal() {
                    continue;
                }
                let Some(handle) = event.handle() else {
                    continue;
                };
                let count = self.terminals.entry(handle).or_default();
                *count += 1;
                assert_eq!(*count, 1, "seed {}: second terminal event {:?}", seed, event);
                self.finished.insert(handle);
            }

            if let Some(command) = step.command {
                assert!(
                    command.revision > self.last_revision,
                    "seed {}: revision went from {} to {}",
                    seed,
                    self.last_revision,
                    command.revision
                );
                self.last_revision = command.revision;
            }

            assert_eq!(arbiter.active().check_invariants(), Ok(()), "seed {}", seed);

            for handle in &self.finished {
                assert!(!arbiter.active().contains(handle), "seed {}: finished demand active", seed);
                assert!(!arbiter.queue().contains(handle), "seed {}: finished demand queued", seed);
            }

            // The queue is settled: nothing in it could run right now.
            for entry in arbiter.queue().iter() {
                let decision = resolver::resolve_queued(arbiter.active(), arbiter.device(), &entry.demand);
                let guard = EngineConfig::default().power_guard();
                let guarded = guard.guard(entry.handle, decision, arbiter.device(), &entry.demand);
                assert!(
                    matches!(guarded.decision, Decision::Queue(_)),
                    "seed {}: queued demand {} is admissible: {:?}",
                    seed,
                    entry.handle,
                    guarded.decision
                );
            }
        }
    }

    fn random_run(seed: u64) {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut arbiter = Arbiter::new(&EngineConfig::default());
        let mut observer = Observer::new();
        let mut now = Instant::now();

        for _ in 0..OPERATIONS {
            let step = match rng.u8(0..100) {
                0..=39 => {
                    let handle = DemandHandle::new();
                    observer.submitted.push(handle);
                    arbiter.submit(handle, random_demand(&mut rng), now).unwrap()
                }
                40..=54 if !observer.submitted.is_empty() => {
                    let handle = observer.submitted[rng.usize(..observer.submitted.len())];
                    let (outcome, step) = arbiter.cancel(handle, now).unwrap();
                    if observer.finished.contains(&handle) {
                        assert_eq!(outcome, CancelOutcome::NotFound, "seed {}", seed);
                    }
                    step
                }
                55..=69 => {
                    now += Duration::from_millis(rng.u64(0..3_000));
                    arbiter.expire(now).unwrap()
                }
                70..=79 => arbiter.feedback(Feedback::battery(rng.u8(0..=100)), now).unwrap(),
                80..=83 => arbiter.feedback(Feedback::Disconnected, now).unwrap(),
                84..=88 => arbiter.feedback(Feedback::Connected { model: None }, now).unwrap(),
                89..=90 => {
                    let model = if rng.bool() { DeviceModel::Mini } else { DeviceModel::Bolt };
                    arbiter.feedback(Feedback::Capabilities { model }, now).unwrap()
                }
                91..=92 => arbiter
                    .register_tool("confetti".to_string(), ChannelSet::only(Channel::Led).with(Channel::Matrix), now)
                    .unwrap(),
                _ => {
                    let sample = match rng.u8(0..4) {
                        0 => SensorEvent::Rotation {
                            degrees: rng.f32() * 720.0 - 360.0,
                        },
                        1 => SensorEvent::Tilt {
                            pitch: rng.f32() * 180.0 - 90.0,
                            roll: rng.f32() * 180.0 - 90.0,
                        },
                        2 => SensorEvent::Tap,
                        _ => SensorEvent::Collision {
                            magnitude: rng.f32() * 5.0,
                        },
                    };
                    arbiter.feedback(Feedback::Sensor(sample), now).unwrap()
                }
            };
            observer.observe(&arbiter, step, seed);
        }

        // Losing the device ends everything still pending.
        let step = arbiter.feedback(Feedback::Disconnected, now).unwrap();
        observer.observe(&arbiter, step, seed);
        assert!(arbiter.active().is_empty());
        assert!(arbiter.queue().is_empty());
        assert!(arbiter.streams().is_empty());
        for handle in &observer.submitted {
            assert_eq!(
                observer.terminals.get(handle),
                Some(&1),
                "seed {}: demand {} has no terminal event",
                seed,
                handle
            );
        }
    }

    #[test]
    fn test_random_sequences_keep_invariants() {
        for seed in 0..SEEDS {
            random_run(seed);
        }
    }

    #[test]
    fn test_many_equal_priority_inputs_drain_in_order() {
        let mut arbiter = Arbiter::new(&EngineConfig::default());
        let now = Instant::now();
        let handles: Vec<DemandHandle> = (0..64)
            .map(|_| {
                let handle = DemandHandle::new();
                arbiter
                    .submit(handle, Demand::input(InputDevice::Joystick).with_priority(2), now)
                    .unwrap();
                handle
            })
            .collect();

        assert_eq!(arbiter.queue().len(), 63);
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(arbiter.active().handles(), vec![*handle], "position {}", i);
            let (outcome, _) = arbiter.cancel(*handle, now).unwrap();
            assert_eq!(outcome, CancelOutcome::Ok);
        }
        assert!(arbiter.active().is_empty());
        assert_eq!(arbiter.state(), LoopState::Idle);
    }

    // ==========================================================================
    // Engine
    // ==========================================================================

    fn knob() -> Demand {
        Demand::input(InputDevice::Knob {
            min: 0.0,
            max: 100.0,
            step: 1.0,
        })
        .with_priority(5)
    }

    fn glow() -> Demand {
        Demand::expression(LedPattern::pulse(Rgb::BLUE))
            .with_priority(1)
            .continuous()
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_hybrid_scenario() {
        let transport = Arc::new(RecordingTransport::new());
        let (engine, task) = Engine::builder(transport.clone()).build().unwrap().start();
        let mut events = engine.subscribe();

        let mut knob = engine.submit_tracked(knob()).unwrap();
        let knob_handle = knob.handle();
        let glow = engine.submit(glow()).unwrap();
        recv_until(&mut events, |e| matches!(e, LifecycleEvent::Admitted { handle, .. } if *handle == glow)).await;
        transport.wait_for_command(|c| c.mode == DeviceMode::Hybrid).await;

        let alert = engine
            .submit(Demand::motion(MotionVector::spin(200)).with_priority(9))
            .unwrap();
        let command = transport
            .wait_for_command(|c| matches!(c.motor, MotorCommand::Drive { owner, .. } if owner == alert))
            .await;
        assert!(matches!(command.led, LedCommand::Show { owner, .. } if owner == glow));

        // The alert runs out on the paused clock and the knob returns.
        let mut seen = Vec::new();
        while let Some(envelope) = knob.next().await {
            let readmitted = seen.len() > 2 && matches!(envelope.event, LifecycleEvent::Admitted { .. });
            seen.push(envelope.event);
            if readmitted {
                break;
            }
        }
        let names: Vec<&str> = seen.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["submitted", "admitted", "preempted", "queued", "admitted"]);
        transport.wait_for_command(|c| c.mode == DeviceMode::Hybrid).await;

        assert_eq!(engine.cancel(knob_handle).await.unwrap(), CancelOutcome::Ok);
        assert_eq!(
            knob.outcome().await.unwrap(),
            LifecycleEvent::Cancelled { handle: knob_handle }
        );

        engine.shutdown();
        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_one_shot_outcome() {
        let transport = Arc::new(RecordingTransport::new());
        let (engine, _task) = Engine::builder(transport.clone()).build().unwrap().start();

        let ticket = engine
            .submit_tracked(Demand::expression(LedPattern::solid(Rgb::GREEN)).for_duration(Duration::from_secs(3)))
            .unwrap();
        let handle = ticket.handle();
        let started = Instant::now();

        assert_eq!(
            ticket.outcome().await.unwrap(),
            LifecycleEvent::Completed {
                handle,
                outcome: Outcome::Finished
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(3));
        transport.wait_for_command(|c| c.mode == DeviceMode::Idle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_rejects_unsupported_payload() {
        let config = EngineConfig {
            device_model: DeviceModel::Mini,
            ..EngineConfig::default()
        };
        let transport = RecordingTransport::new();
        let (engine, _task) = Engine::builder(transport).with_config(config).build().unwrap().start();

        let ticket = engine
            .submit_tracked(Demand::new(
                DemandKind::Expression,
                Payload::Matrix(MatrixContent::Glyph {
                    name: "heart".to_string(),
                    color: Rgb::RED,
                }),
            ))
            .unwrap();

        assert!(matches!(
            ticket.outcome().await.unwrap(),
            LifecycleEvent::Rejected {
                reason: RejectReason::UnsupportedCapability { .. },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_cancel_frees_capacity_before_reply() {
        let transport = RecordingTransport::new();
        let (engine, _task) = Engine::builder(transport).build().unwrap().start();

        let first = engine.submit(knob()).unwrap();
        let second = engine.submit(knob()).unwrap();
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(snapshot.active.len(), 1);
        assert_eq!(snapshot.queued.len(), 1);
        assert!(matches!(
            snapshot.queued[0].reason,
            QueueReason::ExclusiveHeld { holder, .. } if holder == first
        ));

        assert_eq!(engine.cancel(first).await.unwrap(), CancelOutcome::Ok);
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(snapshot.active.len(), 1);
        assert_eq!(snapshot.active[0].handle, second);
        assert!(snapshot.queued.is_empty());

        assert_eq!(engine.cancel(first).await.unwrap(), CancelOutcome::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_publishes_capabilities() {
        let transport = RecordingTransport::new();
        let (engine, _task) = Engine::builder(transport).build().unwrap().start();
        let mut capabilities = engine.watch_capabilities();
        assert_eq!(engine.capabilities().state, LoopState::Idle);

        engine.feedback(Feedback::battery(5)).unwrap();
        while engine.capabilities().battery != 5 {
            capabilities.changed().await.unwrap();
        }
        let report = engine.capabilities();
        assert_eq!(report.state, LoopState::Degraded);
        assert!(!report.usable.contains(Channel::Motor));
        assert!(report.channels.contains(Channel::Motor));

        engine
            .register_tool("confetti", ChannelSet::only(Channel::Led).with(Channel::Matrix))
            .unwrap();
        while !engine.capabilities().tools.contains(&"confetti".to_string()) {
            capabilities.changed().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_routes_sensor_input() {
        let transport = RecordingTransport::new();
        let (engine, _task) = Engine::builder(transport).build().unwrap().start();

        let mut ticket = engine.submit_tracked(Demand::input(InputDevice::Button)).unwrap();
        engine.feedback(Feedback::Sensor(SensorEvent::Tap)).unwrap();

        loop {
            let envelope = ticket.next().await.unwrap();
            if let LifecycleEvent::Input { reading, .. } = envelope.event {
                assert_eq!(reading, InputReading::Button { pressed: true });
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_reports_and_retries_failed_dispatch() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_next(1);
        let (engine, _task) = Engine::builder(transport.clone()).build().unwrap().start();
        let mut events = engine.subscribe();

        engine.submit(glow()).unwrap();
        let seen = recv_until(&mut events, |e| matches!(e, LifecycleEvent::DispatchFailed { .. })).await;
        let Some(LifecycleEvent::DispatchFailed { error, .. }) = seen.last() else {
            panic!("expected dispatch failure, saw {:?}", seen);
        };
        assert!(error.contains("injected failure"));

        transport.wait_for_command(|c| c.mode == DeviceMode::Expression).await;
        assert_eq!(transport.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_disconnect_ends_every_demand() {
        let transport = RecordingTransport::new();
        let (engine, _task) = Engine::builder(transport).build().unwrap().start();

        let active = engine.submit_tracked(knob()).unwrap();
        let queued = engine.submit_tracked(knob()).unwrap();
        engine.feedback(Feedback::Disconnected).unwrap();

        assert!(matches!(
            active.outcome().await.unwrap(),
            LifecycleEvent::Completed {
                outcome: Outcome::DeviceUnavailable,
                ..
            }
        ));
        assert!(matches!(
            queued.outcome().await.unwrap(),
            LifecycleEvent::Rejected {
                reason: RejectReason::DeviceUnavailable,
                ..
            }
        ));
        assert_eq!(engine.capabilities().state, LoopState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_stops_on_shutdown() {
        let transport = RecordingTransport::new();
        let (engine, task) = Engine::builder(transport).build().unwrap().start();
        assert!(engine.is_running());

        engine.shutdown();
        assert_eq!(task.await.unwrap(), Ok(()));
        assert!(!engine.is_running());
        assert_eq!(engine.submit(glow()), Err(ArbiterError::EngineStopped));
        assert_eq!(engine.snapshot().await.unwrap_err(), ArbiterError::EngineStopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_shutdown_cancels_active_and_queued() {
        let transport = Arc::new(RecordingTransport::new());
        let (engine, task) = Engine::builder(transport.clone()).build().unwrap().start();

        let mut owner = engine
            .submit_tracked(Demand::input(InputDevice::Joystick).with_priority(5))
            .unwrap();
        let waiting = engine
            .submit_tracked(Demand::input(InputDevice::Button).with_priority(3))
            .unwrap();
        let owner_handle = owner.handle();
        let waiting_handle = waiting.handle();
        while !matches!(
            owner.next().await.map(|e| e.event),
            Some(LifecycleEvent::Admitted { .. })
        ) {}
        transport.wait_for_command(|c| c.mode == DeviceMode::InputDevice).await;

        engine.shutdown();
        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(
            owner.outcome().await.unwrap(),
            LifecycleEvent::Cancelled {
                handle: owner_handle
            }
        );
        assert_eq!(
            waiting.outcome().await.unwrap(),
            LifecycleEvent::Cancelled {
                handle: waiting_handle
            }
        );
        assert_eq!(transport.last().map(|c| c.mode), Some(DeviceMode::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_stops_when_handles_drop() {
        let transport = RecordingTransport::new();
        let (engine, task) = Engine::builder(transport).build().unwrap().start();
        drop(engine);
        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[test]
    fn test_invalid_config_fails_build() {
        let config = EngineConfig {
            critical_battery: 50,
            low_battery: 20,
            ..EngineConfig::default()
        };
        let result = Engine::builder(RecordingTransport::new()).with_config(config).build();
        assert!(matches!(result, Err(ArbiterError::InvalidConfig(_))));
    }
}
