//! End-to-end coordination between telescope and camera clients on one bus.

use std::rc::Rc;
use std::time::Duration;

use chrono::Utc;
use executor::connection::QUE_SIZE;
use executor::{
    CameraExecClient, CameraState, Connection, ConnectionRegistry, DeviceCallback, DeviceValue,
    EventBus, TelescopeExecClient, TelescopeState,
};
use shared::{Command, DeviceKind, Equatorial, Event, EventKind, FixedTarget, ScriptStep, Target, TargetRef};

struct Rig {
    bus: EventBus,
    mount: Rc<Connection>,
    cam: Rc<Connection>,
    registry: Rc<ConnectionRegistry>,
}

impl Rig {
    fn new() -> Self {
        Self::with_processors(&[])
    }

    fn with_processors(depths: &[i64]) -> Self {
        let mut registry = ConnectionRegistry::new();
        let mount = registry.add("T0", DeviceKind::Telescope).unwrap();
        let cam = registry.add("C0", DeviceKind::Camera).unwrap();
        registry.add("W0", DeviceKind::FilterWheel).unwrap();
        for (i, depth) in depths.iter().enumerate() {
            registry
                .add(&format!("P{i}"), DeviceKind::ImageProcessor)
                .unwrap()
                .set_value(QUE_SIZE, DeviceValue::Integer(*depth));
        }
        mount.set_pointing(Equatorial::new(0.0, 0.0));
        let registry = Rc::new(registry);

        let mut bus = EventBus::new();
        bus.register(Box::new(TelescopeExecClient::new("T0", &registry).unwrap()))
            .unwrap();
        bus.register(Box::new(CameraExecClient::new("C0", registry.clone()).unwrap()))
            .unwrap();

        Self {
            bus,
            mount,
            cam,
            registry,
        }
    }

    fn camera(&self) -> &CameraExecClient {
        self.bus.client::<CameraExecClient>("C0").unwrap()
    }

    fn telescope(&self) -> &TelescopeExecClient {
        self.bus.client::<TelescopeExecClient>("T0").unwrap()
    }

    /// Run the camera's oldest queued exposure through to readout end.
    fn expose_one(&mut self) -> Vec<EventKind> {
        let command = self.cam.pop_command().expect("camera has a queued command");
        assert!(command.is_exposure(), "expected exposure, got {command}");

        let mut kinds = Vec::new();
        for cb in [
            DeviceCallback::ExposureStarted { start: Utc::now() },
            DeviceCallback::ExposureEnd,
            DeviceCallback::ReadoutEnd,
        ] {
            kinds.extend(self.bus.callback("C0", cb).unwrap().kinds());
        }
        kinds
    }
}

fn exposures(n: usize) -> Vec<ScriptStep> {
    (0..n)
        .map(|_| {
            ScriptStep::new(
                "C0",
                Command::Expose {
                    exposure: Duration::from_secs(60),
                    light: true,
                },
            )
        })
        .collect()
}

fn target_at(id: i32, pos: Equatorial, steps: Vec<ScriptStep>) -> Rc<FixedTarget> {
    Rc::new(FixedTarget::new(id, format!("tar{id}"), pos).with_script("C0", steps))
}

fn id_of(target: Option<&TargetRef>) -> Option<i32> {
    target.map(|t| t.id())
}

#[test]
fn single_exposure_on_target() {
    let mut rig = Rig::new();
    let target = target_at(1, Equatorial::new(0.0, 0.0), exposures(1));

    let dispatch = rig.bus.publish(Event::SetTarget(target));
    assert_eq!(
        dispatch.kinds(),
        vec![EventKind::SetTarget, EventKind::Observe, EventKind::ScriptStarted]
    );
    assert_eq!(rig.cam.queue_depth(), 1);

    let kinds = rig.expose_one();
    assert_eq!(kinds, vec![EventKind::LastReadout, EventKind::ScriptEnded]);

    let cam = rig.camera();
    assert_eq!(cam.state(), CameraState::Idle);
    assert!(cam.current_target().is_none());
    assert!(!cam.block_move());
}

#[test]
fn slew_precedes_observe() {
    let mut rig = Rig::new();
    let pos = Equatorial::new(201.3, -11.2);
    let target = target_at(2, pos, exposures(2));

    let dispatch = rig.bus.publish(Event::SetTarget(target));
    assert!(!dispatch.contains(EventKind::Observe));
    assert_eq!(rig.mount.queued(), vec![Command::Move { target: pos }]);
    assert_eq!(rig.cam.queue_depth(), 0);

    rig.mount.pop_command();
    rig.mount.set_pointing(pos);
    let dispatch = rig.bus.callback("T0", DeviceCallback::MoveEnd).unwrap();
    assert_eq!(dispatch.count(EventKind::Observe), 1);
    assert!(dispatch.contains(EventKind::ScriptStarted));
    assert_eq!(rig.cam.queue_depth(), 1);
}

#[test]
fn camera_vetoes_slew_until_last_readout() {
    let mut rig = Rig::new();
    let a = target_at(1, Equatorial::new(0.0, 0.0), exposures(2));
    let b_pos = Equatorial::new(90.0, 30.0);
    let b = target_at(2, b_pos, exposures(1));

    rig.bus.publish(Event::SetTarget(a));
    assert!(rig.camera().block_move());

    let dispatch = rig.bus.publish(Event::SetTarget(b));
    assert_eq!(
        dispatch.kinds(),
        vec![EventKind::SetTarget, EventKind::MoveQuestion, EventKind::DontMove]
    );
    assert_eq!(rig.mount.queue_depth(), 0);
    assert_eq!(rig.telescope().pending_move(), Some(b_pos));

    // B is staged, A keeps running
    assert_eq!(id_of(rig.camera().current_target()), Some(1));
    assert_eq!(id_of(rig.camera().next_target()), Some(2));

    // First exposure is not the last; the slew stays blocked
    let kinds = rig.expose_one();
    assert!(!kinds.contains(&EventKind::LastReadout));
    assert_eq!(rig.mount.queue_depth(), 0);

    // Last exposure ends: the mount slews during readout
    rig.cam.pop_command();
    rig.bus
        .callback("C0", DeviceCallback::ExposureStarted { start: Utc::now() })
        .unwrap();
    let dispatch = rig.bus.callback("C0", DeviceCallback::ExposureEnd).unwrap();
    assert!(dispatch.contains(EventKind::LastReadout));
    assert_eq!(rig.mount.queued(), vec![Command::Move { target: b_pos }]);
    assert_eq!(rig.telescope().state(), TelescopeState::Moving);
    assert_eq!(rig.camera().state(), CameraState::ScriptActive);

    // Mount arrives before the readout finishes: Observe waits for the script
    rig.mount.pop_command();
    rig.mount.set_pointing(b_pos);
    let dispatch = rig.bus.callback("T0", DeviceCallback::MoveEnd).unwrap();
    assert_eq!(dispatch.kinds(), vec![EventKind::Observe]);
    assert!(rig.camera().observe_pending());
    assert_eq!(id_of(rig.camera().current_target()), Some(1));

    let dispatch = rig.bus.callback("C0", DeviceCallback::ReadoutEnd).unwrap();
    assert_eq!(
        dispatch.kinds(),
        vec![EventKind::ScriptEnded, EventKind::ScriptStarted]
    );
    let cam = rig.camera();
    assert_eq!(id_of(cam.current_target()), Some(2));
    assert!(cam.next_target().is_none());
    assert!(!cam.observe_pending());
    assert_eq!(rig.cam.queue_depth(), 1);
}

#[test]
fn observe_during_script_starts_next_exactly_once() {
    let mut rig = Rig::new();
    let here = Equatorial::new(0.0, 0.0);
    rig.bus
        .publish(Event::SetTarget(target_at(1, here, exposures(1))));

    // Same pointing: the mount announces Observe at once
    let b = target_at(2, here, exposures(2));
    let dispatch = rig.bus.publish(Event::SetTarget(b.clone()));
    assert_eq!(dispatch.kinds(), vec![EventKind::SetTarget, EventKind::Observe]);
    assert_eq!(id_of(rig.camera().current_target()), Some(1));
    assert!(rig.camera().observe_pending());

    let kinds = rig.expose_one();
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::ScriptStarted).count(),
        1
    );
    assert_eq!(id_of(rig.camera().current_target()), Some(2));
    assert_eq!(b.obs_id(), 1);

    // Nothing left pending after B completes
    rig.expose_one();
    let kinds = rig.expose_one();
    assert!(!kinds.contains(&EventKind::ScriptStarted));
    assert_eq!(rig.camera().state(), CameraState::Idle);
}

#[test]
fn kill_all_resets_at_every_cursor() {
    for done in 0..=3 {
        let mut rig = Rig::new();
        rig.bus.publish(Event::SetTarget(target_at(
            7,
            Equatorial::new(0.0, 0.0),
            exposures(3),
        )));
        for _ in 0..done {
            rig.expose_one();
        }

        rig.bus.publish(Event::KillAll);
        let cam = rig.camera();
        assert!(cam.current_target().is_none(), "after {done} exposures");
        assert!(cam.script().is_none(), "after {done} exposures");
        assert!(!cam.block_move(), "after {done} exposures");
        assert!(rig.telescope().current_target().is_none());
        assert!(rig.bus.move_allowed());
    }
}

#[test]
fn kill_all_while_idle_is_harmless() {
    let mut rig = Rig::new();
    let dispatch = rig.bus.publish(Event::KillAll);
    assert_eq!(dispatch.kinds(), vec![EventKind::KillAll]);
    assert_eq!(rig.camera().state(), CameraState::Idle);
}

#[test]
fn kill_all_drops_deferred_slew() {
    let mut rig = Rig::new();
    rig.bus.publish(Event::SetTarget(target_at(
        1,
        Equatorial::new(0.0, 0.0),
        exposures(2),
    )));
    rig.bus.publish(Event::SetTarget(target_at(
        2,
        Equatorial::new(45.0, 45.0),
        exposures(1),
    )));
    assert!(rig.telescope().pending_move().is_some());

    let dispatch = rig.bus.publish(Event::KillAll);
    assert!(dispatch.contains(EventKind::ScriptEnded));
    assert!(rig.telescope().pending_move().is_none());
    assert!(rig.camera().next_target().is_none());
    assert_eq!(rig.mount.queue_depth(), 0);
}

#[test]
fn image_goes_to_least_loaded_processor() {
    let mut rig = Rig::with_processors(&[5, 2, 2]);
    rig.bus.publish(Event::SetTarget(target_at(
        3,
        Equatorial::new(0.0, 0.0),
        exposures(1),
    )));
    rig.expose_one();
    rig.bus.callback("C0", DeviceCallback::ImageReady).unwrap();

    let depth = |name: &str| rig.registry.get(name).unwrap().queue_depth();
    assert_eq!(depth("P0"), 0);
    assert_eq!(depth("P1"), 1);
    assert_eq!(depth("P2"), 0);
    match rig.registry.get("P1").unwrap().pop_command() {
        Some(Command::QueueImage { image }) => assert!(image.starts_with("C0_00003_1_0001_")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn move_failure_leaves_clients_ready_for_next_target() {
    let mut rig = Rig::new();
    rig.bus.publish(Event::SetTarget(target_at(
        4,
        Equatorial::new(10.0, -85.0),
        exposures(1),
    )));
    rig.mount.pop_command();

    let dispatch = rig
        .bus
        .callback("T0", DeviceCallback::MoveFailed { status: -1 })
        .unwrap();
    assert_eq!(dispatch.kinds(), vec![EventKind::MoveFailed]);
    assert!(rig.camera().current_target().is_none());
    assert!(rig.bus.move_allowed());

    let next = target_at(5, Equatorial::new(0.0, 0.0), exposures(1));
    let dispatch = rig.bus.publish(Event::SetTarget(next));
    assert!(dispatch.contains(EventKind::ScriptStarted));
}

#[test]
fn retarget_during_slew_waits_for_mount() {
    let mut rig = Rig::new();
    let a_pos = Equatorial::new(90.0, 10.0);
    let b_pos = Equatorial::new(200.0, 40.0);
    rig.bus
        .publish(Event::SetTarget(target_at(1, a_pos, exposures(1))));
    rig.bus
        .publish(Event::SetTarget(target_at(2, b_pos, exposures(1))));
    assert_eq!(rig.mount.queued(), vec![Command::Move { target: a_pos }]);

    // Arriving at A must not start B's script there
    rig.mount.pop_command();
    rig.mount.set_pointing(a_pos);
    let dispatch = rig.bus.callback("T0", DeviceCallback::MoveEnd).unwrap();
    assert!(!dispatch.contains(EventKind::Observe));
    assert_eq!(rig.cam.queue_depth(), 0);
    assert_eq!(rig.mount.queued(), vec![Command::Move { target: b_pos }]);

    rig.mount.pop_command();
    rig.mount.set_pointing(b_pos);
    let dispatch = rig.bus.callback("T0", DeviceCallback::MoveEnd).unwrap();
    assert_eq!(dispatch.count(EventKind::Observe), 1);
    assert!(dispatch.contains(EventKind::ScriptStarted));
    assert_eq!(id_of(rig.camera().current_target()), Some(2));
    assert_eq!(rig.cam.queue_depth(), 1);
}

#[test]
fn chained_start_without_script_leaves_camera_clear() {
    let mut rig = Rig::new();
    let here = Equatorial::new(0.0, 0.0);
    rig.bus
        .publish(Event::SetTarget(target_at(1, here, exposures(1))));

    // No script for C0: the deferred start fails once A ends
    let bare: TargetRef = Rc::new(FixedTarget::new(2, "bare", here));
    rig.bus.publish(Event::SetTarget(bare));
    assert!(rig.camera().observe_pending());

    let kinds = rig.expose_one();
    assert!(kinds.contains(&EventKind::ScriptEnded));
    assert!(!kinds.contains(&EventKind::ScriptStarted));

    let cam = rig.camera();
    assert_eq!(cam.state(), CameraState::Idle);
    assert!(!cam.block_move());
    assert!(!cam.observe_pending());
    assert!(cam.current_target().is_none());
    assert!(cam.next_target().is_none());
    assert!(rig.bus.move_allowed());

    let dispatch = rig
        .bus
        .publish(Event::SetTarget(target_at(3, here, exposures(1))));
    assert!(dispatch.contains(EventKind::ScriptStarted));
}
