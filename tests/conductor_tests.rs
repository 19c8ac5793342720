mod common;

use common::{init_logging, RecordingBackend};
use conductor::config::{ConnectionConfig, DeviceConfig, PortConfig, Settings};
use conductor::registry::CallbackResult;
use conductor::router::{MidiFilter, PortDirection};
use conductor::{Conductor, SystemEvent};
use std::sync::{Arc, Mutex};

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.timing.beacon.enabled = false;
    settings.devices = vec![
        DeviceConfig {
            name: "Synth".to_string(),
            port_id: "synth".to_string(),
        },
        DeviceConfig {
            name: "Sampler".to_string(),
            port_id: "sampler".to_string(),
        },
    ];
    settings.ports = vec![
        PortConfig {
            id: "keys".to_string(),
            name: "Keyboard".to_string(),
            direction: PortDirection::Input,
        },
        PortConfig {
            id: "out".to_string(),
            name: "Out".to_string(),
            direction: PortDirection::Output,
        },
    ];
    settings.connections = vec![ConnectionConfig {
        input: "keys".to_string(),
        output: "out".to_string(),
        enabled: false,
        filters: vec![MidiFilter::new("ch1").with_channels([0])],
        transforms: Vec::new(),
    }];
    settings
}

fn conductor(backend: &RecordingBackend) -> Conductor {
    init_logging();
    Conductor::new(&settings(), Arc::new(backend.clone())).unwrap()
}

fn record_events(conductor: &Conductor) -> Arc<Mutex<Vec<SystemEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    conductor.add_event_listener(
        "recorder",
        Arc::new(move |event: &SystemEvent| -> CallbackResult {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        }),
    );
    events
}

#[test]
fn test_settings_populate_devices_ports_and_connections() {
    let backend = RecordingBackend::new();
    let conductor = conductor(&backend);

    assert_eq!(conductor.clock().devices().len(), 2);
    assert_eq!(conductor.router().ports().len(), 2);

    let connections = conductor.router().connections();
    assert_eq!(connections.len(), 1);
    assert!(!connections[0].enabled);
    assert_eq!(connections[0].filters.len(), 1);
}

#[test]
fn test_invalid_settings_are_rejected() {
    init_logging();
    let mut bad = settings();
    bad.timing.bpm = 20.0;
    assert!(Conductor::new(&bad, Arc::new(RecordingBackend::new())).is_err());

    let mut bad = settings();
    bad.connections[0].output = "keys".to_string();
    assert!(Conductor::new(&bad, Arc::new(RecordingBackend::new())).is_err());
}

#[test]
fn test_playback_drives_engine_and_clock() {
    let backend = RecordingBackend::new();
    let conductor = conductor(&backend);
    let events = record_events(&conductor);

    conductor.start_playback();
    conductor.start_playback();
    assert!(conductor.is_playing());
    assert!(conductor.clock().status().is_playing);
    assert_eq!(backend.count("synth", 0xFA), 1);
    assert_eq!(backend.count("sampler", 0xFA), 1);

    conductor.stop_playback();
    conductor.stop_playback();
    assert!(!conductor.is_playing());
    assert!(!conductor.clock().status().is_playing);
    assert_eq!(backend.count("synth", 0xFC), 1);

    assert_eq!(
        *events.lock().unwrap(),
        vec![SystemEvent::PlayStart, SystemEvent::PlayStop]
    );
}

#[test]
fn test_bpm_changes_reach_both_units() {
    let backend = RecordingBackend::new();
    let conductor = conductor(&backend);
    let events = record_events(&conductor);

    conductor.set_bpm(90.0).unwrap();
    assert_eq!(conductor.timing().tempo(), 90.0);
    assert_eq!(conductor.clock().status().bpm, 90.0);

    assert!(conductor.set_bpm(250.0).is_err());
    assert_eq!(conductor.timing().tempo(), 90.0);
    assert_eq!(conductor.clock().status().bpm, 90.0);

    assert_eq!(
        *events.lock().unwrap(),
        vec![SystemEvent::BpmChange {
            old: 120.0,
            new: 90.0
        }]
    );
}

#[test]
fn test_status_reports() {
    let backend = RecordingBackend::new();
    let conductor = conductor(&backend);
    conductor.clock().set_device_connected("sampler", false).unwrap();
    conductor.set_quantum(3).unwrap();

    let status = conductor.status();
    assert!(!status.is_playing);
    assert_eq!(status.bpm, 120.0);
    assert_eq!(status.midi_devices, 2);
    assert_eq!(status.connected_devices, 1);
    assert_eq!(status.connected_peers, 0);
    assert!(status.uptime >= 0.0);

    let detailed = conductor.detailed_status();
    assert_eq!(detailed.timing.quantum, 3);
    assert_eq!(detailed.midi.device_count, 2);
    assert_eq!(detailed.devices.len(), 2);
    assert_eq!(detailed.router.total_ports, 2);
    assert_eq!(detailed.connections.len(), 1);

    let json: serde_json::Value = serde_json::from_str(&conductor.status_json().unwrap()).unwrap();
    assert_eq!(json["timing"]["bpm"], 120.0);
    assert_eq!(json["ports"][0]["direction"], "input");
}

#[test]
fn test_lifecycle() {
    let backend = RecordingBackend::new();
    let conductor = conductor(&backend);

    conductor.start();
    assert!(conductor.timing().is_running());
    assert!(conductor.clock().is_running());
    assert!(conductor.router().is_running());

    conductor.start_playback();
    conductor.stop();
    assert!(!conductor.is_playing());
    assert!(!conductor.timing().is_running());
    assert!(!conductor.clock().is_running());
    assert!(!conductor.router().is_running());
    assert_eq!(backend.count("synth", 0xFC), 1);
}
