use std::io::Write;

use serial_test::serial;

use super::load_config;
use super::settings::Settings;

fn json_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.agent.device_id, "");
    assert_eq!(settings.agent.register_prefix, "register");
    assert_eq!(settings.agent.message_prefix, "message");
    assert_eq!(settings.agent.publish_timeout_ms, 10_000);
    assert_eq!(settings.dispatcher.queue_capacity, 64);
    assert_eq!(settings.dispatcher.worker_count, 4);
    assert_eq!(settings.dispatcher.task_timeout_ms, 5_000);
    assert!(settings.mqtt.is_empty());
}

#[test]
#[serial]
fn test_load_without_sources_uses_defaults() {
    temp_env::with_var_unset("DEVICE_ID", || {
        let settings = load_config(None).unwrap();
        assert_eq!(settings, Settings::default());
    });
}

#[test]
#[serial]
fn test_file_brokers_are_merged_with_defaults() {
    let file = json_file(
        r#"{
            "agent": { "device_id": "dev-1" },
            "dispatcher": { "worker_count": 2 },
            "mqtt": {
                "local": {
                    "endpoint": "127.0.0.1:1883",
                    "subscribe_topics": { "devices/cmd": 1 }
                },
                "cloud": {
                    "endpoint": "broker.example.com:8883",
                    "root_ca": "/etc/ca.pem",
                    "cert": "/etc/cert.pem",
                    "key": "/etc/key.pem",
                    "keep_alive_secs": 30
                }
            }
        }"#,
    );

    temp_env::with_var_unset("DEVICE_ID", || {
        let settings = load_config(Some(file.path())).unwrap();

        assert_eq!(settings.agent.device_id, "dev-1");
        assert_eq!(settings.agent.register_prefix, "register");
        assert_eq!(settings.dispatcher.worker_count, 2);
        assert_eq!(settings.dispatcher.queue_capacity, 64);

        let local = &settings.mqtt["local"];
        assert_eq!(local.endpoint, "127.0.0.1:1883");
        assert_eq!(local.subscribe_topics.get("devices/cmd"), Some(&1));
        assert_eq!(local.keep_alive_secs, 60);
        assert_eq!(local.inbound_capacity, 16);
        assert!(local.root_ca.is_none());

        let cloud = &settings.mqtt["cloud"];
        assert_eq!(cloud.keep_alive_secs, 30);
        assert_eq!(cloud.key.as_deref(), Some("/etc/key.pem"));
    });
}

#[test]
#[serial]
fn test_device_id_env_overrides_file() {
    let file = json_file(r#"{ "agent": { "device_id": "from-file" } }"#);

    temp_env::with_var("DEVICE_ID", Some("from-env"), || {
        let settings = load_config(Some(file.path())).unwrap();
        assert_eq!(settings.agent.device_id, "from-env");
    });
}

#[test]
#[serial]
fn test_empty_device_id_env_is_ignored() {
    let file = json_file(r#"{ "agent": { "device_id": "from-file" } }"#);

    temp_env::with_var("DEVICE_ID", Some(""), || {
        let settings = load_config(Some(file.path())).unwrap();
        assert_eq!(settings.agent.device_id, "from-file");
    });
}

#[test]
#[serial]
fn test_prefixed_env_overrides_dispatcher() {
    temp_env::with_vars(
        [
            ("DEVICE_ID", None),
            ("MQTTAGENT_DISPATCHER__QUEUE_CAPACITY", Some("8")),
        ],
        || {
            let settings = load_config(None).unwrap();
            assert_eq!(settings.dispatcher.queue_capacity, 8);
            assert_eq!(settings.dispatcher.worker_count, 4);
        },
    );
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.json");
    assert!(load_config(Some(&missing)).is_err());
}
