use std::collections::HashMap;

use super::types::{DispatchConfig, QueueConfig, QueueMode};
use crate::error::ConfigError;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults() {
    let cfg = DispatchConfig::default();
    assert_eq!(cfg.default_concurrency_limit, 4);
    assert_eq!(cfg.max_queue_depth, None);
    assert_eq!(cfg.main_queue, "main");
    assert_eq!(cfg.thread_prefix, "quay");
    assert!(cfg.queues.is_empty());
    cfg.validate().unwrap();
}

#[test]
fn parse_minimal_toml() {
    let cfg: DispatchConfig = toml::from_str("").unwrap();
    assert_eq!(cfg.default_concurrency_limit, 4);
    assert_eq!(cfg.main_queue, "main");
}

#[test]
fn parse_full_toml() {
    let toml = r#"
default_concurrency_limit = 8
max_queue_depth = 256
main_queue = "ui"

[queues.bg]
mode = "concurrent"
concurrency = 2

[queues.io]
mode = "concurrent"
max_depth = 16

[queues.log]
mode = "serial"
"#;
    let cfg: DispatchConfig = toml::from_str(toml).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.main_queue, "ui");
    assert_eq!(cfg.queues.len(), 3);

    let bg = &cfg.queues["bg"];
    assert_eq!(bg.mode, QueueMode::Concurrent);
    assert_eq!(bg.resolved_concurrency(&cfg), 2);
    assert_eq!(bg.resolved_max_depth(&cfg), Some(256));

    let io = &cfg.queues["io"];
    assert_eq!(io.resolved_concurrency(&cfg), 8); // default
    assert_eq!(io.resolved_max_depth(&cfg), Some(16));

    let log = &cfg.queues["log"];
    assert_eq!(log.mode, QueueMode::Serial);
    assert_eq!(log.resolved_concurrency(&cfg), 1);
}

#[test]
fn reject_unknown_mode() {
    let toml = r#"
[queues.bg]
mode = "parallel"
"#;
    let err = toml::from_str::<DispatchConfig>(toml).unwrap_err();
    assert!(err.to_string().contains("parallel"));
}

#[test]
fn reject_zero_concurrency() {
    let mut cfg = DispatchConfig::default();
    cfg.default_concurrency_limit = 0;
    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn reject_zero_depth() {
    let mut cfg = DispatchConfig::default();
    cfg.max_queue_depth = Some(0);
    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn reject_queue_named_like_main() {
    let mut cfg = DispatchConfig::default();
    cfg.queues.insert("main".into(), QueueConfig::concurrent(2));
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("collides with the main queue"));
}

#[test]
fn reject_serial_with_concurrency() {
    let mut cfg = DispatchConfig::default();
    cfg.queues.insert(
        "log".into(),
        QueueConfig {
            mode: QueueMode::Serial,
            concurrency: Some(3),
            max_depth: None,
        },
    );
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("serial queue 'log'"));
}

#[test]
fn env_overrides_apply() {
    let mut cfg = DispatchConfig::default();
    cfg.apply_overrides_from(lookup(&[
        ("QUAY_DEFAULT_CONCURRENCY_LIMIT", "6"),
        ("QUAY_MAX_QUEUE_DEPTH", "100"),
        ("QUAY_MAIN_QUEUE", "ui"),
        ("QUAY_THREAD_PREFIX", "app"),
    ]));
    assert_eq!(cfg.default_concurrency_limit, 6);
    assert_eq!(cfg.max_queue_depth, Some(100));
    assert_eq!(cfg.main_queue, "ui");
    assert_eq!(cfg.thread_prefix, "app");
}

#[test]
fn env_override_unbounded_clears_depth() {
    let mut cfg = DispatchConfig::default();
    cfg.max_queue_depth = Some(10);
    cfg.apply_overrides_from(lookup(&[("QUAY_MAX_QUEUE_DEPTH", "unbounded")]));
    assert_eq!(cfg.max_queue_depth, None);
}

#[test]
fn env_override_ignores_garbage() {
    let mut cfg = DispatchConfig::default();
    cfg.apply_overrides_from(lookup(&[("QUAY_DEFAULT_CONCURRENCY_LIMIT", "lots")]));
    assert_eq!(cfg.default_concurrency_limit, 4);
}

#[test]
fn from_file_missing_is_io_error() {
    let err = DispatchConfig::from_file("/nonexistent/quay.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn json_view_lists_queues() {
    let mut cfg = DispatchConfig::default();
    cfg.queues.insert("bg".into(), QueueConfig::concurrent(2));
    let json = cfg.to_json();
    assert_eq!(json["main_queue"], "main");
    assert_eq!(json["queues"]["bg"]["mode"], "concurrent");
    assert_eq!(json["queues"]["bg"]["concurrency"], 2);
}
