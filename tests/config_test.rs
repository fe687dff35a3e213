#[path = "common/mod.rs"]
mod common;

use common::RootGuard;
use ralph::Config;
use serial_test::serial;

#[test]
#[serial]
fn load_falls_back_to_defaults_without_a_file() {
    let _guard = RootGuard::new();
    let config = Config::load().unwrap();
    assert_eq!(config.model, Config::default().model);
}

#[test]
#[serial]
fn save_then_load_round_trips() {
    let _guard = RootGuard::new();
    let mut config = Config::default();
    config.session_cost_cap = Some(12.5);
    config.save().unwrap();

    let loaded = Config::load().unwrap();
    assert_eq!(loaded.session_cost_cap, Some(12.5));
}

#[test]
#[serial]
fn ralph_profile_selects_an_alternate_config_file() {
    let _guard = RootGuard::new();
    // SAFETY: test is #[serial]; no other test reads RALPH_PROFILE concurrently.
    unsafe { std::env::set_var("RALPH_PROFILE", "ci") };

    let mut ci_config = Config::default();
    ci_config.max_failures = 99;
    ci_config.save().unwrap();

    assert!(Config::config_path().ends_with("config.ci.yaml"));
    let loaded = Config::load().unwrap();
    assert_eq!(loaded.max_failures, 99);

    // SAFETY: see above.
    unsafe { std::env::remove_var("RALPH_PROFILE") };
    // Without the profile set, the default config.yaml (never written
    // in this test) falls back to defaults rather than the ci file.
    let default_loaded = Config::load().unwrap();
    assert_eq!(default_loaded.max_failures, Config::default().max_failures);
}
