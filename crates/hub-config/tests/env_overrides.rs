use figment::Jail;
use hub_config::{ConfigError, HubConfig};

#[test]
fn env_vars_flow_through_load() {
    Jail::expect_with(|jail| {
        jail.set_env("DATAHUB_DATABASE__PATH", ":memory:");
        jail.set_env("DATAHUB_SCHEDULER__LOCK_TTL_SECONDS", "90");

        let config = HubConfig::load().expect("config loads");
        assert!(config.database.is_in_memory());
        assert_eq!(config.scheduler.lock_ttl_seconds, 90);
        Ok(())
    });
}

#[test]
fn env_values_are_validated_after_load() {
    Jail::expect_with(|jail| {
        jail.set_env("DATAHUB_SYNC__BATCH_SIZE", "0");

        let config = HubConfig::load().expect("config loads");
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "sync.batch_size"),
            "{err}"
        );
        Ok(())
    });
}
