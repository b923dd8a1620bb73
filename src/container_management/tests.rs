#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::container_management::forward::ForwardOptions;
    use crate::container_management::{
        BackendSpec, ContainerState, ContainerStats, Director, DirectorOptions, DirectorRegistry,
        Namer,
    };
    use crate::error_handling::types::DirectorError;
    use crate::event::types::{CONTAINER_STARTED, CONTAINER_STOPPED, FIELD_CONTAINER};
    use crate::event::{DummyChannel, QueueChannel};
    use crate::network::peer::{PeerInfo, Transport};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    // Helper to create a director whose containers never dial
    fn stub_director(template: &str) -> Director {
        Director::new(
            "stub",
            "vm-stub",
            Namer::new(template).unwrap(),
            BackendSpec::Stub,
            Arc::new(DummyChannel),
        )
    }

    fn peer(remote: &str) -> PeerInfo {
        PeerInfo {
            transport: Transport::Tcp,
            local_addr: Some("127.0.0.1:8080".parse().unwrap()),
            remote_addr: remote.to_string(),
        }
    }

    fn custom_ctor(options: DirectorOptions) -> Result<Director, DirectorError> {
        let options = DirectorOptions {
            kind: "custom".to_string(),
            ..options
        };
        Director::from_options(options, BackendSpec::Stub)
    }

    #[tokio::test]
    async fn same_host_returns_same_container() {
        init_logger();
        let director = stub_director("miel");

        let first = director.new_or_get_container("10.0.0.1").await.unwrap();
        let second = director.new_or_get_container("10.0.0.1").await.unwrap();
        let looked_up = director.get_container(&peer("10.0.0.1:4444")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &looked_up));
        assert_eq!(first.name(), "miel-10.0.0.1");
        assert_eq!(director.get_container_stats().total_created, 1);
    }

    #[tokio::test]
    async fn distinct_hosts_get_distinct_containers() {
        let director = stub_director("miel");

        let a = director.new_or_get_container("10.0.0.1").await.unwrap();
        let b = director.new_or_get_container("10.0.0.2").await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.name(), b.name());
        assert_eq!(director.list_containers().len(), 2);
    }

    #[tokio::test]
    async fn lookup_before_create_is_not_found() {
        let director = stub_director("miel");
        director.new_or_get_container("10.0.0.1").await.unwrap();

        let res = director.get_container(&peer("10.0.0.9:4444"));
        assert!(matches!(res, Err(DirectorError::NotFound(ref name)) if name == "miel-10.0.0.9"));
    }

    #[tokio::test]
    async fn lookup_with_malformed_address_fails() {
        let director = stub_director("miel");
        let res = director.get_container(&peer("10.0.0.1"));
        assert!(matches!(res, Err(DirectorError::AddressParse(_))));
    }

    #[tokio::test]
    async fn lookup_ignores_remote_port() {
        let director = stub_director("{host}");
        let created = director.new_or_get_container("::1").await.unwrap();

        let found = director.get_container(&peer("[::1]:1234")).unwrap();
        assert!(Arc::ptr_eq(&created, &found));
    }

    #[tokio::test]
    async fn stub_container_refuses_to_dial() {
        let director = stub_director("miel");
        let container = director.new_or_get_container("10.0.0.1").await.unwrap();

        let res = container.dial(&peer("10.0.0.1:4444")).await;
        assert!(matches!(res, Err(DirectorError::NotImplemented(_))));
        assert_eq!(container.state(), ContainerState::Uninitialized);
    }

    #[tokio::test]
    async fn list_containers_describes_each_entry() {
        let director = stub_director("miel");
        director.new_or_get_container("10.0.0.2").await.unwrap();
        director.new_or_get_container("10.0.0.1").await.unwrap();

        let listed = director.list_containers();
        let names: Vec<&str> = listed.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["miel-10.0.0.1", "miel-10.0.0.2"]);
        assert!(listed.iter().all(|d| d.kind == "vm-stub"));
        assert_eq!(listed[0].host, "10.0.0.1");
        assert_eq!(listed[0].attached_sessions, 0);
    }

    #[tokio::test]
    async fn remove_container_stops_and_evicts() {
        let (channel, mut events) = QueueChannel::new(16);
        let director = Director::new(
            "stub",
            "vm-stub",
            Namer::new("miel").unwrap(),
            BackendSpec::Stub,
            Arc::new(channel),
        );
        let old = director.new_or_get_container("10.0.0.1").await.unwrap();

        director.remove_container("miel-10.0.0.1").await.unwrap();

        assert_eq!(old.state(), ContainerState::Stopped);
        assert!(matches!(
            old.dial(&peer("10.0.0.1:1")).await,
            Err(DirectorError::ResourceUnavailable(_))
        ));
        assert!(director.get_container(&peer("10.0.0.1:1")).is_err());

        let started = events.recv().await.unwrap();
        assert_eq!(started.kind(), Some(CONTAINER_STARTED));
        let stopped = events.recv().await.unwrap();
        assert_eq!(stopped.kind(), Some(CONTAINER_STOPPED));
        assert_eq!(stopped.text(FIELD_CONTAINER), Some("miel-10.0.0.1"));

        let fresh = director.new_or_get_container("10.0.0.1").await.unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(fresh.state(), ContainerState::Uninitialized);
    }

    #[tokio::test]
    async fn remove_unknown_container_is_not_found() {
        let director = stub_director("miel");
        let res = director.remove_container("miel-10.0.0.1").await;
        assert!(matches!(res, Err(DirectorError::NotFound(_))));
    }

    #[tokio::test]
    async fn cleanup_all_empties_registry() {
        let director = stub_director("miel");
        let a = director.new_or_get_container("10.0.0.1").await.unwrap();
        director.new_or_get_container("10.0.0.2").await.unwrap();

        director.cleanup_all_containers().await.unwrap();

        assert!(director.list_containers().is_empty());
        assert_eq!(a.state(), ContainerState::Stopped);
        assert_eq!(
            director.get_container_stats(),
            ContainerStats {
                active_count: 0,
                total_created: 2,
                failed_count: 0,
            }
        );
    }

    #[test]
    fn registry_falls_back_to_dummy() {
        let registry = DirectorRegistry::with_builtin();
        let options = DirectorOptions::new("odd", "no-such-kind", "miel", Arc::new(DummyChannel));

        let director = registry.build(options).unwrap();
        assert_eq!(director.kind(), "dummy");
        assert!(registry.get("no-such-kind").is_none());
    }

    #[test]
    fn registry_knows_builtin_kinds() {
        let registry = DirectorRegistry::with_builtin();
        assert_eq!(
            registry.kinds(),
            ["dummy", "forward", "passthrough", "sandboxed", "vm-stub"]
        );
        assert_eq!(DirectorRegistry::new().kinds(), ["dummy"]);
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = DirectorRegistry::with_builtin();
        registry.register("vm-stub", custom_ctor);

        let options = DirectorOptions::new("vm", "vm-stub", "miel", Arc::new(DummyChannel));
        let director = registry.build(options).unwrap();
        assert_eq!(director.kind(), "custom");
    }

    #[test]
    fn registry_decodes_backend_settings() {
        let registry = DirectorRegistry::with_builtin();
        let settings: toml::Table = toml::from_str("host = \"10.0.0.5:80\"").unwrap();
        let options = DirectorOptions::new("web", "forward", "miel-{host}", Arc::new(DummyChannel))
            .with_settings(settings);

        let director = registry.build(options.clone()).unwrap();
        assert_eq!(director.kind(), "forward");
        assert_eq!(director.name(), "web");
        assert_eq!(director.namer().name("10.0.0.1"), "miel-10.0.0.1");

        let decoded: ForwardOptions = options.decode().unwrap();
        assert_eq!(decoded.host, "10.0.0.5:80");
    }

    #[test]
    fn missing_backend_settings_are_invalid_config() {
        let registry = DirectorRegistry::with_builtin();
        let options = DirectorOptions::new("web", "forward", "miel", Arc::new(DummyChannel));

        let res = registry.build(options);
        assert!(matches!(res, Err(DirectorError::InvalidConfig(_))));
    }

    #[test]
    fn bad_template_is_invalid_config() {
        let registry = DirectorRegistry::with_builtin();
        let options = DirectorOptions::new("vm", "vm-stub", "bad template", Arc::new(DummyChannel));

        let res = registry.build(options);
        assert!(matches!(res, Err(DirectorError::InvalidConfig(_))));
    }
}
