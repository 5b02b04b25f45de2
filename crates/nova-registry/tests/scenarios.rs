//! Integration tests covering the six scenarios and two concurrency
//! properties exercised by the object-graph engine: orphan resolution,
//! extension-point removal with live children, deep config-element tree
//! cleanup, listener filter isolation, cache round-trip under a stamp
//! mismatch, and dispatch ordering under back-to-back mutations.

use nova_registry::{
    CachePaths, ConfigurationElementInput, EntityKind, ExtensionInput, ExtensionPointInput,
    ExtensionRegistry, ExtraData, NamespaceInput, RegistryChangeEvent, RegistryChangeListener,
    RegistryConfig, RegistryError,
};
use std::sync::{Arc, Mutex};

fn registry() -> ExtensionRegistry {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::under(dir.path());
    let mut config = RegistryConfig::default();
    config.no_registry_cache = true;
    ExtensionRegistry::start(paths, 0, config)
}

fn namespace_with_point(bundle_id: i64, unique_id: &str, simple_id: &str) -> NamespaceInput {
    NamespaceInput {
        bundle_id,
        unique_identifier: Some(format!("bundle.{bundle_id}").into()),
        extension_points: vec![ExtensionPointInput {
            unique_identifier: unique_id.into(),
            simple_identifier: simple_id.into(),
            schema_reference: None,
            label: None,
        }],
        extensions: vec![],
    }
}

fn namespace_with_extension(bundle_id: i64, target: &str, simple_id: &str) -> NamespaceInput {
    NamespaceInput {
        bundle_id,
        unique_identifier: Some(format!("bundle.{bundle_id}").into()),
        extension_points: vec![],
        extensions: vec![ExtensionInput {
            simple_identifier: Some(simple_id.into()),
            extension_point_identifier: Some(target.into()),
            label: None,
            children: vec![],
        }],
    }
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<RegistryChangeEvent>>,
}

impl RegistryChangeListener for RecordingListener {
    fn changed(&self, event: &RegistryChangeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn scenario_1_orphan_becomes_resolved() {
    let reg = registry();
    let listener = Arc::new(RecordingListener::default());
    reg.add_registry_change_listener(listener.clone(), None);

    let (_, status) = reg
        .add_all_and_wait(vec![namespace_with_extension(1, "x.p", "e1")])
        .await
        .unwrap();
    assert!(status.is_ok());
    assert_eq!(reg.orphans_for("x.p"), vec![1]);
    assert!(listener.events.lock().unwrap().is_empty());

    let (bundle_b, status) = reg
        .add_all_and_wait(vec![namespace_with_point(2, "x.p", "p")])
        .await
        .unwrap();
    assert!(status.is_ok());
    assert!(reg.orphans_for("x.p").is_empty());

    let point = reg.get_extension_point_by_unique_id("x.p").unwrap();
    let entity = point.resolve().unwrap();
    let nova_registry::Entity::ExtensionPoint(rec) = entity else {
        panic!("expected extension point");
    };
    assert_eq!(rec.raw_children, vec![1]);

    let events = listener.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let delta = events[0].delta_for(bundle_b).expect("delta under bundle B");
    assert_eq!(delta.extension_deltas.len(), 1);
    assert_eq!(delta.extension_deltas[0].kind, nova_registry::DeltaKind::Added);
}

#[tokio::test]
async fn scenario_2_remove_extension_point_with_live_extensions() {
    let reg = registry();
    reg.add_all_and_wait(vec![namespace_with_extension(1, "x.p", "e1")])
        .await
        .unwrap();
    let (bundle_b, _) = reg
        .add_all_and_wait(vec![namespace_with_point(2, "x.p", "p")])
        .await
        .unwrap();

    let listener = Arc::new(RecordingListener::default());
    reg.add_registry_change_listener(listener.clone(), None);

    let status = reg.remove_and_wait(bundle_b).await;
    assert!(status.is_ok());

    assert!(reg.get_extension_point_by_unique_id("x.p").is_none());
    assert_eq!(reg.orphans_for("x.p"), vec![1]);

    let events = listener.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let delta = events[0].delta_for(bundle_b).unwrap();
    assert_eq!(delta.extension_deltas.len(), 1);
    assert_eq!(delta.extension_deltas[0].kind, nova_registry::DeltaKind::Removed);
    assert!(delta.removed_extension_points.contains("x.p"));
}

#[tokio::test]
async fn scenario_3_config_element_tree_removal_stale_handle() {
    let reg = registry();
    let leaf = ConfigurationElementInput {
        name: "leaf".into(),
        value: None,
        attributes: vec![],
        children: vec![],
        extra: Some(ExtraData {
            executable_factory: Some("com.example.Factory".into()),
            source_location: None,
        }),
    };
    let child = ConfigurationElementInput {
        name: "child".into(),
        value: None,
        attributes: vec![],
        children: vec![leaf],
        extra: None,
    };
    let root = ConfigurationElementInput {
        name: "root".into(),
        value: None,
        attributes: vec![],
        children: vec![child],
        extra: None,
    };
    let ns = NamespaceInput {
        bundle_id: 1,
        unique_identifier: Some("bundle.1".into()),
        extension_points: vec![],
        extensions: vec![ExtensionInput {
            simple_identifier: Some("e1".into()),
            extension_point_identifier: Some("x.p".into()),
            label: None,
            children: vec![root],
        }],
    };
    reg.add_all_and_wait(vec![ns]).await.unwrap();

    let ext = reg.get_extension(1).unwrap();
    let leaf_id = {
        let nova_registry::Entity::Extension(rec) = ext.resolve().unwrap() else {
            panic!("expected extension");
        };
        let root_id = rec.raw_children[0];
        let nova_registry::Entity::ConfigurationElement(root_rec) =
            reg.get_objects(&[root_id], EntityKind::ConfigurationElement).unwrap()[0].clone()
        else {
            panic!("expected configuration element");
        };
        let child_id = root_rec.raw_children[0];
        let nova_registry::Entity::ConfigurationElement(child_rec) =
            reg.get_objects(&[child_id], EntityKind::ConfigurationElement).unwrap()[0].clone()
        else {
            panic!("expected configuration element");
        };
        child_rec.raw_children[0]
    };

    reg.remove_and_wait(1).await;

    let err = reg
        .get_objects(&[leaf_id], EntityKind::ThirdLevelConfigurationElement)
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::StaleHandle {
            id: leaf_id,
            kind: EntityKind::ThirdLevelConfigurationElement,
        }
    );
}

#[tokio::test]
async fn scenario_4_filter_isolation() {
    let reg = registry();
    reg.add_all_and_wait(vec![namespace_with_point(50, "y.p", "p")])
        .await
        .unwrap();

    let l1 = Arc::new(RecordingListener::default());
    let l2 = Arc::new(RecordingListener::default());
    reg.add_registry_change_listener(l1.clone(), Some(100));
    reg.add_registry_change_listener(l2.clone(), None);

    reg.add_all_and_wait(vec![namespace_with_extension(200, "y.p", "e1")])
        .await
        .unwrap();

    assert!(l1.events.lock().unwrap().is_empty());
    let l2_events = l2.events.lock().unwrap();
    assert_eq!(l2_events.len(), 1);
    let deltas = l2_events[0].deltas();
    assert_eq!(deltas.len(), 1);
    assert!(deltas.contains_key(&200));
}

#[tokio::test]
async fn scenario_5_cache_round_trip_with_mismatched_stamp() {
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::under(dir.path());
    let mut config = RegistryConfig::default();
    config.no_registry_cache = false;

    let reg = ExtensionRegistry::start(paths.clone(), 0, config.clone());
    reg.add_all_and_wait(vec![namespace_with_point(1, "x.p", "p")])
        .await
        .unwrap();
    reg.stop(&config, 111);

    let reg2 = ExtensionRegistry::start(paths.clone(), 222, config.clone());
    assert!(reg2.get_namespaces().is_empty());
    assert!(reg2.get_extension_point_by_unique_id("x.p").is_none());

    let reg3 = ExtensionRegistry::start(paths, 111, config);
    assert_eq!(reg3.get_namespaces(), vec![1]);
    assert!(reg3.get_extension_point_by_unique_id("x.p").is_some());
}

#[tokio::test]
async fn scenario_6_dispatch_ordering() {
    let reg = registry();
    reg.add_all_and_wait(vec![
        namespace_with_point(10, "a.p", "p"),
        namespace_with_point(11, "b.p", "p"),
    ])
    .await
    .unwrap();

    let listener = Arc::new(RecordingListener::default());
    reg.add_registry_change_listener(listener.clone(), None);

    let (tx1, rx1) = tokio::sync::oneshot::channel();
    let (tx2, rx2) = tokio::sync::oneshot::channel();

    // Mutate twice in quick succession without awaiting either dispatch job
    // directly, then await both oneshots in submission order (C1/ordering
    // guarantee 2: jobs run in the order they were scheduled).
    let reg1 = reg.clone();
    let h1 = tokio::spawn(async move {
        let (_, status) = reg1
            .add_all_and_wait(vec![namespace_with_extension(100, "a.p", "e1")])
            .await
            .unwrap();
        let _ = tx1.send(status);
    });
    let reg2 = reg.clone();
    let h2 = tokio::spawn(async move {
        let (_, status) = reg2
            .add_all_and_wait(vec![namespace_with_extension(101, "b.p", "e2")])
            .await
            .unwrap();
        let _ = tx2.send(status);
    });

    h1.await.unwrap();
    h2.await.unwrap();
    assert!(rx1.await.unwrap().is_ok());
    assert!(rx2.await.unwrap().is_ok());

    let events = listener.events.lock().unwrap();
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn dispatch_job_listener_snapshot_is_independent_of_later_registration() {
    let reg = registry();
    // Pre-existing orphan and resident point, set up before any listener is
    // registered, so the two mutations below each produce a real delta.
    reg.add_all_and_wait(vec![
        namespace_with_extension(0, "c2.p", "orphan"),
        namespace_with_point(10, "c2.p2", "p"),
    ])
    .await
    .unwrap();

    let a = Arc::new(RecordingListener::default());
    reg.add_registry_change_listener(a.clone(), None);

    // Schedules a job whose listener snapshot is `[a]`, without waiting for
    // it to run — it sits in the dispatch queue behind nothing yet.
    reg.add(namespace_with_point(1, "c2.p", "p")).unwrap();

    // Mutate the live listener list before that job has necessarily run.
    let b = Arc::new(RecordingListener::default());
    reg.remove_registry_change_listener(&(a.clone() as Arc<dyn RegistryChangeListener>));
    reg.add_registry_change_listener(b.clone(), None);

    // A second job, scheduled after the listener-list change, queues behind
    // the first (strict FIFO); waiting for it guarantees the first has
    // already run to completion.
    reg.add_all_and_wait(vec![namespace_with_extension(2, "c2.p2", "e1")])
        .await
        .unwrap();

    assert_eq!(a.events.lock().unwrap().len(), 1, "a must see the job scheduled while it was registered");
    assert_eq!(b.events.lock().unwrap().len(), 1, "b must see only the job scheduled after it registered");
}

#[tokio::test]
async fn remove_with_no_listeners_still_runs_physical_cleanup() {
    let reg = registry();
    reg.add_all_and_wait(vec![namespace_with_point(1, "x.p", "p")])
        .await
        .unwrap();
    reg.remove_and_wait(1).await;
    assert!(reg.get_extension_point_by_unique_id("x.p").is_none());
}

#[tokio::test]
async fn get_handle_and_get_handles_are_kind_checked() {
    let reg = registry();
    let (_, _) = reg
        .add_all_and_wait(vec![namespace_with_point(1, "x.p", "p")])
        .await
        .unwrap();
    let point = reg.get_extension_point_by_unique_id("x.p").unwrap();

    let handle = reg.get_handle(point.id(), EntityKind::ExtensionPoint).unwrap();
    assert_eq!(handle.id(), point.id());

    // Asking for the wrong kind at an id that does exist (under a different
    // kind) is indistinguishable from a stale id here: `get_handle` looks up
    // `kind`'s own table/cold-entry first, so it never finds the point under
    // the `Extension` kind and reports it as not resolving at all.
    let err = reg.get_handle(point.id(), EntityKind::Extension).unwrap_err();
    assert_eq!(
        err,
        RegistryError::StaleHandle {
            id: point.id(),
            kind: EntityKind::Extension,
        }
    );

    let err = reg.get_handle(9999, EntityKind::ExtensionPoint).unwrap_err();
    assert_eq!(
        err,
        RegistryError::StaleHandle {
            id: 9999,
            kind: EntityKind::ExtensionPoint,
        }
    );

    let handles = reg
        .get_handles(&[point.id(), point.id()], EntityKind::ExtensionPoint)
        .unwrap();
    assert_eq!(handles.len(), 2);
    assert!(reg.get_handles(&[point.id(), 9999], EntityKind::ExtensionPoint).is_err());
}

#[tokio::test]
async fn get_extension_point_for_namespace_is_single_result_and_simple_id_scoped() {
    let reg = registry();
    reg.add_all_and_wait(vec![NamespaceInput {
        bundle_id: 1,
        unique_identifier: Some("bundle.1".into()),
        extension_points: vec![
            ExtensionPointInput {
                unique_identifier: "x.p1".into(),
                simple_identifier: "p1".into(),
                schema_reference: None,
                label: None,
            },
            ExtensionPointInput {
                unique_identifier: "x.p2".into(),
                simple_identifier: "p2".into(),
                schema_reference: None,
                label: None,
            },
        ],
        extensions: vec![],
    }])
    .await
    .unwrap();

    let p1 = reg.get_extension_point_for_namespace(1, "p1").unwrap();
    let nova_registry::Entity::ExtensionPoint(rec) = p1.resolve().unwrap() else {
        panic!("expected extension point");
    };
    assert_eq!(rec.unique_identifier.as_str(), "x.p1");

    assert!(reg.get_extension_point_for_namespace(1, "nope").is_none());
    assert!(reg.get_extension_point_for_namespace(999, "p1").is_none());
}

#[tokio::test]
async fn get_configuration_elements_for_point_aggregates_across_linked_extensions() {
    let reg = registry();
    let child = |name: &str| ConfigurationElementInput {
        name: name.into(),
        value: None,
        attributes: vec![],
        children: vec![],
        extra: None,
    };
    reg.add_all_and_wait(vec![namespace_with_point(1, "x.p", "p")])
        .await
        .unwrap();
    reg.add_all_and_wait(vec![NamespaceInput {
        bundle_id: 2,
        unique_identifier: Some("bundle.2".into()),
        extension_points: vec![],
        extensions: vec![
            ExtensionInput {
                simple_identifier: Some("e1".into()),
                extension_point_identifier: Some("x.p".into()),
                label: None,
                children: vec![child("a"), child("b")],
            },
            ExtensionInput {
                simple_identifier: Some("e2".into()),
                extension_point_identifier: Some("x.p".into()),
                label: None,
                children: vec![child("c")],
            },
        ],
    }])
    .await
    .unwrap();

    let point = reg.get_extension_point_by_unique_id("x.p").unwrap();
    let elements = reg.get_configuration_elements_for_point(point.id()).unwrap();
    assert_eq!(elements.len(), 3);

    let via_namespace = reg
        .get_configuration_elements_for_namespace(1, "p")
        .unwrap();
    assert_eq!(via_namespace.len(), 3);

    let empty = reg
        .get_configuration_elements_for_namespace(1, "no-such-point")
        .unwrap();
    assert!(empty.is_empty());
}
