//! Integration tests for the bean factory
//!
//! Covers singleton identity, circular reference handling through early
//! references, constructor and factory-method resolution, and ordered
//! destruction of dependent beans.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use trellis_core::container::{BeanPostProcessor, PropertyValue};
use trellis_core::{
    BeanDefinition, BeanFactory, ConstructorCandidate, ContainerConfig, CoreError, FactoryMethodCandidate, Instance,
    ParameterDescriptor, TypeInfo, ValueHolder, ValueSource,
};

/// Bean holding one optional collaborator, set through a property
struct Node {
    label: &'static str,
    peer: Mutex<Option<Instance>>,
}

impl Node {
    fn peer(&self) -> Option<Instance> {
        self.peer.lock().clone()
    }
}

fn node_definition(label: &'static str, peer: Option<&str>) -> BeanDefinition {
    let ty = TypeInfo::class(label).build();
    let mut definition = BeanDefinition::new(ty.clone())
        .constructor(ConstructorCandidate::no_arg(move || {
            Ok(Instance::new(
                Node {
                    label,
                    peer: Mutex::new(None),
                },
                ty.clone(),
            ))
        }))
        .with_property_setter(|bean, _name, value| {
            let node = bean
                .downcast_ref::<Node>()
                .ok_or_else(|| CoreError::illegal_state("not a node"))?;
            *node.peer.lock() = Some(value);
            Ok(())
        });
    if let Some(peer) = peer {
        definition = definition.property("peer", ValueSource::Reference(peer.to_string()));
    }
    definition
}

fn circular_factory(config: ContainerConfig) -> Arc<BeanFactory> {
    let factory = BeanFactory::with_config(config);
    factory
        .register_bean_definition("a", node_definition("A", Some("b")))
        .unwrap();
    factory
        .register_bean_definition("b", node_definition("B", Some("a")))
        .unwrap();
    factory
}

#[test]
fn test_setter_cycle_resolves_through_early_reference() {
    let factory = circular_factory(ContainerConfig::default());

    let a = factory.get_bean("a").unwrap();
    let b = factory.get_bean("b").unwrap();

    let a_node = a.downcast_ref::<Node>().unwrap();
    let b_node = b.downcast_ref::<Node>().unwrap();
    assert_eq!(a_node.label, "A");
    assert!(a_node.peer().unwrap().ptr_eq(&b));
    assert!(b_node.peer().unwrap().ptr_eq(&a));

    // b received the early reference to a, so destroying a must take b with it
    assert_eq!(factory.registry().dependent_beans("a"), vec!["b".to_string()]);
}

#[test]
fn test_setter_cycle_fails_when_circular_references_disallowed() {
    let config = ContainerConfig {
        allow_circular_references: false,
        ..ContainerConfig::default()
    };
    let factory = circular_factory(config);

    let err = factory.get_bean("a").unwrap_err();
    assert!(err.is_circular_reference(), "unexpected error: {}", err);
    assert!(!factory.registry().contains_singleton("a"));
    assert!(!factory.registry().contains_singleton("b"));
}

struct Wrapped {
    inner: Instance,
}

/// Wraps bean "a" after initialization without exposing an early wrapper
struct LateWrapper;

impl BeanPostProcessor for LateWrapper {
    fn post_process_after_initialization(&self, bean: Instance, bean_name: &str) -> Result<Instance, CoreError> {
        if bean_name == "a" {
            let ty = bean.type_info().clone();
            return Ok(Instance::new(Wrapped { inner: bean }, ty));
        }
        Ok(bean)
    }
}

#[test]
fn test_wrapping_after_raw_injection_is_rejected() {
    let factory = circular_factory(ContainerConfig::default());
    factory.add_bean_post_processor(Arc::new(LateWrapper));

    let err = factory.get_bean("a").unwrap_err();
    assert!(matches!(err, CoreError::BeanCurrentlyInCreation { .. }));
    let message = err.to_string();
    assert!(message.contains("in its raw version as part of a circular reference"), "{}", message);
    assert!(message.contains("[b]"), "{}", message);
}

#[test]
fn test_wrapping_after_raw_injection_allowed_by_config() {
    let config = ContainerConfig {
        allow_raw_injection_despite_wrapping: true,
        ..ContainerConfig::default()
    };
    let factory = circular_factory(config);
    factory.add_bean_post_processor(Arc::new(LateWrapper));

    let a = factory.get_bean("a").unwrap();
    let wrapped = a.downcast_ref::<Wrapped>().unwrap();
    let b = factory.get_bean("b").unwrap();
    let raw_seen_by_b = b.downcast_ref::<Node>().unwrap().peer().unwrap();
    assert!(raw_seen_by_b.ptr_eq(&wrapped.inner));
    assert!(!raw_seen_by_b.ptr_eq(&a));
}

/// Bean with a single constructor that needs another bean
fn constructor_node(label: &'static str, needs: &TypeInfo) -> BeanDefinition {
    let ty = TypeInfo::class(label).build();
    BeanDefinition::new(ty.clone()).constructor(ConstructorCandidate::new(
        vec![ParameterDescriptor::new("peer", needs.clone())],
        move |args| {
            Ok(Instance::new(
                Node {
                    label,
                    peer: Mutex::new(Some(args[0].clone())),
                },
                ty.clone(),
            ))
        },
    ))
}

#[test]
fn test_constructor_cycle_is_unresolvable() {
    let a_type = TypeInfo::class("A").build();
    let b_type = TypeInfo::class("B").build();
    let factory = BeanFactory::new();
    factory.register_bean_definition("a", constructor_node("A", &b_type)).unwrap();
    factory.register_bean_definition("b", constructor_node("B", &a_type)).unwrap();

    let err = factory.get_bean("a").unwrap_err();
    assert!(err.is_circular_reference(), "unexpected error: {}", err);
    assert!(factory.registry().singleton_count() == 0);
    assert!(!factory.is_currently_in_creation("a"));
}

struct DataSource;

struct Repo {
    data_source: Option<Instance>,
}

fn data_source_type() -> TypeInfo {
    TypeInfo::class("DataSource").build()
}

fn repo_definition(calls: Arc<AtomicUsize>) -> BeanDefinition {
    let repo_type = TypeInfo::class("Repo").build();
    let no_arg_type = repo_type.clone();
    let with_ds_type = repo_type.clone();
    BeanDefinition::new(repo_type)
        .autowire_constructor()
        .constructor(ConstructorCandidate::no_arg(move || {
            Ok(Instance::new(Repo { data_source: None }, no_arg_type.clone()))
        }))
        .constructor(ConstructorCandidate::new(
            vec![ParameterDescriptor::new("dataSource", data_source_type())],
            move |args| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Instance::new(
                    Repo {
                        data_source: Some(args[0].clone()),
                    },
                    with_ds_type.clone(),
                ))
            },
        ))
}

fn register_data_source(factory: &BeanFactory) {
    let ty = data_source_type();
    factory
        .register_bean_definition(
            "dataSource",
            BeanDefinition::new(ty.clone())
                .constructor(ConstructorCandidate::no_arg(move || Ok(Instance::new(DataSource, ty.clone())))),
        )
        .unwrap();
}

#[test]
fn test_autowiring_picks_most_specific_constructor() {
    let factory = BeanFactory::new();
    register_data_source(&factory);
    let calls = Arc::new(AtomicUsize::new(0));
    factory
        .register_bean_definition("repo", repo_definition(calls.clone()))
        .unwrap();

    let repo = factory.get_typed::<Repo>("repo").unwrap();
    let data_source = factory.get_bean("dataSource").unwrap();
    assert!(repo.data_source.as_ref().unwrap().ptr_eq(&data_source));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(factory.registry().dependent_beans("dataSource"), vec!["repo".to_string()]);
}

#[test]
fn test_constructor_resolution_is_cached_for_prototypes() {
    let factory = BeanFactory::new();
    register_data_source(&factory);
    let calls = Arc::new(AtomicUsize::new(0));
    factory
        .register_bean_definition("repo", repo_definition(calls.clone()).prototype())
        .unwrap();

    let first = factory.get_typed::<Repo>("repo").unwrap();
    assert!(factory.bean_definition("repo").unwrap().is_resolved());
    let second = factory.get_typed::<Repo>("repo").unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(first
        .data_source
        .as_ref()
        .unwrap()
        .ptr_eq(second.data_source.as_ref().unwrap()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_missing_dependency_falls_back_to_default_constructor() {
    let factory = BeanFactory::new();
    let calls = Arc::new(AtomicUsize::new(0));
    factory
        .register_bean_definition("repo", repo_definition(calls.clone()))
        .unwrap();

    let repo = factory.get_typed::<Repo>("repo").unwrap();
    assert!(repo.data_source.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unsatisfiable_single_constructor_reports_dependency() {
    let factory = BeanFactory::new();
    let ty = TypeInfo::class("Repo").build();
    factory
        .register_bean_definition(
            "repo",
            BeanDefinition::new(ty.clone()).constructor(ConstructorCandidate::new(
                vec![ParameterDescriptor::new("dataSource", data_source_type())],
                move |_| Ok(Instance::new(Repo { data_source: None }, ty.clone())),
            )),
        )
        .unwrap();

    let err = factory.get_bean("repo").unwrap_err();
    assert!(matches!(err, CoreError::UnsatisfiedDependency { .. }), "unexpected error: {}", err);
    assert!(err.cause().map_or(false, CoreError::is_no_such_bean));
}

#[test]
fn test_static_and_instance_factory_methods() {
    let connection = TypeInfo::class("Connection").build();
    let pool = TypeInfo::class("Pool").build();
    let factory = BeanFactory::new();

    let conn_type = connection.clone();
    factory
        .register_bean_definition(
            "primaryConnection",
            BeanDefinition::new(connection.clone())
                .with_factory_method("open")
                .factory_method(FactoryMethodCandidate::static_method(
                    "open",
                    vec![ParameterDescriptor::new("url", TypeInfo::string())],
                    connection.clone(),
                    move |args| Ok(Instance::new(args[0].as_str().unwrap_or_default().to_string(), conn_type.clone())),
                ))
                .constructor_arg(0, ValueHolder::literal("mem://primary")),
        )
        .unwrap();

    let pool_type = pool.clone();
    factory
        .register_bean_definition(
            "pool",
            BeanDefinition::new(pool.clone())
                .constructor(ConstructorCandidate::no_arg(move || Ok(Instance::new(7_i64, pool_type.clone())))),
        )
        .unwrap();

    let leased_type = connection.clone();
    factory
        .register_bean_definition(
            "leased",
            BeanDefinition::new(connection.clone())
                .with_factory_bean("pool")
                .with_factory_method("lease")
                .factory_method(FactoryMethodCandidate::new(
                    "lease",
                    Vec::new(),
                    Some(connection.clone()),
                    move |pool, _| {
                        let size = pool.and_then(|p| p.downcast_ref::<i64>().copied()).unwrap_or_default();
                        Ok(Some(Instance::new(format!("lease-from-{}", size), leased_type.clone())))
                    },
                )),
        )
        .unwrap();

    let primary = factory.get_bean("primaryConnection").unwrap();
    assert_eq!(primary.downcast_ref::<String>().map(String::as_str), Some("mem://primary"));
    let leased = factory.get_bean("leased").unwrap();
    assert_eq!(leased.downcast_ref::<String>().map(String::as_str), Some("lease-from-7"));
    assert_eq!(factory.registry().dependent_beans("pool"), vec!["leased".to_string()]);
    assert_eq!(factory.bean_names_for_type(&connection).len(), 2);
}

#[test]
fn test_void_factory_method_is_rejected() {
    let ty = TypeInfo::class("Connection").build();
    let factory = BeanFactory::new();
    factory
        .register_bean_definition(
            "broken",
            BeanDefinition::new(ty)
                .with_factory_method("init")
                .factory_method(FactoryMethodCandidate::new("init", Vec::new(), None, |_, _| Ok(None)).as_static()),
        )
        .unwrap();

    let err = factory.get_bean("broken").unwrap_err();
    assert!(err.is_configuration(), "unexpected error: {}", err);
}

#[test]
fn test_concurrent_lookups_share_one_singleton() {
    let factory = BeanFactory::new();
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let ty = TypeInfo::class("Slow").build();
    factory
        .register_bean_definition(
            "slow",
            BeanDefinition::new(ty.clone()).constructor(ConstructorCandidate::no_arg(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(Instance::new((), ty.clone()))
            })),
        )
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let factory = factory.clone();
            std::thread::spawn(move || factory.get_bean("slow").unwrap())
        })
        .collect();
    let beans: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(beans.windows(2).all(|pair| pair[0].ptr_eq(&pair[1])));
}

#[test]
fn test_dependents_are_destroyed_first() {
    let factory = BeanFactory::new();
    let destroyed = Arc::new(Mutex::new(Vec::new()));

    let chain = [("dataSource", None), ("repo", Some("dataSource")), ("service", Some("repo"))];
    for (name, peer) in chain {
        let log = destroyed.clone();
        let definition = node_definition("Node", peer).with_destroy(move |_| {
            log.lock().push(name);
            Ok(())
        });
        factory.register_bean_definition(name, definition).unwrap();
    }

    // creating only the leaf still pulls in the whole chain
    factory.get_bean("service").unwrap();
    factory.destroy_singletons();

    assert_eq!(*destroyed.lock(), vec!["service", "repo", "dataSource"]);
    assert_eq!(factory.registry().singleton_count(), 0);
}

#[test]
fn test_failed_creation_reports_property_and_leaves_no_singleton() {
    let factory = BeanFactory::new();
    factory
        .register_bean_definition("a", node_definition("A", Some("missing")))
        .unwrap();

    let err = factory.get_bean("a").unwrap_err();
    let message = err.to_string();
    assert!(
        err.find_in_chain(|e| e.to_string().contains("Cannot resolve reference to bean 'missing'"))
            .is_some(),
        "{}",
        message
    );
    assert!(!factory.registry().contains_singleton("a"));

    let definition = factory.bean_definition("a").unwrap();
    let names: Vec<&str> = definition
        .property_values()
        .iter()
        .map(|p: &PropertyValue| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["peer"]);
}

/// Records which constructor or factory method produced the bean
struct Picked(&'static str);

fn picking(label: &'static str, ty: &TypeInfo, params: Vec<ParameterDescriptor>) -> ConstructorCandidate {
    let ty = ty.clone();
    ConstructorCandidate::new(params, move |_| Ok(Instance::new(Picked(label), ty.clone())))
}

fn register_plain(factory: &BeanFactory, name: &str, ty: &TypeInfo) {
    let ty = ty.clone();
    factory
        .register_bean_definition(
            name,
            BeanDefinition::new(ty.clone()).constructor(ConstructorCandidate::no_arg(move || Ok(Instance::new((), ty.clone())))),
        )
        .unwrap();
}

#[test]
fn test_closer_longer_constructor_beats_generic_shorter_one() {
    let account = TypeInfo::class("Account").build();
    let service = TypeInfo::class("TransferService").build();
    let factory = BeanFactory::new();
    register_plain(&factory, "account", &account);
    factory
        .register_bean_definition(
            "transfers",
            BeanDefinition::new(service.clone())
                .autowire_constructor()
                .constructor(picking(
                    "object",
                    &service,
                    vec![ParameterDescriptor::new("source", TypeInfo::object())],
                ))
                .constructor(
                    picking(
                        "accounts",
                        &service,
                        vec![
                            ParameterDescriptor::new("from", account.clone()),
                            ParameterDescriptor::new("to", account.clone()),
                        ],
                    )
                    .non_public(),
                ),
        )
        .unwrap();

    // (object) weighs 2, the exact (Account, Account) pair weighs 0
    let picked = factory.get_typed::<Picked>("transfers").unwrap();
    assert_eq!(picked.0, "accounts");
}

fn audited_types() -> (TypeInfo, TypeInfo, TypeInfo) {
    let auditable = TypeInfo::interface("Auditable").build();
    let versioned = TypeInfo::interface("Versioned").build();
    let ledger = TypeInfo::class("Ledger")
        .implements(&auditable)
        .implements(&versioned)
        .build();
    (auditable, versioned, ledger)
}

fn two_way_definition(service: &TypeInfo, auditable: &TypeInfo, versioned: &TypeInfo) -> BeanDefinition {
    BeanDefinition::new(service.clone())
        .autowire_constructor()
        .constructor(picking(
            "auditable",
            service,
            vec![ParameterDescriptor::new("auditable", auditable.clone())],
        ))
        .constructor(picking(
            "versioned",
            service,
            vec![ParameterDescriptor::new("versioned", versioned.clone())],
        ))
}

#[test]
fn test_lenient_tie_takes_first_declared_constructor() {
    let (auditable, versioned, ledger) = audited_types();
    let service = TypeInfo::class("Reporter").build();
    let factory = BeanFactory::new();
    register_plain(&factory, "ledger", &ledger);
    factory
        .register_bean_definition("reporter", two_way_definition(&service, &auditable, &versioned))
        .unwrap();

    let picked = factory.get_typed::<Picked>("reporter").unwrap();
    assert_eq!(picked.0, "auditable");
}

#[test]
fn test_strict_resolution_rejects_equally_weighted_constructors() {
    let (auditable, versioned, ledger) = audited_types();
    let service = TypeInfo::class("Reporter").build();
    let factory = BeanFactory::new();
    register_plain(&factory, "ledger", &ledger);
    factory
        .register_bean_definition(
            "reporter",
            two_way_definition(&service, &auditable, &versioned).lenient(false),
        )
        .unwrap();

    let err = factory.get_bean("reporter").unwrap_err();
    let ambiguous = err.find_in_chain(|e| matches!(e, CoreError::AmbiguousCandidates { .. }));
    match ambiguous {
        Some(CoreError::AmbiguousCandidates { kind, candidates, .. }) => {
            assert_eq!(kind, "constructor");
            assert_eq!(candidates.len(), 2);
        }
        _ => panic!("unexpected error: {}", err),
    }
    assert!(!factory.registry().contains_singleton("reporter"));
}

#[test]
fn test_strict_resolution_rejects_overloaded_factory_methods() {
    let (auditable, versioned, ledger) = audited_types();
    let service = TypeInfo::class("Reporter").build();
    let factory = BeanFactory::new();
    register_plain(&factory, "ledger", &ledger);

    let overload = |label: &'static str, param: &TypeInfo| {
        let ty = service.clone();
        FactoryMethodCandidate::static_method(
            "create",
            vec![ParameterDescriptor::new("source", param.clone())],
            service.clone(),
            move |_| Ok(Instance::new(Picked(label), ty.clone())),
        )
    };
    factory
        .register_bean_definition(
            "reporter",
            BeanDefinition::new(service.clone())
                .autowire_constructor()
                .with_factory_method("create")
                .factory_method(overload("auditable", &auditable))
                .factory_method(overload("versioned", &versioned))
                .lenient(false),
        )
        .unwrap();

    let err = factory.get_bean("reporter").unwrap_err();
    assert!(
        err.find_in_chain(|e| matches!(e, CoreError::AmbiguousCandidates { .. }))
            .is_some(),
        "unexpected error: {}",
        err
    );
}

struct PluginHost {
    plugins: usize,
}

#[test]
fn test_lone_collection_constructor_gets_empty_collection() {
    let plugin = TypeInfo::interface("Plugin").build();
    let host = TypeInfo::class("PluginHost").build();
    let host_type = host.clone();
    let factory = BeanFactory::new();
    factory
        .register_bean_definition(
            "host",
            BeanDefinition::new(host).constructor(ConstructorCandidate::new(
                vec![ParameterDescriptor::new("plugins", TypeInfo::collection_of(&plugin))],
                move |args| {
                    let plugins = args[0]
                        .downcast_ref::<Vec<Instance>>()
                        .map(Vec::len)
                        .ok_or_else(|| CoreError::illegal_state("plugins are not a collection"))?;
                    Ok(Instance::new(PluginHost { plugins }, host_type.clone()))
                },
            )),
        )
        .unwrap();

    let host = factory.get_typed::<PluginHost>("host").unwrap();
    assert_eq!(host.plugins, 0);
}
