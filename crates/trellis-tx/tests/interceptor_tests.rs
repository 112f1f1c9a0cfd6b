//! Integration tests for declarative transactions through proxies

use std::sync::Arc;

use trellis_aop::proxy::is_aop_proxy;
use trellis_aop::ProxyFactory;
use trellis_core::{Instance, InvocationError, Method, TypeInfo};
use trellis_tx::{
    current_transaction_status, MemoryStore, MemoryStoreTransactionManager, NameMatchTransactionAttributeSource,
    PlatformTransactionManager, Propagation, TransactionAttributeSourceAdvisor, TransactionError,
    TransactionInterceptor, TransactionTemplate,
};

#[derive(Debug, thiserror::Error)]
#[error("account overdrawn")]
struct Overdrawn;

#[derive(Debug, thiserror::Error)]
#[error("quote is stale")]
struct StaleQuote;

fn store_error(err: TransactionError) -> InvocationError {
    err.into()
}

fn account_class(store: &Arc<MemoryStore>) -> TypeInfo {
    let deposit_store = store.clone();
    let withdraw_store = store.clone();
    let quote_store = store.clone();
    let audit_store = store.clone();
    let note_store = store.clone();
    TypeInfo::class("AccountService")
        .method(Method::new("deposit").param(TypeInfo::int()).body(move |_, args| {
            let amount = args[0].as_int().unwrap_or_default();
            deposit_store.put("balance", amount.to_string()).map_err(store_error)?;
            let status = current_transaction_status().map_err(store_error)?;
            Ok(Some(Instance::string(status.name().unwrap_or_default())))
        }))
        .method(Method::new("withdraw").param(TypeInfo::int()).body(move |_, args| {
            withdraw_store.put("withdrawal", args[0].as_int().unwrap_or_default().to_string()).map_err(store_error)?;
            Err(InvocationError::unchecked(Overdrawn))
        }))
        .method(Method::new("refreshQuote").body(move |_, _| {
            quote_store.put("quote", "1.10").map_err(store_error)?;
            Err(InvocationError::checked(StaleQuote))
        }))
        .method(Method::new("auditTransfer").body(move |_, _| {
            audit_store.put("audit", "transfer").map_err(store_error)?;
            Ok(None)
        }))
        .method(Method::new("note").body(move |_, _| {
            note_store.put("note", "plain").map_err(store_error)?;
            Ok(Some(Instance::boolean(current_transaction_status().is_ok())))
        }))
        .build()
}

fn account_service(store: &Arc<MemoryStore>, manager: Arc<dyn PlatformTransactionManager>) -> Instance {
    let source = NameMatchTransactionAttributeSource::with_properties([
        ("deposit", "PROPAGATION_REQUIRED"),
        ("withdraw", "PROPAGATION_REQUIRED"),
        ("refreshQuote", "PROPAGATION_REQUIRED"),
        ("audit*", "PROPAGATION_REQUIRES_NEW"),
    ])
    .unwrap();
    let interceptor = TransactionInterceptor::new(manager, Arc::new(source));

    let factory = ProxyFactory::for_target(Instance::new((), account_class(store)));
    factory
        .add_advisor(TransactionAttributeSourceAdvisor::new(interceptor).into_advisor())
        .unwrap();
    factory.get_proxy().unwrap()
}

fn setup() -> (Arc<MemoryStore>, Arc<MemoryStoreTransactionManager>, Instance) {
    let store = MemoryStore::new("accounts");
    let manager = Arc::new(MemoryStoreTransactionManager::for_store(store.clone()));
    let service = account_service(&store, manager.clone());
    (store, manager, service)
}

#[test]
fn test_successful_call_commits() {
    let (store, _, service) = setup();
    assert!(is_aop_proxy(&service));

    let name = service.invoke("deposit", &[Instance::int(25)]).unwrap().unwrap();
    assert_eq!(name.as_str(), Some("AccountService.deposit"));
    assert_eq!(store.committed().get("balance").map(String::as_str), Some("25"));
    assert!(current_transaction_status().is_err());
}

#[test]
fn test_unchecked_error_rolls_back() {
    let (store, _, service) = setup();
    let err = service.invoke("withdraw", &[Instance::int(500)]).unwrap_err();
    assert!(err.is::<Overdrawn>());
    assert!(err.is_unchecked());
    assert!(store.committed().is_empty());
}

#[test]
fn test_checked_error_commits_by_default() {
    let (store, _, service) = setup();
    let err = service.invoke("refreshQuote", &[]).unwrap_err();
    assert!(err.is::<StaleQuote>());
    assert_eq!(store.committed().get("quote").map(String::as_str), Some("1.10"));
}

#[test]
fn test_rollback_rule_applies_to_checked_error() {
    let store = MemoryStore::new("quotes");
    let manager = Arc::new(MemoryStoreTransactionManager::for_store(store.clone()));
    let source = NameMatchTransactionAttributeSource::with_properties([("refreshQuote", "PROPAGATION_REQUIRED,-StaleQuote")])
        .unwrap();
    let factory = ProxyFactory::for_target(Instance::new((), account_class(&store)));
    factory
        .add_advisor(
            TransactionAttributeSourceAdvisor::new(TransactionInterceptor::new(manager, Arc::new(source))).into_advisor(),
        )
        .unwrap();
    let service = factory.get_proxy().unwrap();

    assert!(service.invoke("refreshQuote", &[]).is_err());
    assert!(store.committed().is_empty());
}

#[test]
fn test_methods_without_attribute_run_without_transaction() {
    let (store, _, service) = setup();
    let in_transaction = service.invoke("note", &[]).unwrap().unwrap();
    assert_eq!(in_transaction.as_bool(), Some(false));
    assert!(store.committed().contains_key("note"));
}

#[test]
fn test_requires_new_method_commits_independently_of_caller() {
    let (store, manager, service) = setup();
    let template = TransactionTemplate::new(manager.clone()).with_propagation(Propagation::Required);

    let outcome = template.execute(|_| -> Result<(), InvocationError> {
        store.put("draft", "x").map_err(store_error)?;
        service.invoke("auditTransfer", &[])?;
        Err(InvocationError::unchecked(Overdrawn))
    });
    assert!(outcome.unwrap_err().is::<Overdrawn>());

    let committed = store.committed();
    assert_eq!(committed.get("audit").map(String::as_str), Some("transfer"));
    assert!(!committed.contains_key("draft"));
}

#[test]
fn test_joined_failure_marks_caller_rollback_only() {
    let (store, manager, service) = setup();
    let template = TransactionTemplate::new(manager.clone());

    let outcome = template.execute(|_| -> Result<(), InvocationError> {
        store.put("draft", "x").map_err(store_error)?;
        // the failure is swallowed, but the shared transaction is already doomed
        let _ = service.invoke("withdraw", &[Instance::int(5)]);
        Ok(())
    });

    let err = outcome.unwrap_err();
    assert!(err
        .downcast_ref::<TransactionError>()
        .map(TransactionError::is_unexpected_rollback)
        .unwrap_or(false));
    assert!(store.committed().is_empty());
}
