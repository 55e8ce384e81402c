use std::sync::Arc;

use validate_schematron::{
    CatalogLookup, CatalogPolicy, CatalogResolver, ContentCacheStore, HttpClientConfig,
    LibXml2SchemaEngine, RemoteFetcher, SchematronCompiler, ValidationOrchestrator,
};

use crate::common::{
    MapCatalog, ORDER_NAMESPACE, ORDER_XSD, RuleCheckEngine, TestWorkspace, order_document,
};

const REMOTE_SCHEMA: &str = "http://schemas.example.invalid/order.xsd";

fn batch_with(
    workspace: &TestWorkspace,
    schema_engine: LibXml2SchemaEngine,
) -> ValidationOrchestrator<LibXml2SchemaEngine, RuleCheckEngine> {
    let engine = Arc::new(RuleCheckEngine::new());
    let compiler = SchematronCompiler::new(
        ContentCacheStore::new(workspace.path("cache")),
        Arc::clone(&engine),
    );
    ValidationOrchestrator::new(Arc::new(schema_engine), Arc::new(compiler), engine)
}

/// One document importing the schema remotely, one importing it locally
fn remote_and_local(workspace: &TestWorkspace) -> Vec<String> {
    workspace.write("order.xsd", ORDER_XSD);
    workspace.write("remote.xml", &order_document("Initech", "1", REMOTE_SCHEMA));
    workspace.write("local.xml", &order_document("Initech", "2", "order.xsd"));
    vec![
        workspace.path_string("remote.xml"),
        workspace.path_string("local.xml"),
    ]
}

#[test]
fn test_remote_import_is_reported_and_batch_continues() {
    let workspace = TestWorkspace::new();
    let files = remote_and_local(&workspace);
    let schema_engine =
        LibXml2SchemaEngine::from_policy(CatalogPolicy::default(), HttpClientConfig::default())
            .unwrap();

    let report = batch_with(&workspace, schema_engine)
        .validate_batch(&files, None)
        .unwrap();

    assert_eq!(report.files_validated, 1);
    assert_eq!(report.errors.len(), 1);
    let error = &report.outcomes[0].errors[0];
    assert_eq!(error.source_file.as_deref(), Some(files[0].as_str()));
    assert!(error.message.contains(ORDER_NAMESPACE));
    assert!(error.message.contains("is not resolved to local path"));
    assert!(report.outcomes[1].is_valid());
}

#[test]
fn test_catalog_file_maps_remote_import_to_local_copy() {
    let workspace = TestWorkspace::new();
    let files = remote_and_local(&workspace);
    let catalog = workspace.write(
        "catalog.xml",
        &format!(
            r#"<?xml version="1.0"?>
<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog">
  <system systemId="{}" uri="file://{}"/>
</catalog>"#,
            REMOTE_SCHEMA,
            workspace.path("order.xsd").display()
        ),
    );
    let policy = CatalogPolicy::new(vec![catalog], true, false);
    let schema_engine =
        LibXml2SchemaEngine::from_policy(policy, HttpClientConfig::default()).unwrap();

    let report = batch_with(&workspace, schema_engine)
        .validate_batch(&files, None)
        .unwrap();

    assert!(report.is_success(), "{:?}", report.errors);
    assert_eq!(report.files_validated, 2);
}

#[test]
fn test_namespace_mapping_through_custom_lookup() {
    let workspace = TestWorkspace::new();
    let files = remote_and_local(&workspace);
    let lookup = Arc::new(
        MapCatalog::new().with_uri(ORDER_NAMESPACE, workspace.path_string("order.xsd")),
    );
    let resolver = CatalogResolver::new(
        CatalogPolicy::default(),
        Arc::clone(&lookup) as Arc<dyn CatalogLookup>,
    );
    let schema_engine = LibXml2SchemaEngine::new(
        resolver,
        RemoteFetcher::new(HttpClientConfig::default()).unwrap(),
    );

    let report = batch_with(&workspace, schema_engine)
        .validate_batch(&files[..1], None)
        .unwrap();

    assert!(report.is_success(), "{:?}", report.errors);
    assert!(
        lookup
            .lookups()
            .contains(&format!("uri {}", ORDER_NAMESPACE))
    );
}

#[test]
fn test_missing_catalog_file_fails_engine_construction() {
    let workspace = TestWorkspace::new();
    let policy = CatalogPolicy::new(vec![workspace.path("missing-catalog.xml")], true, false);
    assert!(LibXml2SchemaEngine::from_policy(policy, HttpClientConfig::default()).is_err());
}
