use std::sync::Arc;

use validate_schematron::{
    CatalogPolicy, CatalogResolver, Error, LocationKind, Resolution, ResourceIdentifier,
};

use crate::common::MapCatalog;

fn resolver(catalog: MapCatalog, allow_remote: bool) -> (CatalogResolver, Arc<MapCatalog>) {
    let catalog = Arc::new(catalog);
    let resolver = CatalogResolver::new(
        CatalogPolicy::new(vec![], true, allow_remote),
        Arc::clone(&catalog) as Arc<dyn validate_schematron::CatalogLookup>,
    );
    (resolver, catalog)
}

#[test]
fn test_identifier_without_namespace_passes_through() {
    let (resolver, catalog) = resolver(MapCatalog::new(), false);
    let identifier = ResourceIdentifier {
        literal_system_id: Some("http://example.com/entities.dtd".to_string()),
        ..Default::default()
    };

    let resolution = resolver.resolve_identifier(&identifier).unwrap();
    assert_eq!(resolution, Resolution::PassThrough(None));
    assert_eq!(
        catalog.lookups(),
        vec!["resolve - http://example.com/entities.dtd"]
    );
}

#[test]
fn test_system_id_rewritten_to_local_copy() {
    let (resolver, _catalog) = resolver(
        MapCatalog::new().with_system("http://example.com/order.xsd", "/opt/schemas/order.xsd"),
        false,
    );

    let resolution = resolver
        .resolve_identifier(&ResourceIdentifier::schema(
            "urn:example:order",
            "http://example.com/order.xsd",
        ))
        .unwrap();
    assert_eq!(
        resolution,
        Resolution::Local("/opt/schemas/order.xsd".to_string())
    );
}

#[test]
fn test_expanded_system_id_is_tried_second() {
    let (resolver, catalog) = resolver(
        MapCatalog::new().with_system("/data/order.xsd", "/opt/schemas/order.xsd"),
        false,
    );
    let identifier = ResourceIdentifier {
        namespace: Some("urn:example:order".to_string()),
        public_id: None,
        literal_system_id: Some("order.xsd".to_string()),
        expanded_system_id: Some("/data/order.xsd".to_string()),
    };

    let resolution = resolver.resolve_identifier(&identifier).unwrap();
    assert_eq!(resolution.location(), Some("/opt/schemas/order.xsd"));
    assert_eq!(
        catalog.lookups(),
        vec!["resolve - order.xsd", "resolve - /data/order.xsd"]
    );
}

#[test]
fn test_namespace_uri_is_the_last_catalog_lookup() {
    let (resolver, catalog) = resolver(
        MapCatalog::new().with_uri("urn:example:order", "file:///opt/schemas/order.xsd"),
        false,
    );

    let resolution = resolver
        .resolve_identifier(&ResourceIdentifier::schema(
            "urn:example:order",
            "http://example.com/order.xsd",
        ))
        .unwrap();

    assert_eq!(
        resolution,
        Resolution::Local("file:///opt/schemas/order.xsd".to_string())
    );
    assert_eq!(
        catalog.lookups(),
        vec![
            "resolve - http://example.com/order.xsd",
            "uri urn:example:order"
        ]
    );
}

#[test]
fn test_public_id_wins_when_present() {
    let (resolver, _catalog) = resolver(
        MapCatalog::new()
            .with_public("-//Example//Order//EN", "/public/order.xsd")
            .with_system("http://example.com/order.xsd", "/system/order.xsd"),
        false,
    );
    let identifier = ResourceIdentifier {
        public_id: Some("-//Example//Order//EN".to_string()),
        ..ResourceIdentifier::schema("urn:example:order", "http://example.com/order.xsd")
    };

    let resolution = resolver.resolve_identifier(&identifier).unwrap();
    assert_eq!(resolution.location(), Some("/public/order.xsd"));
}

#[test]
fn test_remote_location_denied_by_default() {
    let (resolver, _catalog) = resolver(MapCatalog::new(), false);

    let error = resolver
        .resolve_identifier(&ResourceIdentifier::schema(
            "urn:example:order",
            "https://example.com/order.xsd",
        ))
        .unwrap_err();

    match &error {
        Error::ResolutionDenied {
            namespace,
            location,
        } => {
            assert_eq!(namespace, "urn:example:order");
            assert_eq!(location, "https://example.com/order.xsd");
        }
        other => panic!("Expected ResolutionDenied, got {:?}", other),
    }
    assert!(error.is_recoverable());
    assert!(
        error
            .to_string()
            .contains("Only resources identified by the local catalog are enabled")
    );
}

#[test]
fn test_remote_location_allowed_by_policy() {
    let (resolver, _catalog) = resolver(MapCatalog::new(), true);

    let resolution = resolver
        .resolve_identifier(&ResourceIdentifier::schema(
            "urn:example:order",
            "https://example.com/order.xsd",
        ))
        .unwrap();
    assert_eq!(
        resolution,
        Resolution::RemoteAllowed("https://example.com/order.xsd".to_string())
    );
}

#[test]
fn test_unresolvable_identifier_is_fatal() {
    let (resolver, _catalog) = resolver(MapCatalog::new(), true);
    let identifier = ResourceIdentifier {
        namespace: Some("urn:example:order".to_string()),
        ..Default::default()
    };

    let error = resolver.resolve_identifier(&identifier).unwrap_err();
    assert!(matches!(error, Error::IdentifierUnresolved { .. }));
    assert!(!error.is_recoverable());
}

#[test]
fn test_location_classification() {
    assert_eq!(LocationKind::classify("/opt/order.xsd"), LocationKind::Local);
    assert_eq!(LocationKind::classify("schemas/order.xsd"), LocationKind::Local);
    assert_eq!(LocationKind::classify("file:///opt/order.xsd"), LocationKind::Local);
    assert_eq!(LocationKind::classify("C:\\schemas\\order.xsd"), LocationKind::Local);
    assert_eq!(LocationKind::classify("http://example.com/a.xsd"), LocationKind::Remote);
    assert_eq!(LocationKind::classify("ftp://example.com/a.xsd"), LocationKind::Remote);
    assert_eq!(LocationKind::classify(""), LocationKind::Remote);
}
