use std::fs;

use validate_schematron::{ContentCacheStore, Error, unique_cache_path};

use crate::common::{TestWorkspace, touch_forward};

#[test]
fn test_same_base_name_in_different_directories_never_collides() {
    let workspace = TestWorkspace::new();
    let first = workspace.write("a/rules.sch", "<a/>");
    let second = workspace.write("b/rules.sch", "<b/>");
    let cache_root = workspace.path("cache");

    let first_dir = unique_cache_path(&cache_root, &first).unwrap();
    let second_dir = unique_cache_path(&cache_root, &second).unwrap();

    assert_ne!(first_dir, second_dir);
    for dir in [&first_dir, &second_dir] {
        assert_eq!(dir.parent().unwrap(), cache_root);
        assert!(
            dir.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("rules.sch-")
        );
    }
}

#[test]
fn test_cache_path_is_stable() {
    let workspace = TestWorkspace::new();
    let rules = workspace.write("rules.sch", "<schema/>");
    let store = ContentCacheStore::new(workspace.path("cache"));

    assert_eq!(
        store.unique_cache_path(&rules).unwrap(),
        store.unique_cache_path(&rules).unwrap()
    );
}

#[test]
fn test_staleness_follows_source_timestamp() {
    let workspace = TestWorkspace::new();
    let source = workspace.write("lookup.xml", "<codes/>");
    let artifact = workspace.path("cache/lookup.xml");
    let store = ContentCacheStore::new(workspace.path("cache"));

    assert!(store.is_stale(&artifact, &source).unwrap());
    assert!(store.cache_copy(&source, &artifact).unwrap());
    assert!(!store.is_stale(&artifact, &source).unwrap());
    assert!(!store.cache_copy(&source, &artifact).unwrap());

    fs::write(&source, "<codes><code/></codes>").unwrap();
    touch_forward(&source, 60);
    assert!(store.is_stale(&artifact, &source).unwrap());
    assert!(store.cache_copy(&source, &artifact).unwrap());
    assert_eq!(
        fs::read_to_string(&artifact).unwrap(),
        "<codes><code/></codes>"
    );
}

#[test]
fn test_failed_write_leaves_previous_artifact() {
    let workspace = TestWorkspace::new();
    let source = workspace.write("rules.sch", "<schema/>");
    let artifact = workspace.path("cache/rules.xsl");
    let store = ContentCacheStore::new(workspace.path("cache"));

    store
        .write_atomic(&source, &artifact, |temp| {
            fs::write(temp, "compiled v1")?;
            Ok(())
        })
        .unwrap();

    touch_forward(&source, 60);
    let result: validate_schematron::Result<()> = store.write_atomic(&source, &artifact, |temp| {
        fs::write(temp, "half written")?;
        Err(Error::Engine {
            details: "processor crashed".to_string(),
        })
    });

    assert!(result.is_err());
    assert_eq!(fs::read_to_string(&artifact).unwrap(), "compiled v1");
    // The artifact still belongs to the old source, so it stays stale.
    assert!(store.is_stale(&artifact, &source).unwrap());
    assert_eq!(fs::read_dir(workspace.path("cache")).unwrap().count(), 1);
}

#[test]
fn test_missing_source_is_an_io_error() {
    let workspace = TestWorkspace::new();
    let store = ContentCacheStore::new(workspace.path("cache"));

    let error = store
        .is_stale(&workspace.path("cache/x.xsl"), &workspace.path("absent.sch"))
        .unwrap_err();
    assert!(matches!(error, Error::ResourceIo { .. }));
}
