use std::fs;
use std::sync::Arc;

use rayon::prelude::*;
use validate_schematron::{ContentCacheStore, Error, SchematronCompiler};

use crate::common::{RuleCheckEngine, TestWorkspace, touch_forward};

fn compiler(workspace: &TestWorkspace) -> (SchematronCompiler<RuleCheckEngine>, Arc<RuleCheckEngine>) {
    let engine = Arc::new(RuleCheckEngine::new());
    let compiler = SchematronCompiler::new(
        ContentCacheStore::new(workspace.path("cache")),
        Arc::clone(&engine),
    );
    (compiler, engine)
}

#[test]
fn test_artifact_is_reused_until_rules_change() {
    let workspace = TestWorkspace::new();
    let rules = workspace.write("rules/orders.sch", "<schema>\nforbid:ACME\n</schema>\n");
    let (compiler, engine) = compiler(&workspace);

    let first = compiler.compile(&rules).unwrap();
    let second = compiler.compile(&rules).unwrap();
    assert_eq!(engine.counters.compiles(), 1);
    assert_eq!(first.artifact, second.artifact);
    assert!(first.artifact.ends_with("orders.xsl"));

    fs::write(&rules, "<schema>\nforbid:GLOBEX\n</schema>\n").unwrap();
    touch_forward(&rules, 60);

    let third = compiler.compile(&rules).unwrap();
    assert!(third.recompiled);
    assert_eq!(engine.counters.compiles(), 2);
    assert!(
        fs::read_to_string(&third.artifact)
            .unwrap()
            .contains("forbid:GLOBEX")
    );
}

#[test]
fn test_support_assets_are_materialized_once() {
    let workspace = TestWorkspace::new();
    let rules = workspace.write("orders.sch", "<schema/>");
    let (compiler, _engine) = compiler(&workspace);

    compiler.compile(&rules).unwrap();
    let meta = workspace.path("cache/schematron_message.xsl");
    let skeleton = workspace.path("cache/schematron_skeleton.xsl");
    assert!(meta.is_file());
    assert!(skeleton.is_file());

    // A local edit to an asset survives; assets are only written when missing.
    fs::write(&meta, "<!-- patched -->").unwrap();
    compiler.compile(&rules).unwrap();
    assert_eq!(fs::read_to_string(&meta).unwrap(), "<!-- patched -->");
}

#[test]
fn test_rules_with_same_name_get_separate_artifacts() {
    let workspace = TestWorkspace::new();
    let first = workspace.write("team-a/rules.sch", "<schema>\nforbid:A\n</schema>\n");
    let second = workspace.write("team-b/rules.sch", "<schema>\nforbid:B\n</schema>\n");
    let (compiler, engine) = compiler(&workspace);

    let first = compiler.compile(&first).unwrap();
    let second = compiler.compile(&second).unwrap();

    assert_ne!(first.artifact, second.artifact);
    assert_eq!(engine.counters.compiles(), 2);
    assert!(fs::read_to_string(&first.artifact).unwrap().contains("forbid:A"));
    assert!(fs::read_to_string(&second.artifact).unwrap().contains("forbid:B"));
}

#[test]
fn test_dependency_changes_propagate_without_recompiling() {
    let workspace = TestWorkspace::new();
    let rules = workspace.write(
        "rules/orders.sch",
        r#"<let name="codes" value="document('codes/allowed.xml')"/>"#,
    );
    let codes = workspace.write("rules/codes/allowed.xml", "<codes><code>A</code></codes>");
    let (compiler, engine) = compiler(&workspace);

    let first = compiler.compile(&rules).unwrap();
    assert_eq!(first.dependencies.len(), 1);
    let cached = first.dependencies[0].cached.clone();
    assert_eq!(cached, first.artifact.parent().unwrap().join("codes/allowed.xml"));
    assert_eq!(
        fs::read_to_string(&cached).unwrap(),
        "<codes><code>A</code></codes>"
    );

    fs::write(&codes, "<codes><code>B</code></codes>").unwrap();
    touch_forward(&codes, 60);

    let second = compiler.compile(&rules).unwrap();
    assert!(!second.recompiled);
    assert!(second.dependencies[0].refreshed);
    assert_eq!(engine.counters.compiles(), 1);
    assert_eq!(
        fs::read_to_string(&cached).unwrap(),
        "<codes><code>B</code></codes>"
    );
}

#[test]
fn test_dependency_outside_rules_directory_is_cached() {
    let workspace = TestWorkspace::new();
    workspace.write("shared/codes.xml", "<codes/>");
    let rules = workspace.write(
        "rules/orders.sch",
        r#"<let name="codes" value="document('../shared/codes.xml')"/>"#,
    );
    let (compiler, engine) = compiler(&workspace);

    let compiled = compiler.compile(&rules).unwrap();
    assert_eq!(engine.counters.compiles(), 1);
    assert_eq!(compiled.dependencies.len(), 1);

    let cached = &compiled.dependencies[0].cached;
    let artifact_dir = compiled.artifact.parent().unwrap();
    assert_eq!(*cached, artifact_dir.parent().unwrap().join("shared/codes.xml"));
    assert!(cached.starts_with(workspace.path("cache")));
    assert_eq!(fs::read_to_string(cached).unwrap(), "<codes/>");
}

#[test]
fn test_failed_compilation_is_not_cached() {
    let workspace = TestWorkspace::new();
    let rules = workspace.write("rules/orders.sch", "<broken>");
    let (compiler, engine) = compiler(&workspace);

    for _ in 0..2 {
        match compiler.compile(&rules) {
            Err(Error::Compilation { failure, .. }) => {
                assert_eq!(failure.errors[0].message, "rules are not well-formed")
            }
            other => panic!("Expected compilation failure, got {:?}", other),
        }
    }
    // Nothing was cached, so the second call compiled again.
    assert_eq!(engine.counters.compiles(), 2);
}

#[test]
fn test_concurrent_compiles_agree_on_one_artifact() {
    let workspace = TestWorkspace::new();
    let rules = workspace.write("rules/orders.sch", "<schema>\nforbid:ACME\n</schema>\n");
    let (compiler, engine) = compiler(&workspace);

    let artifacts: Vec<_> = (0..16)
        .into_par_iter()
        .map(|_| compiler.compile(&rules).unwrap().artifact)
        .collect();

    assert!(artifacts.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(engine.counters.compiles(), 1);
    assert_eq!(
        fs::read_to_string(&artifacts[0]).unwrap(),
        "<schema>\nforbid:ACME\n</schema>\n"
    );
}
