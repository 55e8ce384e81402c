use std::process::Command;
use std::sync::Arc;

use validate_schematron::assets::SUPPORT_ASSETS;
use validate_schematron::{
    CatalogPolicy, ContentCacheStore, HttpClientConfig, LibXml2SchemaEngine,
    ProcessTransformEngine, SchematronCompiler, ValidationOrchestrator,
};

use crate::common::TestWorkspace;

fn binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_validate-schematron"))
}

#[test]
fn test_cli_help_lists_catalog_example() {
    let output = binary().arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("--catalog"));
    assert!(stdout.contains("--schematron"));
    assert!(stdout.contains("--allow-remote"));
    assert!(stdout.contains("urn:oasis:names:tc:entity:xmlns:xml:catalog"));
}

#[test]
fn test_cli_requires_inputs() {
    let output = binary().output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_cli_reports_invalid_document() {
    let workspace = TestWorkspace::new();
    let files = workspace.with_orders(&[("good.xml", "Initech", "2"), ("bad.xml", "Initech", "two")]);

    let output = binary()
        .arg("--cache-dir")
        .arg(workspace.path("cache"))
        .args(&files)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains(&format!("Validation FAILED on {} line 6", files[1])));
    assert!(stdout.contains("Validated 1 of 2 files"));
}

#[test]
fn test_cli_json_report_for_valid_glob() {
    let workspace = TestWorkspace::new();
    workspace.with_orders(&[("in/a.xml", "Initech", "1"), ("in/b.xml", "Initech", "2")]);
    // Schema hints are relative to each document.
    workspace.write("in/order.xsd", crate::common::ORDER_XSD);

    let output = binary()
        .args(["--format", "json", "--workers", "2"])
        .arg(format!("{}/in/*.xml", workspace.root().display()))
        .output()
        .unwrap();

    assert!(output.status.success(), "{:?}", output);
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["files_validated"], 2);
}

#[test]
fn test_cli_accepts_file_urls() {
    let workspace = TestWorkspace::new();
    let files = workspace.with_orders(&[("a.xml", "Initech", "4")]);

    let output = binary()
        .arg("--cache-dir")
        .arg(workspace.path("cache"))
        .arg(format!("file://{}", files[0]))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0), "{:?}", output);
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Validated 1 of 1 file"));
}

const LINE_ITEM_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:order" xmlns="urn:example:order"
           elementFormDefault="qualified">
  <xs:element name="order">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="item" maxOccurs="unbounded">
          <xs:complexType>
            <xs:sequence>
              <xs:element name="sku" type="xs:string"/>
              <xs:element name="quantity" type="xs:integer"/>
            </xs:sequence>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

const LINE_ITEM_RULES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sch:schema xmlns:sch="http://purl.oclc.org/dsdl/schematron">
  <sch:ns prefix="o" uri="urn:example:order"/>
  <sch:pattern>
    <sch:rule context="o:item">
      <sch:assert test="o:quantity &gt; 0">Quantity must be positive</sch:assert>
    </sch:rule>
  </sch:pattern>
</sch:schema>
"#;

fn line_item_order(quantities: &[&str]) -> String {
    let items: String = quantities
        .iter()
        .enumerate()
        .map(|(i, quantity)| {
            format!(
                "  <item><sku>SKU-{}</sku><quantity>{}</quantity></item>\n",
                i, quantity
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<order xmlns="urn:example:order"
       xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
       xsi:schemaLocation="urn:example:order line-items.xsd">
{}</order>
"#,
        items
    )
}

fn xsltproc() -> Option<Arc<ProcessTransformEngine>> {
    let engine = ProcessTransformEngine::xsltproc();
    if engine.is_available() {
        Some(Arc::new(engine))
    } else {
        eprintln!("xsltproc not installed, skipping");
        None
    }
}

#[test]
fn test_support_stylesheets_compile_rules() {
    let Some(engine) = xsltproc() else {
        return;
    };
    let workspace = TestWorkspace::new();
    let rules = workspace.write("rules/line-items.sch", LINE_ITEM_RULES);
    let compiler = SchematronCompiler::new(
        ContentCacheStore::new(workspace.path("cache")),
        Arc::clone(&engine),
    );

    let compiled = compiler.compile(&rules).unwrap();

    assert!(compiled.recompiled);
    assert!(workspace.path("cache").join(SUPPORT_ASSETS[0].name).is_file());
    let stylesheet = std::fs::read_to_string(&compiled.artifact).unwrap();
    assert!(stylesheet.contains("http://www.w3.org/1999/XSL/Transform"));
    assert!(stylesheet.contains("Quantity must be positive"));
    assert!(!compiler.compile(&rules).unwrap().recompiled);
}

#[test]
fn test_xsltproc_pipeline_reports_failed_assertion() {
    let Some(engine) = xsltproc() else {
        return;
    };
    let workspace = TestWorkspace::new();
    let rules = workspace.write("rules/line-items.sch", LINE_ITEM_RULES);
    workspace.write("line-items.xsd", LINE_ITEM_XSD);
    workspace.write("positive.xml", &line_item_order(&["3", "1"]));
    workspace.write("negative.xml", &line_item_order(&["2", "-1"]));
    let files = vec![
        workspace.path_string("positive.xml"),
        workspace.path_string("negative.xml"),
    ];

    let schema_engine =
        LibXml2SchemaEngine::from_policy(CatalogPolicy::default(), HttpClientConfig::default())
            .unwrap();
    let compiler = SchematronCompiler::new(
        ContentCacheStore::new(workspace.path("cache")),
        Arc::clone(&engine),
    );
    let orchestrator =
        ValidationOrchestrator::new(Arc::new(schema_engine), Arc::new(compiler), engine);

    let report = orchestrator.validate_batch(&files, Some(&rules)).unwrap();

    assert!(report.outcomes[0].is_valid(), "{:?}", report.outcomes[0]);
    assert_eq!(report.files_validated, 1);
    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    let error = &report.errors[0];
    assert!(error.message.contains("Quantity must be positive"));
    assert_eq!(error.source_file.as_deref(), Some(files[1].as_str()));
}
