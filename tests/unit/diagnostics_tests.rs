use validate_schematron::{
    BatchReport, DiagnosticCollector, DiagnosticListener, DiagnosticLocation, Error, FileOutcome,
    Severity, ValidationError, ValidationFailure,
};

#[test]
fn test_validation_error_display() {
    let error = ValidationError::new("Element 'quantity': 'ten' is not a valid value")
        .with_file("orders/a.xml")
        .at(Some(6), Some(3));
    assert_eq!(
        error.to_string(),
        "orders/a.xml line 6, col 3: Element 'quantity': 'ten' is not a valid value"
    );

    let bare = ValidationError::new("no schema location found");
    assert_eq!(bare.to_string(), "no schema location found");
}

#[test]
fn test_failure_lists_one_error_per_line() {
    let failure = ValidationFailure::new(vec![
        ValidationError::new("first").with_file("a.xml"),
        ValidationError::new("second").with_file("b.xml").at(Some(2), None),
    ]);
    assert_eq!(
        failure.to_string(),
        "2 validation errors\n  a.xml first\n  b.xml line 2: second"
    );
}

#[test]
fn test_collector_attributes_diagnostics() {
    let mut collector = DiagnosticCollector::for_document("doc.xml");
    collector.report(Severity::Warning, "  padded  ", &DiagnosticLocation::line(4));
    collector.fatal_error(
        "included file broken",
        &DiagnosticLocation {
            system_id: Some("file:///schemas/common.xsd".to_string()),
            line: Some(9),
            column: Some(1),
        },
    );

    let errors = collector.into_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].message, "padded");
    assert_eq!(errors[0].source_file.as_deref(), Some("doc.xml"));
    assert_eq!(errors[0].line, Some(4));
    assert_eq!(errors[1].source_file.as_deref(), Some("/schemas/common.xsd"));
}

#[test]
fn test_batch_report_into_result() {
    let clean = BatchReport {
        files_validated: 2,
        outcomes: vec![
            FileOutcome {
                file: "a.xml".to_string(),
                errors: vec![],
                duration_ms: 1,
            },
            FileOutcome {
                file: "b.xml".to_string(),
                errors: vec![],
                duration_ms: 1,
            },
        ],
        ..Default::default()
    };
    assert_eq!(clean.into_result().unwrap(), 2);

    let failing = BatchReport {
        errors: vec![ValidationError::new("bad").with_file("c.xml")],
        ..Default::default()
    };
    match failing.into_result() {
        Err(Error::Validation(failure)) => assert_eq!(failure.len(), 1),
        other => panic!("Expected validation failure, got {:?}", other),
    }
}
