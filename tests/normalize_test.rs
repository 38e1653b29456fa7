//! Integration tests for document preparation, validation and batches.

use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

use fhir_rdf_prep::{
    prepare, Batch, FileStatus, JsonSchemaValidator, LoadError, NormalizeError,
    NormalizeOptions, PathTypeResolver, SchemaGraph, ShapeValidator, StructuralValidator,
    ValidateError,
};

fn resolver() -> PathTypeResolver<'static> {
    PathTypeResolver::new(SchemaGraph::global().unwrap())
}

fn prepare_default(doc: Value) -> Value {
    prepare(doc, &resolver(), &NormalizeOptions::default())
        .unwrap()
        .tree
}

fn write_doc(dir: &TempDir, name: &str, doc: &Value) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, serde_json::to_string(doc).unwrap()).unwrap();
    path
}

fn patient() -> Value {
    json!({
        "resourceType": "Patient",
        "id": "example",
        "active": true,
        "name": [{ "use": "official", "family": "Chalmers", "given": ["Peter", "James"] }],
        "birthDate": "1974-12-25",
        "_birthDate": {
            "extension": [{
                "url": "http://hl7.org/fhir/StructureDefinition/patient-birthTime",
                "valueDateTime": "1974-12-25T14:35:45-05:00"
            }]
        },
        "managingOrganization": { "reference": "Organization/1" }
    })
}

// === Canonical form ===

mod canonical_form {
    use super::*;

    #[test]
    fn patient_round_out() {
        let tree = prepare_default(patient());

        assert_eq!(tree["@id"], "Patient/example");
        assert_eq!(tree["resourceType"], "fhir:Patient");
        assert_eq!(tree["nodeRole"], "fhir:treeRoot");
        assert_eq!(tree["active"], json!({ "value": true }));
        assert_eq!(tree["name"][0]["given"][1], json!({ "value": "James", "index": 1 }));
        assert_eq!(
            tree["managingOrganization"]["fhir:link"],
            json!({ "@id": "Organization/1", "@type": "fhir:Organization" })
        );
    }

    #[test]
    fn birth_date_extension_merged_and_typed() {
        let tree = prepare_default(patient());
        let birth = &tree["birthDate"];

        assert!(tree.get("_birthDate").is_none());
        assert_eq!(
            birth["value"]["@type"],
            "http://www.w3.org/2001/XMLSchema#date"
        );
        assert_eq!(
            birth["extension"][0]["url"],
            json!({ "value": "http://hl7.org/fhir/StructureDefinition/patient-birthTime" })
        );
        assert_eq!(birth["extension"][0]["index"], 0);
    }

    #[test]
    fn every_leaf_is_wrapped() {
        let tree = prepare_default(patient());
        let result = StructuralValidator.validate(
            &tree,
            "Patient/example",
            "http://hl7.org/fhir/shape/Patient",
        );
        assert!(result.is_ok(), "{:?}", result);
    }

    #[test]
    fn bundle_entries_link_to_each_other() {
        let tree = prepare_default(json!({
            "resourceType": "Bundle",
            "id": "bundle-example",
            "type": "searchset",
            "entry": [
                {
                    "fullUrl": "https://example.com/base/MedicationRequest/3123",
                    "resource": {
                        "resourceType": "MedicationRequest",
                        "id": "3123",
                        "subject": { "reference": "Patient/347" },
                        "medicationReference": { "reference": "Medication/example" }
                    }
                },
                {
                    "fullUrl": "https://example.com/base/Medication/example",
                    "resource": { "resourceType": "Medication", "id": "example" }
                }
            ]
        }));

        let request = &tree["entry"][0]["resource"];
        assert_eq!(request["@id"], "https://example.com/base/MedicationRequest/3123");
        assert_eq!(
            request["medicationReference"]["fhir:link"],
            json!({ "@id": "https://example.com/base/Medication/example" })
        );
        assert_eq!(
            request["subject"]["fhir:link"],
            json!({ "@id": "Patient/347", "@type": "fhir:Patient" })
        );
        assert_eq!(tree["entry"][1]["index"], 1);
    }

    #[test]
    fn contained_resources_anchor_under_container() {
        let tree = prepare_default(json!({
            "resourceType": "Condition",
            "id": "c1",
            "contained": [{ "resourceType": "Practitioner", "id": "p1" }],
            "asserter": { "reference": "#p1" }
        }));

        assert_eq!(tree["contained"][0]["@id"], "Condition/c1#p1");
        assert_eq!(tree["asserter"]["fhir:link"], json!({ "@id": "Condition/c1#p1" }));
    }

    #[test]
    fn referenced_types_are_collected() {
        let prepared = prepare(patient(), &resolver(), &NormalizeOptions::default()).unwrap();
        assert!(prepared.referenced_types.contains("Organization"));
    }

    #[test]
    fn preparation_is_deterministic() {
        let first = serde_json::to_string(&prepare_default(patient())).unwrap();
        let second = serde_json::to_string(&prepare_default(patient())).unwrap();
        assert_eq!(first, second);
    }
}

// === Options ===

mod options {
    use super::*;

    #[test]
    fn without_fhir_server_relative_references_step_up() {
        let options = NormalizeOptions::default().fhir_server(None);
        let tree = prepare(patient(), &resolver(), &options).unwrap().tree;
        assert_eq!(
            tree["managingOrganization"]["fhir:link"]["@id"],
            "../Organization/1"
        );
    }

    #[test]
    fn context_block_replaces_context_link() {
        let options = NormalizeOptions::default().add_context(true);
        let tree = prepare(patient(), &resolver(), &options).unwrap().tree;
        let context = tree["@context"].as_array().unwrap();

        assert_eq!(context.len(), 3);
        assert_eq!(
            context[0],
            "https://fhircat.org/fhir-r4/original/contexts/patient.context.jsonld"
        );
        assert_eq!(context[2]["@base"], "http://hl7.org/fhir/");
    }

    #[test]
    fn header_can_be_disabled() {
        let options = NormalizeOptions::default().ontology_header(false);
        let tree = prepare(patient(), &resolver(), &options).unwrap().tree;
        assert!(tree.get("@included").is_none());
    }
}

// === Errors ===

mod errors {
    use super::*;

    #[test]
    fn nested_list_fails_document() {
        let result = prepare(
            json!({ "resourceType": "Patient", "id": "p1", "name": [["x"]] }),
            &resolver(),
            &NormalizeOptions::default(),
        );
        assert!(matches!(result, Err(NormalizeError::NestedList { .. })));
    }

    #[test]
    fn non_string_resource_type_fails_document() {
        let result = prepare(
            json!({ "resourceType": 5, "id": "x" }),
            &resolver(),
            &NormalizeOptions::default(),
        );
        assert!(matches!(
            result,
            Err(NormalizeError::UnresolvedResourceType { .. })
        ));
    }

    #[test]
    fn not_a_resource_is_recoverable() {
        let err = prepare(json!({ "foo": 1 }), &resolver(), &NormalizeOptions::default())
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn structural_validator_rejects_raw_documents() {
        let mut raw = patient();
        raw["@id"] = json!("Patient/example");
        raw["nodeRole"] = json!("fhir:treeRoot");

        let err = StructuralValidator
            .validate(&raw, "Patient/example", "http://hl7.org/fhir/shape/Patient")
            .unwrap_err();
        match err {
            ValidateError::Invalid { errors } => {
                assert!(errors.iter().any(|v| v.path == "/active"));
                assert!(errors.iter().any(|v| v.path == "/_birthDate"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}

// === Batches ===

mod batches {
    use super::*;

    #[test]
    fn directory_to_directory() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_doc(&input, "patient.json", &patient());
        write_doc(&input, "notes.json", &json!({ "title": "not FHIR" }));
        write_doc(
            &input,
            "broken.json",
            &json!({ "resourceType": "Patient", "id": "b", "name": [[]] }),
        );

        let resolver = resolver();
        let options = NormalizeOptions::default();
        let result = Batch::new(&resolver, &options)
            .process_path(input.path(), Some(output.path()))
            .unwrap();

        assert_eq!(result.files_processed, 3);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failed, 1);
        assert!(!result.is_ok());

        let written: Value =
            serde_json::from_str(&fs::read_to_string(output.path().join("patient.json")).unwrap())
                .unwrap();
        assert_eq!(written["@id"], "Patient/example");
        assert!(!output.path().join("notes.json").exists());
        assert!(!output.path().join("broken.json").exists());
    }

    #[test]
    fn extension_conflict_aborts_only_its_document() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_doc(&input, "patient.json", &patient());
        write_doc(
            &input,
            "conflict.json",
            &json!({
                "resourceType": "Patient",
                "id": "c1",
                "maritalStatus": {
                    "text": "married",
                    "extension": [{ "url": "http://example.org/a", "valueString": "b" }]
                },
                "_maritalStatus": {
                    "extension": [{ "url": "http://example.org/c", "valueString": "d" }]
                }
            }),
        );

        let resolver = resolver();
        let options = NormalizeOptions::default();
        let result = Batch::new(&resolver, &options)
            .process_path(input.path(), Some(output.path()))
            .unwrap();

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        let conflict = result
            .results
            .iter()
            .find(|r| r.file.ends_with("conflict.json"))
            .unwrap();
        assert_eq!(conflict.status, FileStatus::Error);
        assert!(conflict.message.as_deref().unwrap().contains("maritalStatus"));
        assert!(output.path().join("patient.json").exists());
        assert!(!output.path().join("conflict.json").exists());
    }

    #[test]
    fn directory_requires_directory_output() {
        let input = TempDir::new().unwrap();
        write_doc(&input, "patient.json", &patient());
        let target = input.path().join("out.json");

        let resolver = resolver();
        let options = NormalizeOptions::default();
        let err = Batch::new(&resolver, &options)
            .process_path(input.path(), Some(&target))
            .unwrap_err();
        assert!(matches!(err, LoadError::NotADirectory { .. }));
    }

    #[test]
    fn validation_failure_writes_nothing() {
        let input = TempDir::new().unwrap();
        let shapes = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let file = write_doc(&input, "patient.json", &patient());
        fs::write(
            shapes.path().join("Patient.json"),
            r#"{ "type": "object", "required": ["deceasedBoolean"] }"#,
        )
        .unwrap();

        let resolver = resolver();
        let options = NormalizeOptions::default();
        let validator = JsonSchemaValidator::new(shapes.path());
        let result = Batch::new(&resolver, &options)
            .validator(&validator)
            .process_path(&file, Some(output.path()))
            .unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(result.results[0].status, FileStatus::Error);
        assert!(!result.results[0].violations.is_empty());
        assert!(!output.path().join("patient.json").exists());
    }

    #[test]
    fn single_file_without_output_keeps_document() {
        let input = TempDir::new().unwrap();
        let file = write_doc(&input, "patient.json", &patient());

        let resolver = resolver();
        let options = NormalizeOptions::default();
        let result = Batch::new(&resolver, &options)
            .validator(&StructuralValidator)
            .process_path(&file, None)
            .unwrap();

        assert!(result.is_ok());
        let document = result.results[0].document.as_ref().unwrap();
        assert_eq!(document["@id"], "Patient/example");
    }
}

// === Custom schema ===

mod custom_schema {
    use super::*;

    #[test]
    fn graph_drives_date_typing() {
        let graph = SchemaGraph::from_value(&json!({
            "@graph": [
                { "@id": "Thing.when", "range": "dateTime" }
            ]
        }))
        .unwrap();
        let resolver = PathTypeResolver::new(&graph);
        let tree = prepare(
            json!({ "resourceType": "Thing", "id": "t1", "when": "2021-04" }),
            &resolver,
            &NormalizeOptions::default(),
        )
        .unwrap()
        .tree;

        assert_eq!(
            tree["when"]["value"]["@type"],
            "http://www.w3.org/2001/XMLSchema#gYearMonth"
        );
    }
}
