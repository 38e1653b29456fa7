//! Reference nodes for values that identify another resource.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::id_map::IdentifierContext;
use crate::types::{FHIR_PREFIX, JSONLD_ID, JSONLD_TYPE};

/// Resource types recognised in literal reference URLs.
const RESOURCE_TYPES: &[&str] = &[
    "Account",
    "ActivityDefinition",
    "AdministrableProductDefinition",
    "AdverseEvent",
    "AllergyIntolerance",
    "Appointment",
    "AppointmentResponse",
    "AuditEvent",
    "Basic",
    "Binary",
    "BiologicallyDerivedProduct",
    "BodyStructure",
    "Bundle",
    "CapabilityStatement",
    "CarePlan",
    "CareTeam",
    "CatalogEntry",
    "ChargeItem",
    "ChargeItemDefinition",
    "Claim",
    "ClaimResponse",
    "ClinicalImpression",
    "ClinicalUseIssue",
    "CodeSystem",
    "Communication",
    "CommunicationRequest",
    "CompartmentDefinition",
    "Composition",
    "ConceptMap",
    "Condition",
    "ConditionDefinition",
    "Consent",
    "Contract",
    "Coverage",
    "CoverageEligibilityRequest",
    "CoverageEligibilityResponse",
    "DetectedIssue",
    "Device",
    "DeviceDefinition",
    "DeviceMetric",
    "DeviceRequest",
    "DeviceUseStatement",
    "DiagnosticReport",
    "DocumentManifest",
    "DocumentReference",
    "Encounter",
    "Endpoint",
    "EnrollmentRequest",
    "EnrollmentResponse",
    "EpisodeOfCare",
    "EventDefinition",
    "Evidence",
    "EvidenceVariable",
    "ExampleScenario",
    "ExplanationOfBenefit",
    "FamilyMemberHistory",
    "Flag",
    "Goal",
    "GraphDefinition",
    "Group",
    "GuidanceResponse",
    "HealthcareService",
    "ImagingStudy",
    "Immunization",
    "ImmunizationEvaluation",
    "ImmunizationRecommendation",
    "ImplementationGuide",
    "Ingredient",
    "InsurancePlan",
    "Invoice",
    "Library",
    "Linkage",
    "List",
    "Location",
    "ManufacturedItemDefinition",
    "Measure",
    "MeasureReport",
    "Medication",
    "MedicationAdministration",
    "MedicationDispense",
    "MedicationKnowledge",
    "MedicationRequest",
    "MedicationStatement",
    "MedicationUsage",
    "MedicinalProductDefinition",
    "MessageDefinition",
    "MessageHeader",
    "MolecularSequence",
    "NamingSystem",
    "NutritionIntake",
    "NutritionOrder",
    "NutritionProduct",
    "Observation",
    "ObservationDefinition",
    "OperationDefinition",
    "OperationOutcome",
    "Organization",
    "OrganizationAffiliation",
    "PackagedProductDefinition",
    "Patient",
    "PaymentNotice",
    "PaymentReconciliation",
    "Permission",
    "Person",
    "PlanDefinition",
    "Practitioner",
    "PractitionerRole",
    "Procedure",
    "Provenance",
    "Questionnaire",
    "QuestionnaireResponse",
    "RegulatedAuthorization",
    "RelatedPerson",
    "RequestGroup",
    "ResearchStudy",
    "ResearchSubject",
    "RiskAssessment",
    "Schedule",
    "SearchParameter",
    "ServiceRequest",
    "Slot",
    "Specimen",
    "SpecimenDefinition",
    "StructureDefinition",
    "StructureMap",
    "Subscription",
    "Substance",
    "SubstanceDefinition",
    "SupplyDelivery",
    "SupplyRequest",
    "Task",
    "TerminologyCapabilities",
    "TestReport",
    "TestScript",
    "ValueSet",
    "VerificationResult",
    "VisionPrescription",
];

/// `[http(s)://host/base/]Type/id[/_history/version]`
static RESOURCE_URI_RE: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"^(?:https?://(?:[A-Za-z0-9\-\\.:%$]*/)+)?({})/[A-Za-z0-9\-.]{{1,64}}(?:/_history/[A-Za-z0-9\-.]{{1,64}})?$",
        RESOURCE_TYPES.join("|")
    );
    Regex::new(&pattern).expect("static resource URI pattern compiles")
});

/// Resource type named by a literal reference, if it has the FHIR
/// resource URI shape.
pub fn resource_type_of(reference: &str) -> Option<&str> {
    RESOURCE_URI_RE
        .captures(reference)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// A synthesized link to another resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceLink {
    /// Identifier the link points at.
    pub id: String,
    /// Resource type of the target, when known.
    pub resource_type: Option<String>,
    /// Whether `id` came from the identifier context.
    pub mapped: bool,
}

impl ReferenceLink {
    /// Build the link for a reference string.
    ///
    /// Relative references are made relative to the document's parent when
    /// no FHIR server base is configured; local `#fragment` references are
    /// left alone. The target type is the declared `type` when given,
    /// otherwise it is read off the reference itself.
    pub fn build(
        reference: &str,
        declared_type: Option<&str>,
        fhir_server: Option<&str>,
        ids: &IdentifierContext,
    ) -> Self {
        let relative = !reference.contains("://")
            && !reference.starts_with('/')
            && !reference.starts_with('#');
        let link = if relative && fhir_server.is_none() {
            format!("../{}", reference)
        } else {
            reference.to_string()
        };

        let resource_type = declared_type
            .or_else(|| resource_type_of(reference))
            .map(str::to_string);

        match ids.get(&link).or_else(|| ids.get(reference)) {
            Some(mapped) => Self {
                id: mapped.to_string(),
                resource_type,
                mapped: true,
            },
            None => Self {
                id: link,
                resource_type,
                mapped: false,
            },
        }
    }

    /// JSON form of the link.
    ///
    /// Mapped links carry only `@id`; the target's own node declares its type.
    pub fn to_value(&self) -> Value {
        let mut node = Map::new();
        node.insert(JSONLD_ID.to_string(), Value::String(self.id.clone()));
        if !self.mapped {
            if let Some(resource_type) = &self.resource_type {
                node.insert(
                    JSONLD_TYPE.to_string(),
                    Value::String(format!("{}{}", FHIR_PREFIX, resource_type)),
                );
            }
        }
        Value::Object(node)
    }
}
