//! Registry XML payloads
//!
//! Lookup and submit responses share the `<records><record>...</record></records>`
//! envelope. Element text is trimmed and empty elements are treated as absent.

use serde::{Deserialize, Serialize};
use tracing::error;

use super::RegistryError;

/// `<doi status="...">10.x/y</doi>`
#[derive(Debug, Clone, Default, Deserialize)]
struct DoiElement {
    #[serde(rename = "@status", default)]
    status: Option<String>,
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LookupEnvelope {
    #[serde(rename = "record", default)]
    records: Vec<LookupRecord>,
}

#[derive(Debug, Deserialize)]
struct LookupRecord {
    #[serde(default)]
    doi: Option<DoiElement>,
}

/// Registration status the registry reports once a DOI is fully minted
pub const DOI_STATUS_COMPLETED: &str = "COMPLETED";

/// Identifier found by a lookup, with the registry's registration status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupHit {
    pub identifier: String,
    /// `status` attribute of the `<doi>` element, e.g. `PENDING` or `COMPLETED`
    pub status: Option<String>,
}

impl LookupHit {
    pub fn is_completed(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case(DOI_STATUS_COMPLETED))
    }
}

/// Extract the identifier from a lookup response body.
///
/// Only the first record is considered. `Ok(None)` means the registry knows
/// nothing for the key yet.
pub fn parse_lookup(body: &str) -> Result<Option<LookupHit>, RegistryError> {
    let envelope: LookupEnvelope = quick_xml::de::from_str(body)
        .map_err(|e| RegistryError::Decode(format!("lookup response: {}", e)))?;

    Ok(envelope
        .records
        .into_iter()
        .next()
        .and_then(|record| record.doi)
        .and_then(|doi| {
            non_empty(doi.value).map(|identifier| LookupHit {
                identifier,
                status: non_empty(doi.status),
            })
        }))
}

/// One record sent to the registry for registration or update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionRecord {
    /// Registry id, present when updating an existing registration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osti_id: Option<String>,
    pub dataset_type: String,
    pub title: String,
    pub creators: String,
    pub product_nos: String,
    /// Catalog key
    pub accession_num: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_nos: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originating_research_org: Option<String>,
    pub publication_date: String,
    pub site_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename = "records")]
struct SubmissionEnvelope<'a> {
    #[serde(rename = "record")]
    records: &'a [SubmissionRecord],
}

/// Serialize submission records into the registry's XML envelope
pub fn submission_body(records: &[SubmissionRecord]) -> Result<String, RegistryError> {
    quick_xml::se::to_string(&SubmissionEnvelope { records })
        .map_err(|e| RegistryError::Encode(format!("submission body: {}", e)))
}

/// Registry acknowledgement for one submitted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedRecord {
    pub osti_id: String,
    pub accession_num: String,
    pub doi: Option<String>,
    pub doi_status: Option<String>,
    pub status: String,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmitResponse {
    pub records: Vec<SubmittedRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct SubmitEnvelope {
    #[serde(rename = "record", default)]
    records: Vec<RawSubmittedRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSubmittedRecord {
    #[serde(default)]
    osti_id: Option<String>,
    #[serde(default)]
    accession_num: Option<String>,
    #[serde(default)]
    doi: Option<DoiElement>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_message: Option<String>,
}

impl TryFrom<RawSubmittedRecord> for SubmittedRecord {
    type Error = String;

    fn try_from(raw: RawSubmittedRecord) -> Result<Self, Self::Error> {
        let osti_id = non_empty(raw.osti_id).ok_or("missing osti_id")?;
        let accession_num = non_empty(raw.accession_num).ok_or("missing accession_num")?;
        let status = non_empty(raw.status).ok_or("missing status")?;
        let doi = raw.doi.unwrap_or_default();

        Ok(SubmittedRecord {
            osti_id,
            accession_num,
            doi: non_empty(doi.value),
            doi_status: non_empty(doi.status),
            status,
            status_message: non_empty(raw.status_message),
        })
    }
}

/// Decode a submit response. Records missing required fields are logged and dropped.
pub fn parse_submit_response(body: &str) -> Result<SubmitResponse, RegistryError> {
    let envelope: SubmitEnvelope = quick_xml::de::from_str(body)
        .map_err(|e| RegistryError::Decode(format!("submit response: {}", e)))?;

    let mut records = Vec::with_capacity(envelope.records.len());
    for (idx, raw) in envelope.records.into_iter().enumerate() {
        match SubmittedRecord::try_from(raw) {
            Ok(record) => records.push(record),
            Err(reason) => error!(index = idx, "Skipping unparseable submit response record: {}", reason),
        }
    }

    Ok(SubmitResponse { records })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_found() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <records start="0" rows="1" numfound="1">
              <record>
                <osti_id>1190959</osti_id>
                <accession_num>mp-149</accession_num>
                <doi status="COMPLETED">10.17188/1190959</doi>
              </record>
            </records>"#;

        let hit = parse_lookup(xml).unwrap().unwrap();
        assert_eq!(hit.identifier, "10.17188/1190959");
        assert_eq!(hit.status.as_deref(), Some("COMPLETED"));
        assert!(hit.is_completed());
    }

    #[test]
    fn test_lookup_keeps_pending_status() {
        let xml = r#"<records><record><doi status="PENDING"> 10.17188/1190960 </doi></record></records>"#;

        let hit = parse_lookup(xml).unwrap().unwrap();
        assert_eq!(hit.identifier, "10.17188/1190960");
        assert_eq!(hit.status.as_deref(), Some("PENDING"));
        assert!(!hit.is_completed());
    }

    #[test]
    fn test_lookup_without_status_is_not_completed() {
        let xml = r#"<records><record><doi>10.17188/1190961</doi></record></records>"#;
        assert!(!parse_lookup(xml).unwrap().unwrap().is_completed());
    }

    #[test]
    fn test_lookup_without_records_is_none() {
        let xml = r#"<records start="0" rows="0" numfound="0"></records>"#;
        assert_eq!(parse_lookup(xml).unwrap(), None);
    }

    #[test]
    fn test_lookup_with_empty_doi_is_none() {
        let xml = r#"<records><record><osti_id>1</osti_id><doi status="PENDING"></doi></record></records>"#;
        assert_eq!(parse_lookup(xml).unwrap(), None);
    }

    #[test]
    fn test_lookup_garbage_is_decode_error() {
        let err = parse_lookup("<records><record>").unwrap_err();
        assert!(matches!(err, RegistryError::Decode(_)));
    }

    #[test]
    fn test_submission_body_shape() {
        let records = vec![SubmissionRecord {
            dataset_type: "SM".to_string(),
            title: "Materials Data on Si by Materials Project".to_string(),
            accession_num: "mp-149".to_string(),
            site_url: "https://materialsproject.org/materials/mp-149".to_string(),
            ..Default::default()
        }];

        let body = submission_body(&records).unwrap();
        assert!(body.starts_with("<records><record>"));
        assert!(body.contains("<accession_num>mp-149</accession_num>"));
        assert!(!body.contains("<osti_id>"));
        assert!(body.ends_with("</record></records>"));
    }

    #[test]
    fn test_submit_response_skips_bad_records() {
        let xml = r#"<records>
              <record>
                <osti_id>1190959</osti_id>
                <accession_num>mp-149</accession_num>
                <doi status="PENDING">10.17188/1190959</doi>
                <status>SUCCESS</status>
                <status_message/>
              </record>
              <record>
                <accession_num>mp-150</accession_num>
                <status>FAILURE</status>
                <status_message>URL entered is invalid or unreachable.</status_message>
              </record>
            </records>"#;

        let response = parse_submit_response(xml).unwrap();
        assert_eq!(response.records.len(), 1);

        let record = &response.records[0];
        assert_eq!(record.accession_num, "mp-149");
        assert_eq!(record.doi_status.as_deref(), Some("PENDING"));
        assert_eq!(record.status, "SUCCESS");
        assert_eq!(record.status_message, None);
    }
}
