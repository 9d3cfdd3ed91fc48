//! Baseline fingerprint capture.
//!
//! Given a validated analysis and one real reply, compute the response-shape
//! baseline later stages compare against. Baselines are single-sample;
//! folding multiple parameter instantiations into one baseline raises
//! `sample_count` but no merge policy exists yet.

use recap_artifacts::{BaselineFingerprint, ResponseType, ValidationResult};
use recap_fingerprint::{fingerprint, DEFAULT_MAX_DEPTH};

use crate::{extract_data, fingerprint_entries};

#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("validated analysis carries no request spec")]
    MissingRequestSpec,

    #[error("baseline reply is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

/// Capture a baseline from one real reply body.
///
/// For JSON specs the body is parsed and, when an `extract_path` is set,
/// narrowed to the extraction result; extraction failures fall back to the
/// full body with a note in the logs. Non-JSON specs yield an empty entry
/// set since later comparisons are status-only.
pub fn capture_baseline(
    validation: ValidationResult,
    body_text: &str,
    max_depth: usize,
) -> Result<BaselineFingerprint, BaselineError> {
    let Some(spec) = validation.analysis.request_spec.clone() else {
        return Err(BaselineError::MissingRequestSpec);
    };

    if spec.response_type != ResponseType::Json {
        return Ok(BaselineFingerprint::new(
            validation,
            max_depth as u32,
            Vec::new(),
            1,
        ));
    }

    let mut data: serde_json::Value = serde_json::from_str(body_text)?;
    if let Some(path) = &spec.extract_path {
        match extract_data(&data, path) {
            Ok(extracted) => data = extracted,
            Err(e) => {
                tracing::warn!(extract_path = %path, error = %e, "baseline.extract_failed_using_full_body");
            }
        }
    }

    let fp = fingerprint(&data, max_depth);
    Ok(BaselineFingerprint::new(
        validation,
        max_depth as u32,
        fingerprint_entries(&fp),
        1,
    ))
}

/// Convenience wrapper using the default depth.
pub fn capture_baseline_default(
    validation: ValidationResult,
    body_text: &str,
) -> Result<BaselineFingerprint, BaselineError> {
    capture_baseline(validation, body_text, DEFAULT_MAX_DEPTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use recap_artifacts::{
        AnalysisResult, CandidateSet, RecipeRequestSpec, SessionRecording, SignalSet,
    };
    use std::collections::BTreeMap;

    fn validation_with(spec: Option<RecipeRequestSpec>) -> ValidationResult {
        let recording = SessionRecording::new(
            "t",
            "r",
            vec![],
            vec![],
            vec![],
            chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            None,
        );
        let signals = SignalSet::new(recording, vec![]);
        let candidates = CandidateSet::new(signals, vec![]);
        let mut analysis = AnalysisResult::new(candidates);
        analysis.request_spec = spec;
        ValidationResult::new(analysis, true, vec![], vec![])
    }

    fn json_spec(extract_path: Option<&str>) -> RecipeRequestSpec {
        RecipeRequestSpec {
            url: "https://api.example.com/x".into(),
            method: "GET".into(),
            headers: BTreeMap::new(),
            body_template: None,
            response_type: ResponseType::Json,
            extract_path: extract_path.map(String::from),
            html_selectors: None,
            allowed_domains: vec![],
        }
    }

    #[test]
    fn captures_shape_of_full_body() {
        let validation = validation_with(Some(json_spec(None)));
        let baseline =
            capture_baseline_default(validation, r#"{"items":[{"id":1}],"total":1}"#).unwrap();
        assert_eq!(baseline.sample_count, 1);
        assert_eq!(baseline.max_depth, 6);
        assert!(baseline
            .entries
            .iter()
            .any(|e| e.path == vec!["items".to_string(), "[]".to_string()]));
    }

    #[test]
    fn extract_path_narrows_the_baseline() {
        let validation = validation_with(Some(json_spec(Some("items"))));
        let baseline =
            capture_baseline_default(validation, r#"{"items":[{"id":1}],"total":1}"#).unwrap();
        // Narrowed to the array: no "total" path, root is the array itself.
        assert!(!baseline.entries.iter().any(|e| e.path == vec!["total".to_string()]));
        assert!(baseline.entries.iter().any(|e| e.path.is_empty()));
    }

    #[test]
    fn failed_extraction_falls_back_to_full_body() {
        let validation = validation_with(Some(json_spec(Some("nope[?broken"))));
        let baseline =
            capture_baseline_default(validation, r#"{"items":[1],"total":1}"#).unwrap();
        assert!(baseline.entries.iter().any(|e| e.path == vec!["total".to_string()]));
    }

    #[test]
    fn missing_spec_is_an_error() {
        let validation = validation_with(None);
        let err = capture_baseline_default(validation, "{}").unwrap_err();
        assert!(matches!(err, BaselineError::MissingRequestSpec));
    }

    #[test]
    fn malformed_reply_is_an_error() {
        let validation = validation_with(Some(json_spec(None)));
        let err = capture_baseline_default(validation, "not json").unwrap_err();
        assert!(matches!(err, BaselineError::MalformedJson(_)));
    }

    #[test]
    fn non_json_specs_produce_empty_baselines() {
        let mut spec = json_spec(None);
        spec.response_type = ResponseType::Html;
        let validation = validation_with(Some(spec));
        let baseline = capture_baseline_default(validation, "<html></html>").unwrap();
        assert!(baseline.entries.is_empty());
        assert_eq!(baseline.sample_count, 1);
    }
}
