//! Workflow timeline helpers: action strings and their descriptions.

use serde_json::Value;

/// Method assumed when a tool call does not name one.
pub const DEFAULT_METHOD: &str = "GET";

/// Build the raw action string for a tool call.
///
/// `method` and `endpoint` come from the call arguments; the method defaults
/// to `GET` and the endpoint to `/<tool>`.
#[must_use]
pub fn action_for(tool: &str, args: &Value) -> String {
    let method = args
        .get("method")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_METHOD);
    let endpoint = args
        .get("endpoint")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .map_or_else(|| format!("/{tool}"), str::to_string);
    format!("{method} {endpoint}")
}

/// Map a raw action to a human-readable description.
///
/// Deterministic; the result is the dedup key of the workflow timeline.
#[must_use]
pub fn describe_action(action: &str) -> &'static str {
    let has = |needle: &str| action.contains(needle);

    if action.starts_with("GET") {
        if has("/Patient") {
            if has("name=") || has("identifier=") {
                return "Searching patient records";
            }
            return "Retrieving patient information";
        }
        if has("/Observation") {
            return if has("code=MG") || has("code=magnesium") {
                "Checking magnesium levels"
            } else if has("code=K") || has("code=potassium") {
                "Checking potassium levels"
            } else if has("code=GLU") || has("code=glucose") {
                "Retrieving blood glucose readings"
            } else if has("code=A1C") || has("code=HbA1C") {
                "Checking HbA1C levels"
            } else if has("code=BP") || has("blood-pressure") {
                "Retrieving blood pressure readings"
            } else {
                "Retrieving lab results"
            };
        }
        if has("/MedicationRequest") {
            return "Checking medication orders";
        }
        if has("/ServiceRequest") {
            return "Checking service requests";
        }
        if has("/Condition") {
            return "Retrieving patient conditions";
        }
        if has("/Procedure") {
            return "Retrieving procedure history";
        }
        return "Querying medical records";
    }

    if action.starts_with("POST") {
        if has("/Observation") {
            return "Recording measurement";
        }
        if has("/MedicationRequest") {
            return "Ordering medication";
        }
        if has("/ServiceRequest") {
            return "Creating referral";
        }
        if has("/DiagnosticReport") {
            return "Creating diagnostic report";
        }
        return "Creating medical record";
    }

    if action.starts_with("FINISH") {
        return "Completing task";
    }

    "Processing request"
}
