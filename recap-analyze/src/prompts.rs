//! Prompts for LLM-backed recipe analysis.
//!
//! The model only ever sees sanitized signals: redacted URLs, bounded
//! structural summaries, and deterministic JMESPath candidates. Raw bodies
//! never leave the process.

use recap_artifacts::RequestCandidate;

pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a browser automation expert analyzing network traffic to extract reusable recipes.

Your task is to identify the "money request": the single API call that returns the data the user asked for. This request will later be executed directly, without a browser agent.

A good money request:
- Returns JSON data matching what the user asked for
- Is a single endpoint, not a sequence of calls
- Has clear parameters that can be templated with {param_name} placeholders
- Returns structured data (JSON preferred, HTML accepted)

Output a JSON object with:
{
    "success": true,
    "reason": "Why this succeeded or failed",
    "selected_rank": 1,
    "request": {
        "url": "Full URL with {param} placeholders, e.g. https://api.example.com/search?q={query}",
        "method": "GET",
        "headers": {"Accept": "application/json"},
        "body_template": null,
        "response_type": "json",
        "extract_path": "JMESPath to the useful data, e.g. data.items",
        "html_selectors": null,
        "allowed_domains": ["api.example.com"]
    },
    "parameters": [
        {"name": "query", "source": "query", "required": true, "default": null}
    ],
    "auth_recovery": null,
    "recipe_name_suggestion": "suggested-recipe-name",
    "recipe_description": "What this recipe does"
}

Rules:
- The url must be a FULL http(s) URL including the domain.
- Placeholder names must be valid identifiers.
- Only include essential headers.
- Prefer the provided extract-path candidates over inventing new ones.
- If no suitable API call exists, set success=false and explain in reason.
- Output STRICT JSON ONLY. No markdown, no prose outside the object."#;

/// Build the user prompt from the task and ranked, sanitized candidates.
pub fn build_analysis_prompt(
    task: &str,
    result: &str,
    candidates: &[RequestCandidate],
    extract_candidates: &[String],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("TASK: {task}\n"));
    if !result.is_empty() {
        out.push_str(&format!("AGENT RESULT: {result}\n"));
    }
    out.push_str("\nRANKED CANDIDATE API CALLS (sanitized):\n");

    for candidate in candidates {
        let sig = &candidate.signal;
        out.push_str(&format!(
            "\n#{rank} score={score:.2} {method} {url}\n  status={status} content_type={ct} size={size}B\n  structure: {summary}\n",
            rank = candidate.rank,
            score = candidate.score,
            method = sig.method,
            url = sig.url,
            status = sig.status,
            ct = sig.content_type,
            size = sig.response_size_bytes,
            summary = sig.structural_summary,
        ));
        if !sig.initiator_page_url.is_empty() {
            out.push_str(&format!("  initiated from: {}\n", sig.initiator_page_url));
        }
    }

    if !extract_candidates.is_empty() {
        out.push_str("\nEXTRACT-PATH CANDIDATES for the top candidate (pick one or edit slightly):\n");
        for expr in extract_candidates {
            out.push_str(&format!("  - {expr}\n"));
        }
    }

    out.push_str("\nReturn STRICT JSON only, matching the schema from the system prompt.\n");
    out
}
