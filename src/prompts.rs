//! Prompts for structured contract extraction.
//!
//! Every prompt lives here so wording can change without touching retry or
//! validation logic. Callers can override the system prompt via
//! [`crate::config::AdapterSettings::system_prompt`]; the completion layer
//! always appends [`schema_instruction`] for the request's schema.

use serde_json::Value;

/// Default system prompt for contract extraction.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You analyse legal contracts and extract key terms into a fixed JSON structure.

Read the contract text supplied by the user and report:

1. PARTIES
   - party_one and party_two: the two principal contracting parties
   - additional_parties: any other named signatories (empty list if none)

2. DATES
   - effective_date and termination_date as YYYY-MM-DD when stated
   - term_length as written (for example "24 months")

3. CLAUSES
   Quote or closely paraphrase the operative language for: governing law,
   termination, confidentiality, indemnification, limitation of liability,
   dispute resolution, payment terms, intellectual property.

4. CONFIDENCE
   A number from 0.0 to 1.0 describing how complete and reliable the
   extraction is. Lower it when the text is truncated or ambiguous.

5. SUMMARY
   One or two sentences on what the contract is for.

Use null for anything the text does not state. Never invent parties, dates
or clause text."#;

/// Appended to the system prompt: the exact output contract.
pub fn schema_instruction(schema: &Value) -> String {
    format!(
        "\n\nRespond with a single JSON object and nothing else. No prose, no \
code fences. The object must validate against this JSON Schema; every key is \
required and no other keys are allowed:\n\n{}",
        schema
    )
}

/// The user turn carrying the (possibly truncated) document text.
pub fn user_prompt(text: &str) -> String {
    format!("Extract the contract terms from this document:\n\n{}", text)
}
