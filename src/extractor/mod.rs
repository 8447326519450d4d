//! Finding extraction: raw tool output to typed, deduplicated findings.

pub mod dedup;
pub mod parsers;

pub use dedup::deduplicate_findings;
pub use parsers::{ParseContext, ParseOutput, ParserFn};

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::{value_as_text, ExecutionResult, Finding, Invocation};
use crate::registry::ToolRegistry;

const FALLBACK_PARSER: &str = "generic";

/// What one execution result yielded.
#[derive(Debug, Default)]
pub struct Extraction {
    pub findings: Vec<Finding>,
    /// Output lines the parser could not read.
    pub skipped: usize,
    /// Set when the output could not be interpreted at all. Local to the
    /// invocation; the run continues.
    pub parse_failure: Option<String>,
}

/// Lookup table from parser name to pure parser function.
pub struct FindingExtractor {
    registry: Arc<ToolRegistry>,
    parsers: HashMap<String, ParserFn>,
}

impl FindingExtractor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let parsers = parsers::BUILTIN_PARSERS
            .iter()
            .map(|(name, parser)| (name.to_string(), *parser))
            .collect();
        Self { registry, parsers }
    }

    pub fn register_parser(&mut self, name: impl Into<String>, parser: ParserFn) {
        self.parsers.insert(name.into(), parser);
    }

    pub fn has_parser(&self, name: &str) -> bool {
        self.parsers.contains_key(name)
    }

    /// Parse the output of one execution. Never fails: unreadable output
    /// becomes a `parse_failure` note and an empty finding list.
    pub fn extract(&self, invocation: &Invocation, result: &ExecutionResult, run_target: &str) -> Extraction {
        if !result.status.has_parseable_output() || result.output.trim().is_empty() {
            return Extraction::default();
        }

        let parser_name = match self.registry.lookup(&invocation.tool) {
            Ok(spec) => spec.parser_name().to_string(),
            Err(_) => FALLBACK_PARSER.to_string(),
        };
        let (parser, missing) = match self.parsers.get(&parser_name) {
            Some(parser) => (*parser, None),
            None => {
                warn!(tool = %invocation.tool, parser = %parser_name, "No parser registered, using generic indicators");
                (parsers::parse_generic as ParserFn, Some(format!("no parser registered as '{}'", parser_name)))
            }
        };

        let subject = invocation.subject_or(run_target);
        let base_url = invocation.arguments.get("url").and_then(value_as_text);
        let ctx = ParseContext {
            tool: &invocation.tool,
            invocation_id: &invocation.id,
            subject: &subject,
            base_url: base_url.as_deref(),
            output: &result.output,
        };

        let parsed = match catch_unwind(AssertUnwindSafe(|| parser(&ctx))) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(tool = %invocation.tool, parser = %parser_name, "Parser panicked");
                return Extraction {
                    parse_failure: Some(format!("parser '{}' panicked", parser_name)),
                    ..Extraction::default()
                };
            }
        };

        let findings = deduplicate_findings(parsed.findings);
        debug!(
            invocation = %invocation.id,
            parser = %parser_name,
            findings = findings.len(),
            skipped = parsed.skipped,
            "Extracted findings"
        );

        let parse_failure = missing.or_else(|| {
            (findings.is_empty() && parsed.skipped > 0)
                .then(|| format!("{} unreadable line(s) from parser '{}'", parsed.skipped, parser_name))
        });

        Extraction { findings, skipped: parsed.skipped, parse_failure }
    }
}
