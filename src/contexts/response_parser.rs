use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::data::{
    ApplicationStructure, ArtifactKind, DriftReport, TransformationArtifact, HEALTH_TEST_PATH,
};

const UPDATE_KEYWORDS: &[&str] = &["UPDATED", "UPDATE", "Modified"];
const CREATE_KEYWORDS: &[&str] = &["NEW", "CREATE", "CREATED", "Add"];

/// Extracted blocks this short cannot be a real file.
const MIN_CONTENT_CHARS: usize = 10;

/// One file the generation service is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedOutput {
    pub path: String,
    pub kind: ArtifactKind,
}

/// Files a transformation should produce, in section order.
pub fn expected_outputs(structure: &ApplicationStructure) -> Vec<ExpectedOutput> {
    let support = structure.support_paths();
    let mut outputs = Vec::with_capacity(5);

    if let Some(entry) = &structure.entry_point {
        outputs.push(ExpectedOutput {
            path: entry.clone(),
            kind: ArtifactKind::Update,
        });
    }
    outputs.push(ExpectedOutput {
        path: structure.manifest_or_default().to_string(),
        kind: if structure.manifest.is_some() {
            ArtifactKind::Update
        } else {
            ArtifactKind::Create
        },
    });
    for path in [support.middleware, support.logging_config, support.health_test] {
        outputs.push(ExpectedOutput {
            path,
            kind: ArtifactKind::Create,
        });
    }
    outputs
}

/// Pulls the expected files out of a free-form generated transcript.
///
/// Returns only the files that could be located with confidence; a short
/// result means the generation is unreliable, not that parsing failed.
pub fn extract_artifacts(raw: &str, drift: &DriftReport) -> Vec<TransformationArtifact> {
    let text = raw.replace("\r\n", "\n");
    // Same byte length as `text`, so match offsets slice either one.
    let haystack = text.replace('\\', "/");

    let mut artifacts = Vec::new();
    for expected in expected_outputs(&drift.structure) {
        let keywords = match expected.kind {
            ArtifactKind::Update => UPDATE_KEYWORDS,
            ArtifactKind::Create => CREATE_KEYWORDS,
        };
        let file = regex::escape(&expected.path);

        let labeled = keywords.iter().find_map(|kw| {
            let pattern = format!(
                r"###?\s*{kw}[:\s]+(?:\*\*|`)?{file}(?:\*\*|`)?\s*\n```[\w+-]*\n(.*?)```"
            );
            capture_block(&pattern, &haystack, &text)
        });

        let content = labeled.or_else(|| {
            let pattern = format!(r"(?:\*\*|`)?{file}(?:\*\*|`)?[:\s]*\n```[\w+-]*\n(.*?)```");
            capture_block(&pattern, &haystack, &text)
        });

        match content {
            Some(content) => {
                debug!(file = %expected.path, chars = content.len(), "extracted artifact");
                artifacts.push(TransformationArtifact {
                    path: expected.path,
                    content,
                    kind: expected.kind,
                });
            }
            None => debug!(file = %expected.path, "no section found"),
        }
    }
    artifacts
}

fn capture_block(pattern: &str, haystack: &str, original: &str) -> Option<String> {
    let re: Regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()?;
    let span = re.captures(haystack)?.get(1)?.range();
    let content = original[span].trim();
    if content.chars().count() > MIN_CONTENT_CHARS {
        Some(content.to_string())
    } else {
        None
    }
}
