use strata_core::JourneyVerdict;

use crate::{JourneyRequest, SynthesisRequest};

const SNAPSHOT_SEPARATOR: &str = "\n\n---\n\n";

pub(crate) const JOURNEY_SYSTEM_PROMPT: &str = "You analyse the change history of a single source file. \
Read the chronological snapshots (commit message plus diff) and describe how the file evolved. \
Respond with STRICT JSON only, using exactly these keys: \
description (string), isHotspot (boolean, true when the file shows repeated architectural churn), \
evolutionaryLessons (array of string, only for hotspots), \
reinforcement (string, the stable pattern the file keeps reinforcing, only for non-hotspots).";

pub(crate) const SYNTHESIS_SYSTEM_PROMPT: &str = "You combine per-file journeys into a repository-wide \
evolution analysis and surface lessons shared across files. \
Respond with STRICT JSON only, using exactly these keys: \
summary (string), \
architecturalLessons (array of {title, lesson, impact: high|medium|low, affectedFiles: array of string}), \
namedPieces (array of {name, description, files: array of string}).";

pub(crate) fn journey_user_prompt(request: &JourneyRequest) -> String {
    let snapshots = request
        .snapshots
        .iter()
        .map(|snapshot| {
            format!(
                "[{}] {}\nDiff:\n{}",
                snapshot.date.to_rfc3339(),
                snapshot.message,
                snapshot.diff
            )
        })
        .collect::<Vec<_>>()
        .join(SNAPSHOT_SEPARATOR);

    format!(
        "File: {}\nRepository context:\n{}\n\nChronological snapshots:\n{}\n",
        request.file_path, request.context, snapshots
    )
}

pub(crate) fn synthesis_user_prompt(request: &SynthesisRequest) -> String {
    let journeys = request
        .verdicts
        .iter()
        .map(describe_journey)
        .collect::<Vec<_>>()
        .join("\n---\n");

    format!("Repository: {}\n\nAnalysed file journeys:\n{}\n", request.repo, journeys)
}

fn describe_journey(verdict: &JourneyVerdict) -> String {
    let mut lines = vec![
        format!("File: {}", verdict.path),
        format!("Is hotspot: {}", verdict.is_hotspot),
        format!("Description: {}", verdict.description),
    ];
    if !verdict.evolutionary_lessons.is_empty() {
        lines.push(format!("Lessons: {}", verdict.evolutionary_lessons.join(", ")));
    }
    if let Some(reinforcement) = &verdict.reinforcement {
        lines.push(format!("Reinforcing: {reinforcement}"));
    }
    lines.join("\n")
}
