//! Instruction text sent alongside the recordings.

use std::fmt::Write;

use crate::domain::models::{PartKind, Segment};

/// Rubric criteria the model is asked to score.
pub const CRITERIA: [&str; 4] = [
    "fluency_coherence",
    "lexical_resource",
    "grammatical_range_accuracy",
    "pronunciation",
];

fn part_label(part: u8) -> &'static str {
    match PartKind::from_part(part) {
        Some(PartKind::ShortForm) => "short interview answer",
        Some(PartKind::LongForm) => "long turn",
        Some(PartKind::Discussion) => "discussion answer",
        None => "answer",
    }
}

/// Build the instruction for `segments`, which must already be in submission order.
///
/// Recording N in the request is described as item N here, so the model can
/// pair audio with questions by position.
pub fn build_instruction(segments: &[Segment]) -> String {
    let mut prompt = String::from(
        "You are a certified IELTS speaking examiner. The attached audio recordings are \
         a candidate's answers, attached in the same order as the items listed below. \
         Transcribe each recording and assess the candidate on the official band \
         descriptors (1.0 to 9.0, half-band steps).\n\nItems:\n",
    );

    for (index, segment) in segments.iter().enumerate() {
        let question = if segment.question_text.trim().is_empty() {
            "(question text not provided)"
        } else {
            segment.question_text.trim()
        };
        // Writing to a String cannot fail.
        let _ = writeln!(
            prompt,
            "{}. [segment_id={}] Part {}, question {} ({}): {}",
            index + 1,
            segment.id,
            segment.part,
            segment.question,
            part_label(segment.part),
            question
        );
    }

    let _ = write!(
        prompt,
        "\nRespond with a single JSON object and nothing else, shaped as:\n\
         {{\n  \"overall_score\": number,\n  \"criteria\": {{ {} }},\n  \
         \"items\": [{{ \"segment_id\": string, \"part\": number, \"question\": number, \
         \"transcript\": string, \"score\": number, \"feedback\": string }}],\n  \
         \"feedback\": string\n}}\n\
         Include exactly one entry in \"items\" per listed item, in the same order.",
        CRITERIA
            .iter()
            .map(|c| format!("\"{c}\": number"))
            .collect::<Vec<_>>()
            .join(", ")
    );

    prompt
}
