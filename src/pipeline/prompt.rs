// src/pipeline/prompt.rs
// Composite prompt assembly

use crate::store::StagedResult;

pub const DEFAULT_INSTRUCTION: &str = "Please provide a composite summary of the following:";

/// Assemble the generation prompt: one labeled section each for transcripts,
/// translations and summaries, entries newline-joined in the order given.
///
/// Callers pass results already sorted by segment id, which makes the prompt
/// a pure function of the segment set.
pub fn build_composite_prompt(
    instruction: &str,
    results: &[StagedResult],
    target_languages: &[String],
) -> String {
    let transcriptions: Vec<&str> = results
        .iter()
        .map(|r| r.result.transcript_text())
        .collect();

    let translations: Vec<String> = results
        .iter()
        .flat_map(|r| translation_lines(r, target_languages))
        .collect();

    let summaries: Vec<&str> = results.iter().map(|r| r.result.summary_text()).collect();

    format!(
        "{}\n\nTranscriptions:\n{}\n\nTranslations:\n{}\n\nSummaries:\n{}",
        instruction.trim(),
        transcriptions.join("\n"),
        translations.join("\n"),
        summaries.join("\n")
    )
}

fn translation_lines(staged: &StagedResult, target_languages: &[String]) -> Vec<String> {
    match target_languages {
        [] => staged
            .result
            .translations
            .iter()
            .map(|(lang, text)| format!("[{}] {}", lang, text))
            .collect(),
        [only] => vec![staged.result.translation_text(only).to_string()],
        many => many
            .iter()
            .map(|lang| format!("[{}] {}", lang, staged.result.translation_text(lang)))
            .collect(),
    }
}
