//! Prompt construction for the generation processors.
//!
//! Prompts pin the output to a strict JSON shape so the parsing side can
//! stay dumb. Learner level and translation language default to sensible
//! values when the caller leaves them out.

use crate::scheduler::job::{ContextRequest, SentenceRequest};

/// Fallback proficiency description when no level is given.
const DEFAULT_LEVEL: &str = "B1";

/// Fallback translation language.
const DEFAULT_TRANSLATION_LANG: &str = "en";

/// System prompt for sentence-batch generation.
pub const SENTENCE_SYSTEM_PROMPT: &str = "You are a language tutor writing natural example \
sentences for vocabulary practice. Always answer with a single JSON object and nothing else: \
{\"sentences\": [{\"text\": \"...\", \"translation\": \"...\"}]}. Do not add commentary, \
markdown fences, or fields beyond text and translation.";

/// System prompt for context-passage generation.
pub const CONTEXT_SYSTEM_PROMPT: &str = "You are a language tutor writing one short, coherent \
passage that uses a given set of vocabulary words in context. Always answer with a single JSON \
object and nothing else: {\"text\": \"...\", \"translation\": \"...\"}. Do not add commentary, \
markdown fences, or extra fields.";

/// Builds the user prompt for a sentence-batch job.
pub fn build_sentence_prompt(request: &SentenceRequest) -> String {
    let level = request.level.as_deref().unwrap_or(DEFAULT_LEVEL);
    let translation_lang = request
        .translation_lang
        .as_deref()
        .unwrap_or(DEFAULT_TRANSLATION_LANG);

    format!(
        "Write exactly {count} example sentences in \"{lang}\" that each use \"{target}\" \
naturally. Target a {level} learner: everyday vocabulary, one idea per sentence. Translate \
each sentence into \"{translation_lang}\". Return the JSON object with exactly {count} \
entries in \"sentences\".",
        count = request.count,
        lang = request.lang,
        target = request.target,
        level = level,
        translation_lang = translation_lang,
    )
}

/// Builds the user prompt for a context-passage job.
pub fn build_context_prompt(request: &ContextRequest) -> String {
    let level = request.level.as_deref().unwrap_or(DEFAULT_LEVEL);
    let translation_lang = request
        .translation_lang
        .as_deref()
        .unwrap_or(DEFAULT_TRANSLATION_LANG);

    let word_list = request
        .words
        .iter()
        .map(|pair| format!("\"{}\" ({})", pair.word, pair.translation))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Write one short passage (2-4 sentences) in \"{lang}\" that naturally uses all of \
these words: {word_list}. Target a {level} learner. Translate the whole passage into \
\"{translation_lang}\". Return the JSON object.",
        lang = request.lang,
        word_list = word_list,
        level = level,
        translation_lang = translation_lang,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::WordPair;

    #[test]
    fn sentence_prompt_names_count_target_and_level() {
        let prompt = build_sentence_prompt(&SentenceRequest {
            target: "downside".to_string(),
            lang: "en".to_string(),
            count: 3,
            level: Some("A2".to_string()),
            translation_lang: Some("de".to_string()),
        });

        assert!(prompt.contains("exactly 3"));
        assert!(prompt.contains("\"downside\""));
        assert!(prompt.contains("A2"));
        assert!(prompt.contains("\"de\""));
    }

    #[test]
    fn sentence_prompt_applies_defaults() {
        let prompt = build_sentence_prompt(&SentenceRequest {
            target: "downside".to_string(),
            lang: "en".to_string(),
            count: 1,
            level: None,
            translation_lang: None,
        });

        assert!(prompt.contains("B1"));
        assert!(prompt.contains("\"en\""));
    }

    #[test]
    fn context_prompt_lists_every_word() {
        let prompt = build_context_prompt(&ContextRequest {
            words: vec![
                WordPair {
                    word: "Haus".to_string(),
                    translation: "house".to_string(),
                },
                WordPair {
                    word: "Baum".to_string(),
                    translation: "tree".to_string(),
                },
                WordPair {
                    word: "Hund".to_string(),
                    translation: "dog".to_string(),
                },
            ],
            lang: "de".to_string(),
            level: None,
            translation_lang: None,
        });

        assert!(prompt.contains("\"Haus\" (house)"));
        assert!(prompt.contains("\"Baum\" (tree)"));
        assert!(prompt.contains("\"Hund\" (dog)"));
    }
}
