//! Deterministic confirmation gate for model-proposed project creation.
//!
//! The model may ask to create a project, but only the user's own words can
//! authorize it. The gate passes when the dialogue was already at the
//! confirm stage before this turn and the prompt reads as a confirmation.
//! Any negative word vetoes, even next to an affirmative one, and so does a
//! negation marker just before an explicit phrase.

use storyloom_core::model::CreationStage;

/// Result of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Confirmed,
    /// The dialogue had not reached the confirm stage.
    NotAtConfirmStage,
    /// The prompt contains a negative.
    Vetoed,
    /// The prompt is not recognizable as a confirmation.
    NotConfirmed,
}

impl GateVerdict {
    #[must_use]
    pub fn is_confirmed(self) -> bool {
        self == Self::Confirmed
    }

    /// Why nothing was created, phrased for the user.
    #[must_use]
    pub fn explanation(self) -> Option<&'static str> {
        match self {
            Self::Confirmed => None,
            Self::NotAtConfirmStage => {
                Some("The project was not created yet: please review the proposal first.")
            }
            Self::Vetoed => Some("The project was not created because your message declined it."),
            Self::NotConfirmed => Some(
                "The project was not created: reply with an explicit confirmation such as \"确认创建\" or \"create it\".",
            ),
        }
    }
}

const NEGATIVE_PHRASES: &[&str] = &[
    "不创建",
    "不要",
    "不用",
    "先不",
    "暂不",
    "别创建",
    "先别",
    "取消",
    "不行",
    "不确认",
    "再想想",
    "等等",
    "算了",
    "不想",
    "还没",
    "不太",
];

const NEGATIVE_WORDS: &[&str] = &[
    "no", "not", "don't", "dont", "cancel", "stop", "wait", "nope", "never", "cannot", "cant",
];

/// Characters that negate an explicit phrase shortly after them, as in
/// "我不想创建项目" or "还没确认".
const NEGATION_MARKERS: &[char] = &['不', '没', '未', '别', '勿'];

/// How many characters before an explicit phrase are searched for a
/// negation marker. The search also stops at clause punctuation.
const NEGATION_WINDOW: usize = 3;

const EXPLICIT_PHRASES: &[&str] = &["确认创建", "创建项目", "开始创建", "确认", "就这样"];

const EXPLICIT_WORD_PHRASES: &[&str] = &[
    "go ahead",
    "create it",
    "create the project",
    "confirm",
    "confirmed",
    "let's do it",
];

const BARE_AFFIRMATIVES: &[&str] = &[
    "是", "是的", "好", "好的", "可以", "行", "嗯", "对", "ok", "okay", "yes", "y", "sure", "yep",
    "yeah",
];

/// Decides whether `prompt`, sent while the dialogue was at `stage_before`,
/// authorizes creating the project.
#[must_use]
pub fn evaluate(stage_before: CreationStage, prompt: &str) -> GateVerdict {
    if stage_before != CreationStage::Confirm {
        return GateVerdict::NotAtConfirmStage;
    }

    let normalized = normalize(prompt);
    let words = words(&normalized);
    let sentence = format!(" {} ", words.join(" "));

    let vetoed = NEGATIVE_PHRASES.iter().any(|p| normalized.contains(p))
        || EXPLICIT_PHRASES.iter().any(|p| negated(&normalized, p))
        || words.iter().any(|w| is_negative_word(w));
    if vetoed {
        return GateVerdict::Vetoed;
    }

    let explicit = EXPLICIT_PHRASES.iter().any(|p| normalized.contains(p))
        || EXPLICIT_WORD_PHRASES
            .iter()
            .any(|p| sentence.contains(&format!(" {p} ")));
    // Bare affirmatives only count because the stage is already confirm.
    let bare = BARE_AFFIRMATIVES.contains(&trim_punctuation(&normalized));
    if explicit || bare {
        GateVerdict::Confirmed
    } else {
        GateVerdict::NotConfirmed
    }
}

fn is_negative_word(word: &str) -> bool {
    NEGATIVE_WORDS.contains(&word) || word.ends_with("n't")
}

/// Whether any occurrence of `phrase` in `text` follows a negation marker
/// within the same clause.
fn negated(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(at, _)| {
        text[..at]
            .chars()
            .rev()
            .take_while(|c| !is_clause_break(*c))
            .take(NEGATION_WINDOW)
            .any(|c| NEGATION_MARKERS.contains(&c))
    })
}

fn is_clause_break(c: char) -> bool {
    c.is_ascii_punctuation() || "。！，～、？；：".contains(c)
}

fn normalize(prompt: &str) -> String {
    prompt.trim().to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

fn trim_punctuation(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation() || "。！，～、？".contains(c))
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_confirm(prompt: &str) -> GateVerdict {
        evaluate(CreationStage::Confirm, prompt)
    }

    #[test]
    fn test_explicit_chinese_confirmation_passes() {
        assert_eq!(at_confirm("确认创建"), GateVerdict::Confirmed);
        assert_eq!(at_confirm("好，开始创建吧！"), GateVerdict::Confirmed);
    }

    #[test]
    fn test_negatives_veto_even_with_affirmative_words() {
        assert_eq!(at_confirm("不创建"), GateVerdict::Vetoed);
        assert_eq!(at_confirm("不确认"), GateVerdict::Vetoed);
        assert_eq!(at_confirm("先别创建项目"), GateVerdict::Vetoed);
        assert_eq!(at_confirm("No, don't create it"), GateVerdict::Vetoed);
        assert_eq!(at_confirm("wait"), GateVerdict::Vetoed);
    }

    #[test]
    fn test_negated_explicit_phrases_veto() {
        for prompt in [
            "我不想创建项目",
            "还没确认",
            "我不太确认",
            "我并未确认",
            "请勿创建项目",
            "I can't confirm yet",
            "I cannot confirm this",
            "we shouldn't create it",
        ] {
            assert_eq!(at_confirm(prompt), GateVerdict::Vetoed, "{prompt}");
        }
    }

    #[test]
    fn test_negation_in_an_earlier_clause_does_not_veto() {
        assert_eq!(at_confirm("没问题，确认创建"), GateVerdict::Confirmed);
    }

    #[test]
    fn test_english_phrases_match_on_word_boundaries() {
        assert_eq!(at_confirm("Go ahead."), GateVerdict::Confirmed);
        assert_eq!(at_confirm("please create it"), GateVerdict::Confirmed);
        assert_eq!(at_confirm("I'd like to reconfirm the genre"), GateVerdict::NotConfirmed);
    }

    #[test]
    fn test_bare_affirmatives_pass_at_confirm_stage() {
        for prompt in ["yes", "OK!", "好的", "嗯。", "y"] {
            assert_eq!(at_confirm(prompt), GateVerdict::Confirmed, "{prompt}");
        }
    }

    #[test]
    fn test_bare_affirmative_must_be_the_whole_message() {
        assert_eq!(at_confirm("yes but change the title"), GateVerdict::NotConfirmed);
    }

    #[test]
    fn test_nothing_passes_before_confirm_stage() {
        assert_eq!(
            evaluate(CreationStage::Gathering, "确认创建"),
            GateVerdict::NotAtConfirmStage
        );
        assert_eq!(
            evaluate(CreationStage::Completed, "yes"),
            GateVerdict::NotAtConfirmStage
        );
    }

    #[test]
    fn test_unrelated_text_is_not_a_confirmation() {
        assert_eq!(at_confirm("make the villain scarier"), GateVerdict::NotConfirmed);
    }

    #[test]
    fn test_every_rejection_has_an_explanation() {
        for verdict in [
            GateVerdict::NotAtConfirmStage,
            GateVerdict::Vetoed,
            GateVerdict::NotConfirmed,
        ] {
            assert!(verdict.explanation().is_some());
        }
        assert!(GateVerdict::Confirmed.explanation().is_none());
    }
}
