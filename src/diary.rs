//! Short narrative ("diary") over a day's captions.
//!
//! A text model writes it when one is configured; otherwise a fixed template
//! fills in the number of scenes and the first and last captions. Either way
//! the result is cut to `max_chars` characters.

use tracing::warn;

use crate::ai::TextModel;

pub(crate) const ELLIPSIS: &str = "...";

fn is_japanese(language: &str) -> bool {
    language.eq_ignore_ascii_case("ja")
}

/// Cuts `text` to at most `max_chars` characters, ending with `...` when
/// anything was dropped.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let marker = ELLIPSIS.len();
    if max_chars < marker {
        return ELLIPSIS[..max_chars].to_owned();
    }
    let mut out: String = text.chars().take(max_chars - marker).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Prompt for the text model: every caption as a `- ` bullet, followed by the
/// instructions.
pub(crate) fn build_prompt(captions: &[String], max_chars: usize, language: &str) -> String {
    let bullets = captions
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    let instructions = if is_japanese(language) {
        format!(
            "上記の箇条書きは、ある1日の映像を数秒ごとに要約した文です。\n\
             これらをもとに、{max_chars}文字以内の日本語で「今日の様子」を温かいトーンでまとめてください。\n\
             時系列の流れがなんとなく分かるようにしつつ、細かすぎる描写は省いて大丈夫です。"
        )
    } else {
        format!(
            "The bullet points above are captions describing moments in a single day.\n\
             Write a warm, short diary-style summary in {language} within {max_chars} characters."
        )
    };
    format!("{bullets}\n\n{instructions}")
}

/// Text used when there are no captions at all.
pub(crate) fn placeholder(language: &str) -> &'static str {
    if is_japanese(language) {
        "今日は短い記録しかありませんでした。"
    } else {
        "Only a short record was captured today."
    }
}

/// Diary built without a model.
pub(crate) fn template_diary(captions: &[String], max_chars: usize, language: &str) -> String {
    let (Some(first), Some(last)) = (captions.first(), captions.last()) else {
        return truncate_chars(placeholder(language), max_chars);
    };
    let n = captions.len();
    let ja = is_japanese(language);

    let mut lines = Vec::new();
    if ja {
        lines.push("【今日の記録】".to_owned());
        lines.push(format!("今日は全部で {n} 個のシーンが記録されました。"));
        lines.push(format!("最初のシーンは「{first}」でした。"));
    } else {
        lines.push("Today's record".to_owned());
        lines.push(format!("{n} scenes were recorded today."));
        lines.push(format!("The first scene: \"{first}\"."));
    }
    if n > 1 && last != first {
        lines.push(if ja {
            format!("最後のシーンは「{last}」でした。")
        } else {
            format!("The last scene: \"{last}\".")
        });
    }
    truncate_chars(&lines.join("\n"), max_chars)
}

/// Writes the diary for `captions` (in temporal order) with `model`, falling
/// back to the template when the model fails or returns nothing.
pub(crate) async fn synthesize(
    captions: &[String],
    max_chars: usize,
    language: &str,
    model: &TextModel,
) -> String {
    if captions.is_empty() {
        return truncate_chars(placeholder(language), max_chars);
    }

    let chat = match model {
        TextModel::Template => return template_diary(captions, max_chars, language),
        TextModel::Chat(chat) => chat,
    };

    let prompt = build_prompt(captions, max_chars, language);
    match chat.generate_text(&prompt).await {
        Ok(text) if !text.trim().is_empty() => truncate_chars(text.trim(), max_chars),
        Ok(_) => {
            warn!("text model returned an empty diary, using the template");
            template_diary(captions, max_chars, language)
        }
        Err(e) => {
            warn!("text model failed, using the template: {e:#}");
            template_diary(captions, max_chars, language)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captions(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn long_text_ends_with_ellipsis_at_exact_length() {
        let out = truncate_chars("abcdefghij", 8);
        assert_eq!(out, "abcde...");
        assert_eq!(out.chars().count(), 8);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let out = truncate_chars("今日はとても楽しい一日でした", 6);
        assert_eq!(out, "今日は...");
    }

    #[test]
    fn tiny_limits_still_hold() {
        assert_eq!(truncate_chars("abcdef", 2), "..");
        assert_eq!(truncate_chars("abcdef", 0), "");
    }

    #[test]
    fn prompt_lists_every_caption() {
        let prompt = build_prompt(&captions(&["a", "b"]), 200, "en");
        assert!(prompt.starts_with("- a\n- b\n\n"));
        assert!(prompt.contains("within 200 characters"));

        let ja = build_prompt(&captions(&["朝ごはん"]), 300, "ja");
        assert!(ja.contains("- 朝ごはん"));
        assert!(ja.contains("300文字以内"));
    }

    #[test]
    fn template_mentions_count_first_and_last() {
        let out = template_diary(&captions(&["wake up", "play", "sleep"]), 500, "en");
        assert!(out.contains("3 scenes"));
        assert!(out.contains("\"wake up\""));
        assert!(out.contains("\"sleep\""));
    }

    #[test]
    fn template_skips_last_when_same_as_first() {
        let out = template_diary(&captions(&["play", "play"]), 500, "en");
        assert!(!out.contains("last scene"));

        let single = template_diary(&captions(&["play"]), 500, "ja");
        assert!(!single.contains("最後"));
    }

    #[test]
    fn template_respects_the_limit() {
        let long = "x".repeat(400);
        for max in [0, 2, 3, 10, 57, 120] {
            let out = template_diary(&captions(&[&long, "end"]), max, "ja");
            assert!(out.chars().count() <= max, "{max}: {out}");
        }
        let out = template_diary(&captions(&[&long]), 50, "en");
        assert_eq!(out.chars().count(), 50);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[tokio::test]
    async fn no_captions_gives_the_placeholder() {
        let out = synthesize(&[], 500, "ja", &TextModel::Template).await;
        assert_eq!(out, placeholder("ja"));
        assert!(!out.is_empty());
    }

    #[tokio::test]
    async fn template_backend_is_used_without_a_model() {
        let caps = captions(&["a", "b"]);
        let out = synthesize(&caps, 500, "en", &TextModel::Template).await;
        assert_eq!(out, template_diary(&caps, 500, "en"));
    }
}
