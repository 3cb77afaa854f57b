use std::sync::LazyLock;

use regex::Regex;

use crate::platform::MediaKind;

/// Default instruction sent ahead of every request. The model is asked to
/// answer in a fixed sectioned format; the reply is relayed without checking it.
pub const SYSTEM_INSTRUCTION: &str = "You are an expert fact-checker, journalist, and digital forensics analyst.
Analyze the provided content (which could be text, an article, an image, or a video) and determine if it is real, fake news, misleading, or satire.

Provide a response strictly in this format:
🚨 **Verdict:** [Real / Fake / Misleading / Satire / Unverified]

📝 **Explanation:** [Provide a detailed explanation. Point out any manipulated elements, logical fallacies, lack of sources, or known hoaxes.]

🔍 **Context & Facts:** [Provide the actual truth, background context, or correct information regarding the topic.]
";

const NO_CAPTION: &str = "No caption provided by the user.";

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("URL pattern is valid"));

/// Page text pulled from one link in the user's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub url: String,
    pub text: String,
}

/// All links in `text`, in order of appearance. Duplicates are kept.
pub fn find_urls(text: &str) -> Vec<&str> {
    URL_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Prompt for a text message, with one labeled block per extracted page.
pub fn text_prompt(instruction: &str, user_text: &str, extracted: &[ExtractedContent]) -> String {
    let mut prompt = format!("{instruction}\n\nUser Message/Claim: {user_text}\n");
    for block in extracted {
        prompt.push_str(&format!(
            "\n\n--- Content from {} ---\n{}",
            block.url, block.text
        ));
    }
    prompt
}

/// Prompt accompanying an uploaded photo or video.
pub fn media_prompt(instruction: &str, kind: MediaKind, caption: Option<&str>) -> String {
    let caption = caption
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(NO_CAPTION);
    format!(
        "{instruction}\n\nHere is a {kind} shared by the user. User's caption: '{caption}'. \
         Please analyze the media and caption for authenticity."
    )
}
