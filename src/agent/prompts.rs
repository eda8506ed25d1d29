/// System prompt for the meeting summarizer
pub const MEETING_SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that creates concise meeting summaries.";

/// Sections the summary must contain, in order
pub const SUMMARY_SECTIONS: [&str; 4] = ["Meeting Overview", "Key Points", "Action Items", "Next Steps"];

/// Builds the user prompt asking for a markdown summary of `transcript`
pub fn build_summary_prompt(transcript: &str) -> String {
    let sections = SUMMARY_SECTIONS
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Please summarize this meeting transcript and format it in markdown:\n\n{transcript}\n\nFormat the summary with these sections:\n{sections}"
    )
}

/// Removes control characters from a transcript, keeping line breaks and tabs
pub fn sanitize_transcript(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
