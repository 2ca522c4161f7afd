use chrono::NaiveDate;

/// Chat-template markers some local models leak into completions.
const TURN_DELIMITERS: [&str; 6] = [
    "</start_of_turn>",
    "</end_of_turn>",
    "<start_of_turn>",
    "<end_of_turn>",
    "<|im_end|>",
    "<|eot_id|>",
];

pub fn summary_prompt(body: &str, language: &str, lines: usize) -> String {
    format!(
        "You are a summarization assistant for a very busy professional.\n\
         Follow these rules strictly when summarizing the email below.\n\
         \n\
         - Summarize the content as a bulleted list of at most {lines} lines.\n\
         - Do not add greetings or preambles such as \"Here is the summary\".\n\
         - Do not copy the body verbatim; restate only the key points.\n\
         - Write the summary in {language}.\n\
         \n\
         Email: {body}"
    )
}

pub fn signals_prompt(body: &str, today: NaiveDate) -> String {
    format!(
        "You are the unsentimental secretary of the busiest CEO in the world.\n\
         Analyze the email below and extract two values, judging very strictly.\n\
         \n\
         1. Importance: a number from 1 (unneeded) to 5 (urgent)\n\
         \x20  - 5: the company is at risk unless you reply right now\n\
         \x20  - 3: ordinary business that needs the recipient's confirmation\n\
         \x20  - 1: ads, newsletters, automated notices, greetings, reports that can wait\n\
         \x20  If unsure, answer 1.\n\
         \n\
         2. Deadline: the single most important future date (YYYY-MM-DD), or \"none\".\n\
         \n\
         Today is {today}. Resolve relative expressions such as \"tomorrow\" or \"next week\" from today.\n\
         Reply only in the form \"importance: <number>, deadline: <date>\" with no explanation.\n\
         \n\
         Email: {body}",
        today = today.format("%Y-%m-%d"),
    )
}

/// Removes leaked turn delimiters and surrounding whitespace.
pub fn clean_response(raw: &str) -> String {
    let mut text = raw.to_string();
    for marker in TURN_DELIMITERS {
        text = text.replace(marker, "");
    }
    text.trim().to_string()
}
