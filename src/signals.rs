//! Parser for the importance/deadline line produced by the extraction
//! prompt. Models answer loosely ("重要度:5, 期限:2024-03-01",
//! "importance: 2, deadline: none", extra prose), so the parser looks for
//! shapes rather than a fixed grammar, and reports what it could not find
//! as `None`.

use chrono::NaiveDate;
use std::ops::Range;

const DATE_LEN: usize = "YYYY-MM-DD".len();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    /// 1..=5 when the model gave a usable score.
    pub importance: Option<u8>,
    pub deadline: Option<NaiveDate>,
}

impl Signals {
    pub fn is_empty(&self) -> bool {
        self.importance.is_none() && self.deadline.is_none()
    }

    pub fn deadline_string(&self) -> Option<String> {
        self.deadline.map(|d| d.format("%Y-%m-%d").to_string())
    }
}

fn is_date_shaped(bytes: &[u8]) -> bool {
    bytes.len() == DATE_LEN
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Byte ranges of every `DDDD-DD-DD` substring, leftmost first.
fn date_spans(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i + DATE_LEN <= bytes.len() {
        if is_date_shaped(&bytes[i..i + DATE_LEN]) {
            spans.push(i..i + DATE_LEN);
            i += DATE_LEN;
        } else {
            i += 1;
        }
    }
    spans
}

fn first_deadline(text: &str, spans: &[Range<usize>]) -> Option<NaiveDate> {
    spans
        .iter()
        .find_map(|span| NaiveDate::parse_from_str(&text[span.clone()], "%Y-%m-%d").ok())
}

/// The first run of digits outside any date span must be a single digit
/// in 1..=5 to count as an importance score.
fn first_importance(text: &str, spans: &[Range<usize>]) -> Option<u8> {
    let bytes = text.as_bytes();
    let in_date = |i: usize| spans.iter().any(|s| s.contains(&i));

    let start = (0..bytes.len()).find(|&i| bytes[i].is_ascii_digit() && !in_date(i))?;
    let run_len = bytes[start..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if run_len != 1 {
        return None;
    }

    match bytes[start] - b'0' {
        score @ 1..=5 => Some(score),
        _ => None,
    }
}

pub fn parse(text: &str) -> Signals {
    let spans = date_spans(text);
    Signals {
        importance: first_importance(text, &spans),
        deadline: first_deadline(text, &spans),
    }
}
