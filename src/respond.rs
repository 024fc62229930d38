//! Splits a finished summary into Discord-sized segments.
//!
//! Splitting prefers paragraph breaks, then line breaks, then sentence
//! boundaries, then whitespace, and hard-splits a run of characters only
//! when a single word alone exceeds the limit. Segments are never trimmed,
//! so concatenating them reproduces the input exactly.

#[derive(Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
    Hard,
}

impl Boundary {
    fn finer(self) -> Boundary {
        match self {
            Boundary::Paragraph => Boundary::Line,
            Boundary::Line => Boundary::Sentence,
            Boundary::Sentence => Boundary::Word,
            Boundary::Word | Boundary::Hard => Boundary::Hard,
        }
    }
}

/// Split `text` into segments of at most `max_len` characters each.
pub fn split_for_posting(text: &str, max_len: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    split_at(text, max_len.max(1), Boundary::Paragraph)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_at(text: &str, max_len: usize, boundary: Boundary) -> Vec<String> {
    if char_len(text) <= max_len {
        return vec![text.to_string()];
    }
    if let Boundary::Hard = boundary {
        return hard_split(text, max_len);
    }

    let pieces = pieces_at(text, boundary);
    if pieces.len() < 2 {
        // No boundary of this kind inside the text, go one level finer.
        return split_at(text, max_len, boundary.finer());
    }

    let mut segments: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for piece in pieces {
        let piece_len = char_len(&piece);

        if piece_len > max_len {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
                current_len = 0;
            }
            segments.extend(split_at(&piece, max_len, boundary.finer()));
            continue;
        }

        if current_len + piece_len > max_len && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(&piece);
        current_len += piece_len;
    }
    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

/// Cut `text` into pieces at the given boundary, keeping every delimiter
/// attached to the piece before it.
fn pieces_at(text: &str, boundary: Boundary) -> Vec<String> {
    match boundary {
        Boundary::Paragraph => text.split_inclusive("\n\n").map(str::to_string).collect(),
        Boundary::Line => text.split_inclusive('\n').map(str::to_string).collect(),
        Boundary::Sentence => split_sentences(text),
        Boundary::Word => text
            .split_inclusive(char::is_whitespace)
            .map(str::to_string)
            .collect(),
        Boundary::Hard => vec![text.to_string()],
    }
}

/// Cut after sentence-ending punctuation followed by whitespace; the single
/// whitespace character stays with the sentence it ends.
fn split_sentences(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next_idx, next)) = chars.peek() {
                if next.is_whitespace() {
                    let cut = next_idx + next.len_utf8();
                    pieces.push(text[start..cut].to_string());
                    start = cut;
                    chars.next();
                }
            }
        }
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces
}

fn hard_split(text: &str, max_len: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;

    for c in text.chars() {
        if count == max_len {
            segments.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(c);
        count += 1;
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}
