use crate::TextChunk;

pub const SENTENCE_TERMINATOR: char = '。';

/// Splits `text` into chunks of at most `target_size` characters.
///
/// Breaks only after a sentence terminator. A sentence longer than
/// `target_size` becomes a chunk of its own and is never cut.
pub fn split_into_chunks(text: &str, target_size: usize) -> Vec<TextChunk> {
    let target_size = target_size.max(1);
    if text.chars().count() <= target_size {
        return vec![TextChunk::new(1, text.to_string())];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in sentences(text) {
        let len = sentence.chars().count();
        if current_len > 0 && current_len + len > target_size {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(sentence);
        current_len += len;
    }
    if current_len > 0 {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextChunk::new(i + 1, text))
        .collect()
}

/// Sentences with their terminator attached; whitespace-only pieces are skipped.
fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(SENTENCE_TERMINATOR)
        .filter(|s| !s.trim().is_empty())
}
