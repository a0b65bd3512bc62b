//! Token-aware structural text splitter.
//!
//! Splits markdown into chunks of at most `max_tokens`: fenced code blocks
//! are extracted first and never split (an oversized block is emitted as a
//! single oversized chunk), headings are the primary split points,
//! paragraphs the secondary, sentences the last resort. A conversation turn
//! that fits the ceiling stays a single chunk. Output is deterministic for
//! a given tokenizer and ceiling.

use std::sync::Arc;
use tokenizers::Tokenizer;

/// Counts tokens with the embedding tokenizer when available, falling back
/// to a words/0.75 approximation.
#[derive(Clone)]
pub enum TokenCounter {
    Tokenizer(Arc<Tokenizer>),
    Approximate,
}

impl TokenCounter {
    pub fn approximate() -> Self {
        Self::Approximate
    }

    pub fn count(&self, text: &str) -> usize {
        match self {
            Self::Tokenizer(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.get_ids().len(),
                Err(_) => approximate_tokens(text),
            },
            Self::Approximate => approximate_tokens(text),
        }
    }
}

fn approximate_tokens(text: &str) -> usize {
    // 1 token ≈ 0.75 words
    (text.split_whitespace().count() as f64 / 0.75) as usize
}

/// An ordered piece of a memory's content, pre-embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub tokens: usize,
}

pub struct Chunker {
    counter: TokenCounter,
    max_tokens: usize,
}

impl Chunker {
    pub fn new(counter: TokenCounter, max_tokens: usize) -> Self {
        Self {
            counter,
            max_tokens: max_tokens.max(1),
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Chunk a user+assistant turn: a single chunk unless it exceeds the
    /// ceiling, in which case the structural splitter takes over.
    pub fn chunk_conversation(&self, content: &str) -> Vec<TextChunk> {
        let tokens = self.counter.count(content);
        if tokens <= self.max_tokens {
            return vec![TextChunk {
                content: content.to_string(),
                tokens,
            }];
        }
        self.chunk(content)
    }

    /// Structural split: fences out, headings, paragraphs, sentences.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let (masked, code_blocks) = extract_code_blocks(text);

        let mut pieces: Vec<String> = Vec::new();
        for section in split_by_headings(&masked) {
            if self.count_restored(&section, &code_blocks) > self.max_tokens {
                pieces.extend(self.split_by_paragraphs(&section, &code_blocks));
            } else {
                pieces.push(section);
            }
        }

        pieces
            .into_iter()
            .map(|piece| restore_code_blocks(&piece, &code_blocks))
            .filter(|piece| !piece.trim().is_empty())
            .map(|piece| {
                let trimmed = piece.trim().to_string();
                let tokens = self.counter.count(&trimmed);
                TextChunk {
                    content: trimmed,
                    tokens,
                }
            })
            .collect()
    }

    /// Token count of a piece with its code placeholders restored, so fence
    /// contents weigh in on split decisions.
    fn count_restored(&self, piece: &str, code_blocks: &[String]) -> usize {
        self.counter.count(&restore_code_blocks(piece, code_blocks))
    }

    fn split_by_paragraphs(&self, text: &str, code_blocks: &[String]) -> Vec<String> {
        let paragraphs: Vec<&str> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;

        for para in paragraphs {
            let para_tokens = self.count_restored(para, code_blocks);

            if para_tokens > self.max_tokens {
                if !current.is_empty() {
                    chunks.push(current.join("\n\n"));
                    current.clear();
                    current_tokens = 0;
                }
                // A placeholder-only paragraph is a fenced code block: emit
                // as-is, oversized or not. Prose falls through to sentences.
                if is_placeholder(para) {
                    chunks.push(para.to_string());
                } else {
                    chunks.extend(self.split_by_sentences(para));
                }
                continue;
            }

            if current_tokens + para_tokens > self.max_tokens && !current.is_empty() {
                chunks.push(current.join("\n\n"));
                current.clear();
                current_tokens = 0;
            }
            current.push(para);
            current_tokens += para_tokens;
        }

        if !current.is_empty() {
            chunks.push(current.join("\n\n"));
        }
        chunks
    }

    fn split_by_sentences(&self, text: &str) -> Vec<String> {
        let sentences = split_sentences(text);

        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;

        for sentence in &sentences {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            let sentence_tokens = self.counter.count(sentence);

            // An indivisible oversized sentence is emitted as-is.
            if sentence_tokens > self.max_tokens {
                if !current.is_empty() {
                    chunks.push(current.join(" "));
                    current.clear();
                    current_tokens = 0;
                }
                chunks.push(sentence.to_string());
                continue;
            }

            if current_tokens + sentence_tokens > self.max_tokens && !current.is_empty() {
                chunks.push(current.join(" "));
                current.clear();
                current_tokens = 0;
            }
            current.push(sentence);
            current_tokens += sentence_tokens;
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }
}

fn placeholder(index: usize) -> String {
    format!("\u{0}CODE{index}\u{0}")
}

fn is_placeholder(text: &str) -> bool {
    let t = text.trim();
    t.starts_with('\u{0}') && t.ends_with('\u{0}') && t.matches('\u{0}').count() == 2
}

/// Replace fenced code blocks with placeholders so structural splits never
/// land inside a fence. Unterminated fences run to the end of input.
fn extract_code_blocks(text: &str) -> (String, Vec<String>) {
    let mut blocks = Vec::new();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let end = after_fence.find("```").map(|i| start + 3 + i + 3);

        out.push_str(&rest[..start]);
        let (block, remainder) = match end {
            Some(end) => (&rest[start..end], &rest[end..]),
            None => (&rest[start..], ""),
        };
        out.push_str(&placeholder(blocks.len()));
        blocks.push(block.to_string());
        rest = remainder;
    }
    out.push_str(rest);
    (out, blocks)
}

fn restore_code_blocks(text: &str, blocks: &[String]) -> String {
    let mut restored = text.to_string();
    for (i, block) in blocks.iter().enumerate() {
        restored = restored.replace(&placeholder(i), block);
    }
    restored
}

/// Split on markdown heading lines (`#` through `######`). Content before
/// the first heading forms its own section.
fn split_by_headings(text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if is_heading(line) {
            if !current.is_empty() {
                sections.push(current.join("\n"));
                current.clear();
            }
        }
        current.push(line);
    }
    if !current.is_empty() {
        sections.push(current.join("\n"));
    }

    if sections.is_empty() {
        vec![text.to_string()]
    } else {
        sections
    }
}

fn is_heading(line: &str) -> bool {
    let hashes = line.len() - line.trim_start_matches('#').len();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

/// Sentence boundaries: `.`, `!`, `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let next = i + 1;
            if next >= bytes.len() || bytes[next].is_ascii_whitespace() {
                sentences.push(text[start..next].to_string());
                start = next;
            }
        }
        i += 1;
    }
    if start < text.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }
    sentences
}
