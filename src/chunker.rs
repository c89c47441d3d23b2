//! Separator-driven text splitting for embedding-sized chunks.
//!
//! The splitter picks the first separator (in priority order) that occurs in
//! the text and only that one; separators are not combined hierarchically. A
//! piece longer than `chunk_size` therefore survives as an oversized chunk.

/// Default separator priority: paragraph, line, Japanese full stop and comma,
/// space, then character-level splitting.
pub const DEFAULT_SEPARATORS: [&str; 6] = ["\n\n", "\n", "。", "、", " ", ""];

/// Chunking tuning knobs. Sizes are counted in Unicode scalar values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum characters per reassembled chunk.
    pub chunk_size: usize,
    /// Characters shared by consecutive fixed-width windows.
    pub chunk_overlap: usize,
    /// Chunks whose trimmed length is at or below this are dropped.
    pub min_chunk_len: usize,
    /// Separators in priority order. An empty string means character-level
    /// splitting and ends the search.
    pub separators: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_len: 50,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Stateless text splitter.
#[derive(Debug, Clone, Default)]
pub struct TextSplitter {
    config: ChunkerConfig,
}

impl TextSplitter {
    /// Builds a splitter with the provided config.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Returns the underlying config reference.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits `text` into trimmed chunks, discarding near-empty fragments.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let chunks = match self.pick_separator(text) {
            Some(separator) => self.merge_pieces(text, separator),
            None => self.fixed_windows(text),
        };
        chunks
            .into_iter()
            .filter(|chunk| char_len(chunk.trim()) > self.config.min_chunk_len)
            .collect()
    }

    fn pick_separator(&self, text: &str) -> Option<&str> {
        self.config
            .separators
            .iter()
            .map(String::as_str)
            .take_while(|separator| !separator.is_empty())
            .find(|separator| text.contains(separator))
    }

    fn merge_pieces(&self, text: &str, separator: &str) -> Vec<String> {
        let limit = self.config.chunk_size.max(1);
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;

        for piece in text.split(separator) {
            let piece_len = char_len(piece);
            if current_len + separator_len + piece_len <= limit {
                if !current.is_empty() {
                    current.push_str(separator);
                    current_len += separator_len;
                }
                current.push_str(piece);
                current_len += piece_len;
            } else {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                }
                current = piece.to_string();
                current_len = piece_len;
            }
        }

        if !current.is_empty() {
            chunks.push(current.trim().to_string());
        }
        chunks
    }

    fn fixed_windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let size = self.config.chunk_size.max(1);
        let step = size.saturating_sub(self.config.chunk_overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let end = (start + size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
            start += step;
        }
        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize, min_chunk_len: usize) -> TextSplitter {
        TextSplitter::new(ChunkerConfig {
            chunk_size,
            chunk_overlap,
            min_chunk_len,
            ..ChunkerConfig::default()
        })
    }

    fn alphabet(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn empty_and_short_inputs_yield_nothing() {
        let splitter = TextSplitter::default();
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("short note").is_empty());
        assert!(splitter.split(&"x".repeat(50)).is_empty());
        assert_eq!(splitter.split(&"x".repeat(51)).len(), 1);
    }

    #[test]
    fn reassembles_paragraphs_up_to_limit() {
        let para = "p".repeat(40);
        let text = format!("{para}\n\n{para}\n\n{para}");
        let chunks = splitter(100, 20, 10).split(&text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{para}\n\n{para}"));
        assert_eq!(chunks[1], para);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 100));
    }

    #[test]
    fn uses_only_the_first_separator_present() {
        // Line breaks win over spaces even though spaces would fit better.
        let line = format!("{} {}", "w".repeat(30), "v".repeat(30));
        let text = format!("{line}\n{line}");
        let chunks = splitter(80, 0, 10).split(&text);

        assert_eq!(chunks, vec![line.clone(), line]);
    }

    #[test]
    fn oversized_piece_is_kept_whole() {
        let long = "z".repeat(150);
        let text = format!("{long}\n\n{}", "y".repeat(20));
        let chunks = splitter(100, 0, 10).split(&text);

        assert_eq!(chunks[0].chars().count(), 150);
        assert_eq!(chunks[1], "y".repeat(20));
    }

    #[test]
    fn splits_on_japanese_full_stop() {
        let sentence = "あ".repeat(30);
        let text = format!("{sentence}。{sentence}。{sentence}");
        let chunks = splitter(62, 0, 5).split(&text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{sentence}。{sentence}"));
        assert_eq!(chunks[1].chars().count(), 30);
    }

    #[test]
    fn falls_back_to_overlapping_windows() {
        let text = alphabet(250);
        let chunks = splitter(100, 20, 5).split(&text);

        let lengths: Vec<usize> = chunks.iter().map(|chunk| chunk.chars().count()).collect();
        assert_eq!(lengths, vec![100, 100, 90, 10]);
        assert_eq!(&chunks[1][..20], &chunks[0][80..]);
    }

    #[test]
    fn window_fallback_drops_short_tail() {
        let chunks = TextSplitter::new(ChunkerConfig {
            chunk_size: 100,
            chunk_overlap: 20,
            ..ChunkerConfig::default()
        })
        .split(&alphabet(250));
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn overlap_larger_than_size_still_advances() {
        let chunks = splitter(10, 50, 0).split(&alphabet(30));
        assert_eq!(chunks.len(), 30);
    }

    #[test]
    fn empty_separator_stops_the_search() {
        let config = ChunkerConfig {
            chunk_size: 20,
            chunk_overlap: 0,
            min_chunk_len: 0,
            separators: vec!["\n\n".into(), String::new(), " ".into()],
        };
        let chunks = TextSplitter::new(config).split("aaaaaaaaaa bbbbbbbbbb cccccccccc");
        assert_eq!(chunks, vec!["aaaaaaaaaa bbbbbbbbb", "b cccccccccc"]);
    }
}
