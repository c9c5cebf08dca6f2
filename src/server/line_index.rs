//! Line-break indexing
//!
//! Positions on the wire are (line, UTF-16 column) pairs while buffers are
//! UTF-8 strings; the index maps between the two.

use lsp_types::Position;

/// Byte offset of every `\n` in `text`, ascending
pub fn line_break_offsets(text: &str) -> Vec<usize> {
    text.bytes()
        .enumerate()
        .filter(|(_, byte)| *byte == b'\n')
        .map(|(offset, _)| offset)
        .collect()
}

/// Line starts of one buffer
#[derive(Debug)]
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(line_break_offsets(text).into_iter().map(|offset| offset + 1))
            .collect();
        Self { text, line_starts }
    }

    /// Byte range of `line` without its terminator
    fn line_bounds(&self, line: usize) -> Option<(usize, usize)> {
        let start = *self.line_starts.get(line)?;
        let end = match self.line_starts.get(line + 1) {
            Some(next) => next - 1,
            None => self.text.len(),
        };
        let end = if self.text[start..end].ends_with('\r') {
            end - 1
        } else {
            end
        };
        Some((start, end))
    }

    /// Byte offset of `position`.
    ///
    /// A line past the end maps to the end of the buffer and a column past
    /// the end of its line maps to the end of that line. A column inside a
    /// surrogate pair maps to the start of the character.
    pub fn offset(&self, position: Position) -> usize {
        let Some((start, end)) = self.line_bounds(position.line as usize) else {
            return self.text.len();
        };

        let target = position.character as usize;
        let mut units = 0;
        for (index, ch) in self.text[start..end].char_indices() {
            let next = units + ch.len_utf16();
            if next > target {
                return start + index;
            }
            units = next;
        }
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_has_no_breaks() {
        assert!(line_break_offsets("").is_empty());
    }

    #[test]
    fn test_offsets_point_at_line_feeds() {
        let samples = [
            "x = 1",
            "x = 1\ny = 2\n",
            "\n\n\n",
            "λ = 1\r\nprint(λ)\n",
            "def f():\n    return \"🦀\"\n",
        ];

        for text in samples {
            let offsets = line_break_offsets(text);
            assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
            assert!(offsets.iter().all(|&offset| text.as_bytes()[offset] == b'\n'));
            assert_eq!(offsets.len(), text.matches('\n').count());
        }

        assert_eq!(line_break_offsets("a\nbc\n"), vec![1, 4]);
    }

    #[test]
    fn test_offset_of_position() {
        let text = "x = 1\ny = 2";
        let index = LineIndex::new(text);

        assert_eq!(index.offset(Position::new(0, 0)), 0);
        assert_eq!(index.offset(Position::new(1, 0)), 6);
        assert_eq!(index.offset(Position::new(1, 4)), 10);
    }

    #[test]
    fn test_offset_clamps_past_the_end() {
        let text = "ab\ncd\r\nef";
        let index = LineIndex::new(text);

        assert_eq!(index.offset(Position::new(0, 99)), 2);
        assert_eq!(index.offset(Position::new(1, 99)), 5);
        assert_eq!(index.offset(Position::new(7, 0)), text.len());
    }

    #[test]
    fn test_offset_counts_utf16_units() {
        // 'λ' is one UTF-16 unit and two bytes, '🦀' two units and four bytes
        let text = "λ🦀x";
        let index = LineIndex::new(text);

        assert_eq!(index.offset(Position::new(0, 1)), 2);
        assert_eq!(index.offset(Position::new(0, 3)), 6);
        assert_eq!(index.offset(Position::new(0, 2)), 2);
    }
}
