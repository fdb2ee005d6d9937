/// Pieces end after a newline when one fits; longer lines are cut hard.
pub fn split_by_lines(input: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chars: Vec<char> = input.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= limit {
        return vec![input.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + limit).min(chars.len());
        let cut = if end == chars.len() {
            end
        } else {
            chars[start..end]
                .iter()
                .rposition(|&c| c == '\n')
                .map_or(end, |newline| start + newline + 1)
        };
        pieces.push(chars[start..cut].iter().collect());
        start = cut;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_input_is_one_piece() {
        assert_eq!(split_by_lines("hello\n", 10), vec!["hello\n"]);
    }

    #[test]
    fn empty_input_has_no_pieces() {
        assert!(split_by_lines("", 10).is_empty());
    }

    #[test]
    fn prefers_line_boundaries() {
        assert_eq!(
            split_by_lines("aaa\nbbb\nccc\n", 9),
            vec!["aaa\nbbb\n", "ccc\n"]
        );
    }

    #[test]
    fn hard_splits_long_lines() {
        assert_eq!(
            split_by_lines("abcdefghij\nklmnop", 4),
            vec!["abcd", "efgh", "ij\n", "klmn", "op"]
        );
    }

    #[test]
    fn counts_characters_not_bytes() {
        let pieces = split_by_lines("ääää", 2);
        assert_eq!(pieces, vec!["ää", "ää"]);
    }

    #[test]
    fn pieces_reassemble_and_respect_the_limit() {
        let input: String = (0..300)
            .map(|i| format!("{}\n", "x".repeat(i % 37)))
            .collect::<String>()
            + &"y".repeat(95);
        for limit in [1, 7, 36, 50, 128] {
            let pieces = split_by_lines(&input, limit);
            assert!(pieces.iter().all(|p| p.chars().count() <= limit && !p.is_empty()));
            assert_eq!(pieces.concat(), input, "limit {limit}");
        }
    }
}
