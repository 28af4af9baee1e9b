use embedded_graphics::pixelcolor::Rgb888;

/// Convert a 0xRRGGBB literal to Rgb888.
pub const fn rgb(hex: u32) -> Rgb888 {
    Rgb888::new((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
}

// ── Panel geometry ──────────────────────────────────────────────────

pub const PANEL_W: i32 = 64;
pub const PANEL_H: i32 = 64;

/// Bottom row, used by the announcement progress bar.
pub const PROGRESS_ROW: i32 = PANEL_H - 1;

// ── Train widget ────────────────────────────────────────────────────

pub const LOGO_SIZE: u32 = 24;
pub const HEADER_TEXT_Y: i32 = 8;
pub const TRAIN_ROW_Y: [i32; 2] = [27, 42];
pub const DOT_SIZE: u32 = 5;
pub const TIME_TEXT_X: i32 = 8;
pub const FOOTER_Y: i32 = 56;

// ── Colors ──────────────────────────────────────────────────────────

pub const BLACK: Rgb888 = rgb(0x000000);
pub const WHITE: Rgb888 = rgb(0xFFFFFF);
pub const LOGO_BLUE: Rgb888 = rgb(0x0066FF);

pub const DOT_UNKNOWN: Rgb888 = WHITE;
pub const DOT_TOO_LATE: Rgb888 = rgb(0xFF3333);
pub const DOT_HURRY: Rgb888 = rgb(0xFFCC33);
pub const DOT_RELAXED: Rgb888 = rgb(0x33FF66);

pub const ERROR_RED: Rgb888 = rgb(0xFF0000);
pub const FATAL_ORANGE: Rgb888 = rgb(0xFF9F0A);

pub const MUSIC_GREEN: Rgb888 = rgb(0x1DB954);
pub const MUSIC_RED: Rgb888 = rgb(0xFF3B30);
pub const MUSIC_ORANGE: Rgb888 = rgb(0xFF9F0A);

pub const PROGRESS_GREEN: Rgb888 = rgb(0x00FF00);
pub const ACTIVITY_PIXEL: Rgb888 = rgb(0x00A0FF);

/// Parse "0xRRGGBB", "#RRGGBB" or bare hex.
pub fn parse_color(value: &str) -> Option<Rgb888> {
    let v = value.trim();
    let hex = v
        .strip_prefix("0x")
        .or_else(|| v.strip_prefix("0X"))
        .or_else(|| v.strip_prefix('#'))
        .unwrap_or(v);
    if hex.is_empty() || hex.len() > 6 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().map(rgb)
}

// ── Text wrapping ───────────────────────────────────────────────────

/// Greedy word wrap into at most `max_lines` lines of `max_chars` characters.
/// Words longer than a line are split; overflow is dropped.
pub fn wrap_words(text: &str, max_chars: usize, max_lines: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..max_chars).collect());
        }
        let word: String = word.into_iter().collect();
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.truncate(max_lines);
    lines
}

/// Error text for the panel: at most two lines of sixteen characters.
pub fn wrap_message(message: &str, max_chars: usize, max_lines: usize) -> Vec<String> {
    let lines = wrap_words(message, max_chars, max_lines);
    if lines.is_empty() {
        vec!["Error".to_string()]
    } else {
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_parsing() {
        assert_eq!(parse_color("0xFF0000"), Some(rgb(0xFF0000)));
        assert_eq!(parse_color("#00ff00"), Some(Rgb888::new(0, 255, 0)));
        assert_eq!(parse_color("12"), Some(rgb(0x000012)));
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color(""), None);
    }

    #[test]
    fn wrap_keeps_two_lines() {
        assert_eq!(
            wrap_message("Spotify token refresh failed badly", 16, 2),
            vec!["Spotify token", "refresh failed"]
        );
        assert_eq!(wrap_message("", 16, 2), vec!["Error"]);
    }

    #[test]
    fn long_words_are_split() {
        assert_eq!(wrap_words("abcdefghij", 4, 3), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_words("hi abcdefgh", 4, 4), vec!["hi", "abcd", "efgh"]);
    }
}
