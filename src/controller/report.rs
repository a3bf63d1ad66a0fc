//! Report formatting helpers.

/// Wraps every line of `report` longer than `width` at the last `,` or space
/// that fits. Continuation lines keep the line's leading tabs plus one more.
/// `width = 0` disables wrapping.
pub fn wrap_lines(report: &str, width: usize) -> String {
    if width == 0 {
        return report.to_string();
    }
    report
        .split('\n')
        .map(|line| wrap_line(line, width))
        .collect::<Vec<_>>()
        .join("\n")
}

fn wrap_line(line: &str, width: usize) -> String {
    let tabs = line.chars().take_while(|c| *c == '\t').count();
    let indent = "\t".repeat(tabs + 1);

    let mut out = String::with_capacity(line.len() + 8);
    let mut rest = line;
    while rest.chars().count() > width {
        let window_end = rest.char_indices().nth(width).map_or(rest.len(), |(i, _)| i);
        let Some(cut) = rest[..window_end].rfind([',', ' ']).filter(|&i| i > tabs) else {
            break;
        };
        out.push_str(rest[..=cut].trim_end());
        out.push('\n');
        out.push_str(&indent);
        rest = rest[cut + 1..].trim_start_matches(' ');
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lines_are_untouched() {
        assert_eq!(wrap_lines("a, b\n\tc", 80), "a, b\n\tc");
    }

    #[test]
    fn long_line_breaks_after_comma_with_extra_indent() {
        let got = wrap_lines("\tDONE=1, FAILED=2, ACTIVE=3", 12);
        assert_eq!(got, "\tDONE=1,\n\t\tFAILED=2,\n\t\tACTIVE=3");
    }

    #[test]
    fn unbreakable_line_is_left_alone() {
        assert_eq!(wrap_lines("abcdefghijkl", 4), "abcdefghijkl");
    }
}
