use crate::rows::Cell;

/// Unicode whitespace variants that show up in hand-authored CMS spreadsheets.
const SPACE_VARIANTS: [char; 4] = ['\u{00A0}', '\u{202F}', '\u{2007}', '\u{200B}'];

/// Sentinel strings CMS files use for "no value".
fn is_non_value(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "" | "-" | "--" | "n/a" | "na" | "not found"
    )
}

/// Currency/number parsing: strips `$`, commas, parentheses, percent signs
/// and whitespace, treats sentinels as absent, and refuses any residue that
/// is not a plain number. Never used for code fields.
pub fn parse_numeric(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Empty => None,
        Cell::Number(n) => Some(*n),
        Cell::Text(raw) => {
            let trimmed = raw.trim();
            if is_non_value(trimmed) {
                return None;
            }
            let cleaned: String = trimmed
                .chars()
                .filter(|&c| !matches!(c, '$' | ',' | '(' | ')' | '%') && !c.is_whitespace())
                .collect();
            if cleaned.is_empty() || is_non_value(&cleaned) {
                return None;
            }
            cleaned.parse::<f64>().ok()
        }
    }
}

/// Free-text cleanup: trims, maps no-break/narrow/figure/zero-width spaces to
/// ordinary spaces and collapses runs; empty results become `None`.
pub fn parse_string(cell: &Cell) -> Option<String> {
    let text = cell.text()?;
    let mapped: String = text
        .chars()
        .map(|c| if SPACE_VARIANTS.contains(&c) { ' ' } else { c })
        .collect();
    let collapsed = mapped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Code identity: HCPCS/CPT values are opaque strings and must never pass
/// through numeric parsing, or leading zeros and alpha suffixes are lost.
/// Values with interior whitespace are descriptions, not codes, and are
/// rejected outright.
pub fn normalize_code(cell: &Cell, len: usize) -> Option<String> {
    let text = cell.text()?;
    if text.chars().any(char::is_whitespace) {
        return None;
    }
    let stripped: String = text
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if stripped.len() < len {
        return None;
    }
    Some(stripped.chars().take(len).collect())
}

/// ZIP5 normalization: digits only, ZIP+4 truncated, short values (Excel
/// loves stripping the leading zero) left-padded back to five digits.
pub fn normalize_zip5(cell: &Cell) -> Option<String> {
    let text = cell.text()?;
    let mut digits = String::with_capacity(5);
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 5 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        return None;
    }
    while digits.len() < 5 {
        digits.insert(0, '0');
    }
    Some(digits)
}

/// Locality identifiers are short numeric strings, not numbers; single-digit
/// values are padded to the two digits CMS publishes.
pub fn normalize_locality(cell: &Cell) -> Option<String> {
    let text = cell.text()?;
    if text.is_empty() || text.len() > 7 || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut code = text;
    while code.len() < 2 {
        code.insert(0, '0');
    }
    Some(code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateFeeColumn {
    pub state: &'static str,
    pub rental: bool,
}

/// 50 states plus DC and the territories CMS prices separately.
const STATES: [&str; 56] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY", "PR", "VI", "GU", "AS", "MP",
];

/// Matches the wide-format DME header labels `"XX (NR)"` / `"XX (R)"`.
pub fn parse_state_fee_header(header: &str) -> Option<StateFeeColumn> {
    let trimmed = header.trim();
    let open = trimmed.find('(')?;
    let close = trimmed.rfind(')')?;
    if close < open {
        return None;
    }
    let state_part = trimmed[..open].trim().to_ascii_uppercase();
    let kind = trimmed[open + 1..close].trim().to_ascii_uppercase();
    let state = STATES.iter().copied().find(|s| *s == state_part)?;
    let rental = match kind.as_str() {
        "R" => true,
        "NR" => false,
        _ => return None,
    };
    Some(StateFeeColumn { state, rental })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    #[test]
    fn numeric_strips_currency_formatting() {
        assert_eq!(parse_numeric(&text("$1,234.56")), Some(1234.56));
        assert_eq!(parse_numeric(&text(" (42.00) ")), Some(42.0));
        assert_eq!(parse_numeric(&text("17%")), Some(17.0));
        assert_eq!(parse_numeric(&Cell::Number(12.5)), Some(12.5));
    }

    #[test]
    fn numeric_sentinels_are_none() {
        for raw in ["", "  ", "-", "--", "N/A", "n/a", "Not Found", "NA"] {
            assert_eq!(parse_numeric(&text(raw)), None, "raw={raw:?}");
        }
        assert_eq!(parse_numeric(&Cell::Empty), None);
    }

    #[test]
    fn numeric_rejects_residue() {
        assert_eq!(parse_numeric(&text("12.3.4")), None);
        assert_eq!(parse_numeric(&text("see note")), None);
        assert_eq!(parse_numeric(&text("$12x")), None);
    }

    #[test]
    fn string_collapses_unicode_whitespace() {
        assert_eq!(
            parse_string(&text("ER\u{00A0}visit\u{202F} level\u{200B}4")),
            Some("ER visit level 4".to_string())
        );
        assert_eq!(parse_string(&text("   ")), None);
        assert_eq!(parse_string(&Cell::Number(42.0)), Some("42".to_string()));
    }

    #[test]
    fn codes_keep_leading_zeros_and_suffixes() {
        for code in ["00501", "0001U", "E0114", "99284", "A4253"] {
            assert_eq!(normalize_code(&text(code), 5).as_deref(), Some(code));
        }
        assert_eq!(normalize_code(&text("g0008"), 5).as_deref(), Some("G0008"));
    }

    #[test]
    fn codes_reject_descriptions_and_junk() {
        assert_eq!(normalize_code(&text("OFFICE VISIT"), 5), None);
        assert_eq!(normalize_code(&text("bad!!"), 5), None);
        assert_eq!(normalize_code(&Cell::Empty, 5), None);
        assert_eq!(normalize_code(&text("123"), 5), None);
    }

    #[test]
    fn overlong_codes_truncate_to_length() {
        assert_eq!(normalize_code(&text("99284NU"), 5).as_deref(), Some("99284"));
    }

    #[test]
    fn zip5_pads_and_truncates() {
        assert_eq!(normalize_zip5(&text("07001")).as_deref(), Some("07001"));
        assert_eq!(normalize_zip5(&text("7001")).as_deref(), Some("07001"));
        assert_eq!(normalize_zip5(&text("07001-1234")).as_deref(), Some("07001"));
        assert_eq!(normalize_zip5(&Cell::Number(7001.0)).as_deref(), Some("07001"));
        assert_eq!(normalize_zip5(&text("zip")), None);
    }

    #[test]
    fn locality_stays_a_string() {
        assert_eq!(normalize_locality(&text("00")).as_deref(), Some("00"));
        assert_eq!(normalize_locality(&Cell::Number(5.0)).as_deref(), Some("05"));
        assert_eq!(normalize_locality(&text("9912345x")), None);
    }

    #[test]
    fn state_fee_headers() {
        assert_eq!(
            parse_state_fee_header("CA (NR)"),
            Some(StateFeeColumn { state: "CA", rental: false })
        );
        assert_eq!(
            parse_state_fee_header(" ny ( r ) "),
            Some(StateFeeColumn { state: "NY", rental: true })
        );
        assert_eq!(parse_state_fee_header("XX (NR)"), None);
        assert_eq!(parse_state_fee_header("CA"), None);
        assert_eq!(parse_state_fee_header("CA (RENTAL)"), None);
    }
}
