//! String similarity for approximate key matching. Scores are in `0.0..=1.0`.

use hub_core::rules::mapping::{FuzzyAlgorithm, FuzzyMatchConfig, Preprocessing};

/// American Soundex code, e.g. `Robert` -> `R163`. Empty for text with no letters.
#[must_use]
pub fn soundex(s: &str) -> String {
    const fn digit(c: char) -> Option<char> {
        match c {
            'B' | 'F' | 'P' | 'V' => Some('1'),
            'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => Some('2'),
            'D' | 'T' => Some('3'),
            'L' => Some('4'),
            'M' | 'N' => Some('5'),
            'R' => Some('6'),
            _ => None,
        }
    }

    let mut letters = s
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase());
    let Some(first) = letters.next() else {
        return String::new();
    };
    let mut code = String::from(first);
    let mut last = digit(first);
    for c in letters {
        let d = digit(c);
        if let Some(d) = d {
            if last != Some(d) {
                code.push(d);
                if code.len() == 4 {
                    break;
                }
            }
        }
        // H and W do not separate equal codes; vowels do.
        if !matches!(c, 'H' | 'W') {
            last = d;
        }
    }
    while code.len() < 4 {
        code.push('0');
    }
    code
}

/// Apply the configured preprocessing steps and case folding.
#[must_use]
pub fn preprocess(value: &str, config: &FuzzyMatchConfig) -> String {
    let mut out = value.to_string();
    for step in &config.preprocessing {
        out = match step {
            Preprocessing::Trim => out.trim().to_string(),
            Preprocessing::Normalize => out.split_whitespace().collect::<Vec<_>>().join(" "),
            Preprocessing::RemoveSpecial => out
                .chars()
                .filter(|c| c.is_alphanumeric() || c.is_whitespace())
                .collect(),
        };
    }
    if config.case_ignore {
        out = out.to_lowercase();
    }
    out
}

/// Similarity of two already-preprocessed strings.
#[must_use]
pub fn similarity(algorithm: FuzzyAlgorithm, a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    match algorithm {
        FuzzyAlgorithm::Levenshtein => strsim::normalized_levenshtein(a, b),
        FuzzyAlgorithm::Jaro => strsim::jaro(a, b),
        FuzzyAlgorithm::Soundex => {
            let (x, y) = (soundex(a), soundex(b));
            if !x.is_empty() && x == y { 1.0 } else { 0.0 }
        }
    }
}
