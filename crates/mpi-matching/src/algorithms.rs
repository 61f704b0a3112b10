//! String similarity and phonetic encoders used by the scorer.

use crate::config::{Algorithm, AlgorithmFamily};

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// American Soundex code (letter plus three digits).
///
/// Non-ASCII-letter characters are dropped first; returns `None` when
/// nothing is left to encode.
pub fn soundex(value: &str) -> Option<String> {
    let mut letters = value
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase());

    let first = letters.next()?;
    let mut code = String::with_capacity(4);
    code.push(first);

    let mut last = soundex_digit(first);
    for c in letters {
        match c {
            // H and W do not separate equal codes.
            'H' | 'W' => continue,
            'A' | 'E' | 'I' | 'O' | 'U' | 'Y' => last = None,
            _ => {
                let digit = soundex_digit(c);
                if let Some(d) = digit.filter(|_| digit != last) {
                    code.push(d);
                }
                last = digit;
            }
        }
        if code.len() == 4 {
            break;
        }
    }

    while code.len() < 4 {
        code.push('0');
    }
    Some(code)
}

fn soundex_digit(c: char) -> Option<char> {
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

/// Precomputed form of a raw value for `algorithm`.
///
/// Exact and unsupported algorithms have no representation.
pub fn representation(algorithm: &Algorithm, raw: &str) -> Option<String> {
    match algorithm.family() {
        AlgorithmFamily::Distance => {
            let n = normalize(raw);
            (!n.is_empty()).then_some(n)
        }
        AlgorithmFamily::Phonetic => soundex(raw),
        AlgorithmFamily::Exact | AlgorithmFamily::Unsupported => None,
    }
}

/// Similarity of two representations in `[0, 1]`.
pub fn similarity(algorithm: &Algorithm, a: &str, b: &str) -> f64 {
    match algorithm {
        Algorithm::Exact => {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
        Algorithm::Levenshtein | Algorithm::Soundex => strsim::normalized_levenshtein(a, b),
        Algorithm::JaroWinkler => strsim::jaro_winkler(a, b),
        Algorithm::Unsupported(_) => 0.0,
    }
}

/// Best pairwise similarity between two multi-valued fields.
pub fn best_similarity(algorithm: &Algorithm, query: &[String], candidate: &[String]) -> f64 {
    query
        .iter()
        .flat_map(|q| candidate.iter().map(move |c| similarity(algorithm, q, c)))
        .fold(0.0, f64::max)
}
