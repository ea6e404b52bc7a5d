use std::collections::HashSet;

pub type Trigram = [char; 3];

/// Trigram set of `text`: lower-cased, split into alphanumeric words, each word
/// padded with two leading blanks and one trailing blank.
pub fn trigrams(text: &str) -> HashSet<Trigram> {
    let lowercase = text.to_lowercase();
    let mut grams = HashSet::new();

    for word in lowercase
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = [' ', ' ']
            .into_iter()
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            grams.insert([window[0], window[1], window[2]]);
        }
    }

    grams
}

/// Shared trigrams over distinct trigrams of both sets.
pub fn set_similarity(a: &HashSet<Trigram>, b: &HashSet<Trigram>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

pub fn similarity(a: &str, b: &str) -> f64 {
    set_similarity(&trigrams(a), &trigrams(b))
}

/// Bare lower-case DOI, or `None` when the field is blank.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lowercase = trimmed.to_lowercase();

    let stripped = [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ]
    .iter()
    .find_map(|prefix| lowercase.strip_prefix(prefix))
    .unwrap_or(lowercase.as_str())
    .trim();

    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// DOIs agree when they are equal after normalization, or when either is blank.
pub fn dois_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (a.and_then(normalize_doi), b.and_then(normalize_doi)) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}
