//! Canonical form for flag names.
//!
//! Requested keys and raw feature identifiers both go through [`normalize`]
//! before they touch the data map or the memo cache, so `dark-mode`,
//! `dark_mode`, `Dark Mode` and `darkMode` all address the same flag.

// A single camel-case pass is not always a fixed point ("a b c" -> "aBC" -> "aBc"),
// so normalization repeats it. Two or three passes settle every input seen so far.
const MAX_PASSES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    // Alphabetic without case, e.g. CJK.
    Caseless,
}

impl CharClass {
    fn of(c: char) -> Self {
        if c.is_numeric() {
            CharClass::Digit
        } else if c.is_uppercase() {
            CharClass::Upper
        } else if c.is_lowercase() {
            CharClass::Lower
        } else {
            CharClass::Caseless
        }
    }
}

/// Maps any string to its camel-case canonical key.
///
/// Total and idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    let mut current = camelize(raw);
    for _ in 0..MAX_PASSES {
        let next = camelize(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn camelize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (position, word) in words(input).into_iter().enumerate() {
        let mut chars = word.chars();
        if position == 0 {
            out.extend(chars.flat_map(char::to_lowercase));
        } else if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.extend(chars.flat_map(char::to_lowercase));
        }
    }
    out
}

/// Splits on non-alphanumeric characters, then on case and digit boundaries.
fn words(input: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut run: Vec<(usize, char)> = Vec::new();

    for (idx, c) in input.char_indices() {
        if c.is_alphanumeric() {
            run.push((idx, c));
        } else {
            split_run(input, &run, &mut words);
            run.clear();
        }
    }
    split_run(input, &run, &mut words);

    words
}

fn split_run<'a>(input: &'a str, run: &[(usize, char)], words: &mut Vec<&'a str>) {
    let (Some(&(first, _)), Some(&(last, last_char))) = (run.first(), run.last()) else {
        return;
    };
    let end = last + last_char.len_utf8();
    let mut start = first;

    for i in 1..run.len() {
        let (idx, c) = run[i];
        let prev = CharClass::of(run[i - 1].1);

        let split_at = match (prev, CharClass::of(c)) {
            (CharClass::Digit, CharClass::Digit) => None,
            (CharClass::Digit, _) | (_, CharClass::Digit) => Some(idx),
            (CharClass::Lower | CharClass::Caseless, CharClass::Upper) => Some(idx),
            // "XMLHttp": the last capital of the run starts the next word
            (CharClass::Upper, CharClass::Lower)
                if i >= 2 && CharClass::of(run[i - 2].1) == CharClass::Upper =>
            {
                Some(run[i - 1].0)
            }
            _ => None,
        };

        if let Some(at) = split_at
            && at > start
        {
            words.push(&input[start..at]);
            start = at;
        }
    }

    words.push(&input[start..end]);
}
