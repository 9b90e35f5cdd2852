#![forbid(unsafe_code)]

/// Glob matching over `/`-separated paths.
///
/// `*` and `?` stay inside one segment, `**` crosses segments (and `**/` may match zero
/// directories). There is no character-class support.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let tokens = tokenize(pattern);
    let path = path.chars().collect::<Vec<_>>();

    // `reach[j]`: the tokens consumed so far match `path[..j]`. One pass per token keeps
    // the cost at tokens x path length whatever the number of wildcards.
    let mut reach = vec![false; path.len() + 1];
    reach[0] = true;
    let mut next = vec![false; path.len() + 1];
    for token in &tokens {
        next.fill(false);
        match token {
            Token::Literal(ch) => {
                for j in 0..path.len() {
                    next[j + 1] = reach[j] && path[j] == *ch;
                }
            }
            Token::AnyChar => {
                for j in 0..path.len() {
                    next[j + 1] = reach[j] && path[j] != '/';
                }
            }
            Token::AnySegment => {
                next[0] = reach[0];
                for j in 1..=path.len() {
                    next[j] = reach[j] || (next[j - 1] && path[j - 1] != '/');
                }
            }
            Token::AnyPath => {
                next[0] = reach[0];
                for j in 1..=path.len() {
                    next[j] = reach[j] || next[j - 1];
                }
            }
            Token::AnyDirs => {
                let mut seen = false;
                next[0] = reach[0];
                for j in 1..=path.len() {
                    seen |= reach[j - 1];
                    next[j] = reach[j] || (seen && path[j - 1] == '/');
                }
            }
        }
        std::mem::swap(&mut reach, &mut next);
        if !reach.contains(&true) {
            return false;
        }
    }
    reach[path.len()]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token {
    Literal(char),
    /// `?`
    AnyChar,
    /// `*`
    AnySegment,
    /// `**` not followed by `/`
    AnyPath,
    /// `**/`: nothing, or anything ending in `/`
    AnyDirs,
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars = pattern.chars().collect::<Vec<_>>();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let token = match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    i += 3;
                    Token::AnyDirs
                } else {
                    i += 2;
                    Token::AnyPath
                }
            }
            '*' => {
                i += 1;
                Token::AnySegment
            }
            '?' => {
                i += 1;
                Token::AnyChar
            }
            ch => {
                i += 1;
                Token::Literal(ch)
            }
        };
        // Runs of `*`-family tokens collapse; `a/**/**/b` is the same as `a/**/b`.
        let repeatable = matches!(token, Token::AnySegment | Token::AnyPath | Token::AnyDirs);
        if repeatable && tokens.last() == Some(&token) {
            continue;
        }
        tokens.push(token);
    }
    tokens
}

pub fn is_glob(value: &str) -> bool {
    value.contains('*') || value.contains('?')
}

/// Canonical form used for reservation keys and contract comparison.
pub fn normalize_path(raw: &str) -> String {
    let normalized = raw.trim().replace('\\', "/");
    let mut parts = Vec::<&str>::new();
    for segment in normalized.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        parts.push(segment);
    }
    let joined = parts.join("/");
    if normalized.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Two reservation keys overlap when equal or when either is a glob covering the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    (is_glob(a) && glob_match(a, b)) || (is_glob(b) && glob_match(b, a))
}
