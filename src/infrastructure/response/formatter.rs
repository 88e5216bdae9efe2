//! Keyword-driven SQL pretty-printer.
//!
//! This is not a SQL parser. Whitespace is collapsed, the text is split into
//! word / space / symbol tokens, and a single scanner walks the tokens once,
//! tracking parenthesis depth and whether it is inside a SELECT column list.
//! String literals are not recognized, so keywords or commas inside quotes can
//! be laid out as if they were code.

const COLUMN_INDENT: &str = "\n    ";
const JOIN_INDENT: &str = "\n    ";
const ON_INDENT: &str = "\n        ";

/// Clause keywords that start a new line at the base indentation.
const MAJOR_KEYWORDS: &[&[&str]] = &[
    &["SELECT"],
    &["FROM"],
    &["WHERE"],
    &["GROUP", "BY"],
    &["HAVING"],
    &["ORDER", "BY"],
    &["UNION"],
    &["EXCEPT"],
    &["INTERSECT"],
];

/// Join phrases, longest first so `LEFT OUTER JOIN` wins over `JOIN`.
const JOIN_PHRASES: &[&[&str]] = &[
    &["LEFT", "OUTER", "JOIN"],
    &["RIGHT", "OUTER", "JOIN"],
    &["FULL", "OUTER", "JOIN"],
    &["INNER", "JOIN"],
    &["LEFT", "JOIN"],
    &["RIGHT", "JOIN"],
    &["FULL", "JOIN"],
    &["CROSS", "JOIN"],
    &["JOIN"],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Space,
    Symbol(&'a str),
}

/// Lay out `sql` with one clause per line, indented joins and one top-level
/// SELECT column per line. Blank input is returned unchanged.
pub fn format_sql(sql: &str) -> String {
    if sql.trim().is_empty() {
        return sql.to_string();
    }

    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    let tokens = tokenize(&collapsed);
    let laid_out = Layout::new(&tokens).run();

    tidy_lines(&laid_out)
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        if is_word_char(ch) {
            word_start.get_or_insert(idx);
            continue;
        }
        if let Some(start) = word_start.take() {
            tokens.push(Token::Word(&text[start..idx]));
        }
        if ch == ' ' {
            tokens.push(Token::Space);
        } else {
            tokens.push(Token::Symbol(&text[idx..idx + ch.len_utf8()]));
        }
    }
    if let Some(start) = word_start {
        tokens.push(Token::Word(&text[start..]));
    }

    tokens
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

struct Layout<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
    depth: usize,
    in_select: bool,
    out: String,
}

impl<'t, 'a> Layout<'t, 'a> {
    fn new(tokens: &'t [Token<'a>]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            in_select: false,
            out: String::new(),
        }
    }

    fn run(mut self) -> String {
        while let Some(token) = self.tokens.get(self.pos).copied() {
            match token {
                Token::Space => self.space(),
                Token::Word(word) => self.word(word),
                Token::Symbol(symbol) => self.symbol(symbol),
            }
        }
        self.out
    }

    /// A space is where line breaks go: before joins, clause keywords and `ON`.
    fn space(&mut self) {
        let next = self.pos + 1;

        if let Some(end) = self.match_any(next, JOIN_PHRASES) {
            self.out.push_str(JOIN_INDENT);
            self.emit_range(next, end);
            self.pos = end;
            return;
        }

        if self.match_any(next, MAJOR_KEYWORDS).is_some() {
            self.out.push('\n');
            self.pos = next;
            return;
        }

        if self.is_word_at(next, "ON") && self.tokens.get(next + 1) == Some(&Token::Space) {
            self.out.push_str(ON_INDENT);
            self.pos = next;
            return;
        }

        self.out.push(' ');
        self.pos = next;
    }

    fn word(&mut self, word: &str) {
        self.out.push_str(word);
        self.pos += 1;

        if word.eq_ignore_ascii_case("SELECT") {
            self.in_select = true;
            self.select_modifiers();
            if self.tokens.get(self.pos) == Some(&Token::Space) {
                self.out.push_str(COLUMN_INDENT);
                self.pos += 1;
            }
        } else if word.eq_ignore_ascii_case("FROM") {
            self.in_select = false;
        }
    }

    fn symbol(&mut self, symbol: &str) {
        match symbol {
            "(" => self.depth += 1,
            ")" => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.out.push_str(symbol);
        self.pos += 1;

        if symbol == "," && self.depth == 0 && self.in_select {
            self.out.push_str(COLUMN_INDENT);
            if self.tokens.get(self.pos) == Some(&Token::Space) {
                self.pos += 1;
            }
        }
    }

    /// Keep `DISTINCT` and `TOP (n)` / `TOP n` on the SELECT line.
    fn select_modifiers(&mut self) {
        if self.tokens.get(self.pos) == Some(&Token::Space) && self.is_word_at(self.pos + 1, "DISTINCT") {
            self.emit_range(self.pos, self.pos + 2);
            self.pos += 2;
        }

        if self.tokens.get(self.pos) == Some(&Token::Space) && self.is_word_at(self.pos + 1, "TOP") {
            if let Some(end) = self.top_argument_end(self.pos + 2) {
                self.emit_range(self.pos, end);
                self.pos = end;
            }
        }
    }

    /// End index of the row count following `TOP` starting at `at`, if any.
    fn top_argument_end(&self, at: usize) -> Option<usize> {
        let mut idx = at;
        if self.tokens.get(idx) == Some(&Token::Space) {
            idx += 1;
        }

        match self.tokens.get(idx) {
            Some(Token::Word(word)) if is_number(word) => Some(idx + 1),
            Some(Token::Symbol("(")) => match (self.tokens.get(idx + 1), self.tokens.get(idx + 2)) {
                (Some(Token::Word(word)), Some(Token::Symbol(")"))) if is_number(word) => Some(idx + 3),
                _ => None,
            },
            _ => None,
        }
    }

    fn match_any(&self, at: usize, phrases: &[&[&str]]) -> Option<usize> {
        phrases.iter().find_map(|phrase| self.match_phrase(at, phrase))
    }

    /// Words of `phrase` separated by single spaces, case-insensitively.
    fn match_phrase(&self, at: usize, phrase: &[&str]) -> Option<usize> {
        let mut idx = at;
        for (n, expected) in phrase.iter().enumerate() {
            if n > 0 {
                if self.tokens.get(idx) != Some(&Token::Space) {
                    return None;
                }
                idx += 1;
            }
            if !self.is_word_at(idx, expected) {
                return None;
            }
            idx += 1;
        }
        Some(idx)
    }

    fn is_word_at(&self, idx: usize, expected: &str) -> bool {
        matches!(self.tokens.get(idx), Some(Token::Word(word)) if word.eq_ignore_ascii_case(expected))
    }

    fn emit_range(&mut self, start: usize, end: usize) {
        for token in &self.tokens[start..end] {
            match token {
                Token::Word(text) | Token::Symbol(text) => self.out.push_str(text),
                Token::Space => self.out.push(' '),
            }
        }
    }
}

fn is_number(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| c.is_ascii_digit())
}

fn tidy_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
